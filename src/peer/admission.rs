use std::sync::Arc;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};


/// Gate that caps how many reliable sends may be in flight at the same time, combined
///  with the outstanding-work counter that `wait` blocks on.
///
/// The counter is incremented synchronously when a send is issued, before its retry
///  task is spawned, so a `wait` issued right after `reliable_send` returns always
///  observes that send. The admission slot itself is acquired inside the retry task and
///  held for the whole retry loop.
pub struct AdmissionController {
    send_limit: usize,
    permits: Arc<Semaphore>,
    outstanding: watch::Sender<usize>,
}

impl AdmissionController {
    pub fn new(send_limit: usize) -> AdmissionController {
        let (outstanding, _) = watch::channel(0);

        AdmissionController {
            send_limit,
            permits: Arc::new(Semaphore::new(send_limit)),
            outstanding,
        }
    }

    /// Register one issued send with the outstanding-work counter.
    pub fn begin_work(&self) {
        self.outstanding.send_modify(|n| *n += 1);
    }

    /// Deregister one send, on ack or on cancellation. Must be called exactly once per
    ///  `begin_work`.
    pub fn finish_work(&self) {
        self.outstanding.send_modify(|n| *n -= 1);
    }

    /// Block until an admission slot is free. Dropping the returned permit frees the
    ///  slot.
    pub async fn admit(&self) -> anyhow::Result<OwnedSemaphorePermit> {
        let permit = self.permits.clone().acquire_owned().await?;
        Ok(permit)
    }

    /// Resolves once no issued send is outstanding; immediately if none is.
    pub async fn wait_idle(&self) {
        let mut outstanding = self.outstanding.subscribe();
        // the sender half lives in self, so this cannot fail while we are borrowed
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }

    #[cfg(test)]
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.send_limit - self.permits.available_permits()
    }
}
