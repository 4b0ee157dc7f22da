use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::transport::{Endpoint, RecvError};


/// Fixed acknowledgment payload. There is no correlation identifier: a sender treats
///  whatever datagram arrives next on its ephemeral endpoint as the ack. That is sound
///  only because each ephemeral endpoint carries exactly one message's retry sequence
///  and is never reused for unrelated traffic.
pub const ACK_PAYLOAD: &[u8] = b"ack";

/// A failed send attempt. Deadline expiry and socket failure trigger the same
///  retransmit, but they are distinct causes and are reported as such.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("no ack within deadline")]
    AckDeadlineElapsed,
    #[error("transport error: {0}")]
    Transport(anyhow::Error),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SendOutcome {
    Acked,
    Cancelled,
}

/// One send-and-wait cycle: the payload goes out verbatim (no header, no sequence
///  number), and the next datagram arriving on `endpoint` within `ack_deadline` counts
///  as the acknowledgment regardless of its content or sender.
pub async fn attempt_send(
    endpoint: &dyn Endpoint,
    peer_name: &str,
    to: SocketAddr,
    payload: &[u8],
    ack_deadline: Duration,
    max_datagram_size: usize,
) -> Result<(), AttemptError> {
    endpoint.send_to(to, payload).await
        .map_err(AttemptError::Transport)?;

    match endpoint.recv_from(max_datagram_size, Some(ack_deadline)).await {
        Ok((_ack, from)) => {
            debug!(peer = %peer_name, "{} acked", from);
            Ok(())
        }
        Err(RecvError::DeadlineElapsed) => Err(AttemptError::AckDeadlineElapsed),
        Err(RecvError::Io(e)) => Err(AttemptError::Transport(e.into())),
    }
}

/// Repeats [attempt_send] without backoff until the destination acks or the peer shuts
///  down. Per-attempt failures are logged and never propagate: delivery is at least
///  once, and the only escape from the loop short of an ack is the cancellation signal,
///  which is consulted on every iteration.
pub async fn send_until_acked(
    endpoint: &dyn Endpoint,
    peer_name: &str,
    to: SocketAddr,
    payload: &[u8],
    ack_deadline: Duration,
    max_datagram_size: usize,
    cancel_receiver: &mut broadcast::Receiver<()>,
) -> SendOutcome {
    loop {
        tokio::select! {
            r = attempt_send(endpoint, peer_name, to, payload, ack_deadline, max_datagram_size) => {
                match r {
                    Ok(()) => return SendOutcome::Acked,
                    Err(e) => warn!(peer = %peer_name, ?to, "send attempt failed, retrying: {}", e),
                }
            }
            _ = cancel_receiver.recv() => return SendOutcome::Cancelled,
        }
    }
}
