use std::net::SocketAddr;
use std::sync::Mutex;

use bytes::Bytes;


/// One accepted datagram: its payload and the sender's address, captured at receipt
///  time.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InboundRecord {
    pub payload: Bytes,
    pub sender: SocketAddr,
}

/// Append-only log of every payload the listener accepted, in arrival order.
///
/// There is no deduplication key: when an ack is lost, the sender retransmits a payload
///  that was already delivered, and the retransmission is appended as a distinct
///  record. Only the listener appends; readers take snapshots behind the same lock, so
///  a read after `wait` observes every append that preceded the last ack.
pub struct ReceivedLog {
    records: Mutex<Vec<InboundRecord>>,
}

impl ReceivedLog {
    pub fn new() -> ReceivedLog {
        ReceivedLog {
            records: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn append(&self, record: InboundRecord) {
        self.records.lock()
            .expect("received log lock poisoned")
            .push(record);
    }

    pub fn snapshot(&self) -> Vec<InboundRecord> {
        self.records.lock()
            .expect("received log lock poisoned")
            .clone()
    }

    pub fn payloads(&self) -> Vec<Bytes> {
        self.snapshot().into_iter()
            .map(|record| record.payload)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock()
            .expect("received log lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReceivedLog {
    fn default() -> Self {
        ReceivedLog::new()
    }
}
