pub mod udp;

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
#[cfg(test)] use mockall::automock;


/// This is an abstraction for a bound datagram endpoint, introduced to facilitate mocking
///  the I/O part away for testing.
///
/// Message boundaries are exactly the datagram boundaries: one send is one datagram is
///  one receive. There is no ordering and no delivery guarantee at this level.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Endpoint: Send + Sync + 'static {
    fn local_addr(&self) -> anyhow::Result<SocketAddr>;

    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()>;

    /// Receive a single datagram of at most `max_len` bytes, together with its sender's
    ///  address. With a deadline, waiting ends in [RecvError::DeadlineElapsed] when it
    ///  expires; without one, this blocks until a datagram arrives or the socket fails.
    async fn recv_from(&self, max_len: usize, deadline: Option<Duration>) -> Result<(Bytes, SocketAddr), RecvError>;
}

/// Deadline expiry is part of the regular retransmit cycle and must be distinguishable
///  from actual socket failures, so this is a typed error rather than `anyhow`.
#[derive(Debug, thiserror::Error)]
pub enum RecvError {
    #[error("receive deadline elapsed")]
    DeadlineElapsed,
    #[error("receive failed: {0}")]
    Io(#[from] std::io::Error),
}
