use std::net::SocketAddr;
use std::time::Duration;


#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// address the peer listens on for inbound messages; port 0 binds an OS-assigned
    ///  port
    pub listen_addr: SocketAddr,

    /// upper bound on the number of reliable sends that may be in flight (sent but not
    ///  yet acked) at the same time; must be at least 1
    pub send_limit: usize,

    /// how long each send attempt waits for an ack before retransmitting
    pub ack_deadline: Duration,

    /// receive buffer size; longer datagrams are truncated by the OS
    pub max_datagram_size: usize,
}

impl PeerConfig {
    pub fn new(listen_addr: SocketAddr, send_limit: usize) -> PeerConfig {
        PeerConfig {
            listen_addr,
            send_limit,
            ack_deadline: Duration::from_secs(1),
            max_datagram_size: 2048,
        }
    }
}
