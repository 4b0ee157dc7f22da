use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::peer::ack_protocol::{self, SendOutcome, ACK_PAYLOAD};
use crate::peer::admission::AdmissionController;
use crate::peer::config::PeerConfig;
use crate::peer::received_log::{InboundRecord, ReceivedLog};
use crate::transport::udp::UdpEndpoint;
use crate::transport::Endpoint;


/// A peer that exchanges discrete messages with other peers over UDP, with
///  at-least-once delivery: every reliable send is retransmitted until the destination
///  acks it, and every inbound datagram is recorded and acked unconditionally.
///
/// One background task runs the inbound listener for the peer's lifetime, plus one task
///  per in-flight reliable send, capped by the admission controller.
pub struct Peer {
    name: String,
    config: PeerConfig,
    listen_addr: SocketAddr,
    received: Arc<ReceivedLog>,
    admission: Arc<AdmissionController>,
    cancel_sender: broadcast::Sender<()>,
}

impl Debug for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Peer{{{}@{}}}", self.name, self.listen_addr)
    }
}

impl Peer {
    /// Bind the listening endpoint and start the inbound listener. A bind failure is
    ///  fatal to construction and surfaces to the caller; there is no retry.
    pub async fn new(name: impl Into<String>, config: PeerConfig) -> anyhow::Result<Peer> {
        let name = name.into();

        if config.send_limit == 0 {
            return Err(anyhow!("peer {:?}: send limit must be at least 1", name));
        }

        let endpoint = UdpEndpoint::bind(config.listen_addr).await?;
        let listen_addr = endpoint.local_addr()?;

        let (cancel_sender, cancel_receiver) = broadcast::channel(1);
        let received = Arc::new(ReceivedLog::new());
        let admission = Arc::new(AdmissionController::new(config.send_limit));

        {
            let name = name.clone();
            let received = received.clone();
            let max_datagram_size = config.max_datagram_size;
            tokio::spawn(async move {
                recv_loop(endpoint, name, received, max_datagram_size, cancel_receiver).await;
            });
        }

        info!(peer = %name, %listen_addr, "listening");

        Ok(Peer {
            name,
            config,
            listen_addr,
            received,
            admission,
            cancel_sender,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The actual bound listening address, i.e. with the OS-assigned port when the
    ///  configured address had port 0.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn received(&self) -> &ReceivedLog {
        &self.received
    }

    /// Hand `payload` to the retry machinery and return immediately. The message is
    ///  retransmitted until the destination acks it or the peer shuts down; completion
    ///  is observed via [Peer::wait], not through a return value.
    ///
    /// Destination resolution and the ephemeral bind happen first, before any admission
    ///  state is touched, so a failure here surfaces as `Err` without leaking a slot or
    ///  an outstanding-work unit.
    pub async fn reliable_send(&self, payload: impl Into<Bytes>, destination: &str) -> anyhow::Result<()> {
        let payload = payload.into();
        let dest = resolve(destination).await?;
        let endpoint = UdpEndpoint::ephemeral(dest).await?;

        self.admission.begin_work();

        let name = self.name.clone();
        let admission = self.admission.clone();
        let ack_deadline = self.config.ack_deadline;
        let max_datagram_size = self.config.max_datagram_size;
        let mut cancel_receiver = self.cancel_sender.subscribe();

        tokio::spawn(async move {
            let permit = match admission.admit().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(peer = %name, "admission gate closed: {}", e);
                    admission.finish_work();
                    return;
                }
            };

            debug!(peer = %name, %dest, in_flight = admission.in_flight(), "sending message");
            let outcome = ack_protocol::send_until_acked(
                &endpoint,
                &name,
                dest,
                &payload,
                ack_deadline,
                max_datagram_size,
                &mut cancel_receiver,
            ).await;

            match outcome {
                SendOutcome::Acked => debug!(peer = %name, %dest, "message delivered"),
                SendOutcome::Cancelled => warn!(peer = %name, %dest, "send abandoned on shutdown"),
            }

            // slot and outstanding-work unit are released together
            drop(permit);
            admission.finish_work();
        });

        Ok(())
    }

    /// Blocks until every reliable send issued so far has finished. Does not stop the
    ///  inbound listener.
    pub async fn wait(&self) {
        self.admission.wait_idle().await;
    }

    /// Stops the inbound listener and aborts in-flight retry loops at their next
    ///  iteration. Aborted sends release their admission slot and outstanding-work
    ///  unit, so a `wait` after shutdown cannot hang.
    pub fn shutdown(&self) {
        match self.cancel_sender.send(()) {
            Ok(_) => info!(peer = %self.name, "shutting down"),
            Err(_) => debug!(peer = %self.name, "shutdown with no active tasks"),
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.cancel_sender.send(()).ok();
    }
}

async fn resolve(destination: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(destination).await?
        .next()
        .ok_or_else(|| anyhow!("destination {:?} did not resolve to any address", destination))
}

/// Accepts datagrams on the listening endpoint until shutdown. Every inbound datagram
///  is treated as application data and acked unconditionally; there is no message-type
///  discrimination on this port. Receive errors are logged and the loop continues.
async fn recv_loop(
    endpoint: UdpEndpoint,
    name: String,
    received: Arc<ReceivedLog>,
    max_datagram_size: usize,
    mut cancel_receiver: broadcast::Receiver<()>,
) {
    trace!(peer = %name, "starting receive loop");

    loop {
        tokio::select! {
            r = endpoint.recv_from(max_datagram_size, None) => {
                match r {
                    Ok((payload, from)) => {
                        debug!(peer = %name, %from, payload_len = payload.len(), "received message");
                        trace!(peer = %name, ?payload);

                        received.append(InboundRecord { payload, sender: from });

                        if let Err(e) = endpoint.send_to(from, ACK_PAYLOAD).await {
                            warn!(peer = %name, "error sending ack to {}: {}", from, e);
                        }
                    }
                    Err(e) => {
                        error!(peer = %name, error = ?e, "error receiving from datagram socket");
                    }
                }
            }
            _ = cancel_receiver.recv() => break,
        }
    }

    info!(peer = %name, "receive loop shut down");
}


#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::time::Duration;

    use tokio::net::UdpSocket;
    use tokio::time;

    use super::*;

    fn test_config(send_limit: usize) -> PeerConfig {
        let mut config = PeerConfig::new("127.0.0.1:0".parse().unwrap(), send_limit);
        config.ack_deadline = Duration::from_millis(100);
        config
    }

    async fn test_peer(name: &str, send_limit: usize) -> Peer {
        Peer::new(name, test_config(send_limit)).await.unwrap()
    }

    /// Forwards datagrams between a single client and `dest`, optionally swallowing the
    ///  first ack or the first data datagram to simulate loss.
    async fn lossy_relay(relay: UdpSocket, dest: SocketAddr, drop_first_ack: bool, drop_first_data: bool) {
        let mut buf = [0u8; 2048];
        let mut client: Option<SocketAddr> = None;
        let mut ack_dropped = !drop_first_ack;
        let mut data_dropped = !drop_first_data;

        loop {
            let (len, from) = match relay.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(_) => return,
            };

            if from == dest {
                if !ack_dropped {
                    ack_dropped = true;
                    continue;
                }
                if let Some(client) = client {
                    relay.send_to(&buf[..len], client).await.ok();
                }
            }
            else {
                client = Some(from);
                if !data_dropped {
                    data_dropped = true;
                    continue;
                }
                relay.send_to(&buf[..len], dest).await.ok();
            }
        }
    }

    #[tokio::test]
    async fn test_two_peers_exchange() {
        let alice = test_peer("Alice", 2).await;
        let bob = test_peer("Bob", 2).await;

        alice.reliable_send("Hi Bob.", &bob.listen_addr().to_string()).await.unwrap();
        alice.reliable_send("Are you ok?", &bob.listen_addr().to_string()).await.unwrap();
        bob.reliable_send("Hello Alice.", &alice.listen_addr().to_string()).await.unwrap();

        time::timeout(Duration::from_secs(5), alice.wait()).await.unwrap();
        time::timeout(Duration::from_secs(5), bob.wait()).await.unwrap();

        assert_eq!(alice.received().payloads(), vec![Bytes::from("Hello Alice.")]);

        // the two sends to Bob run concurrently, so their arrival order is not fixed
        let mut bob_payloads = bob.received().payloads();
        bob_payloads.sort();
        assert_eq!(bob_payloads, vec![Bytes::from("Are you ok?"), Bytes::from("Hi Bob.")]);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_idle() {
        let peer = test_peer("Idle", 1).await;

        time::timeout(Duration::from_millis(100), peer.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_pending_while_send_unacked() {
        // a socket that never acks stands in for an unreachable destination
        let black_hole = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = test_peer("Sender", 1).await;

        peer.reliable_send("into the void", &black_hole.local_addr().unwrap().to_string()).await.unwrap();

        assert!(time::timeout(Duration::from_millis(300), peer.wait()).await.is_err());
        peer.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_releases_pending_sends() {
        let black_hole = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = black_hole.local_addr().unwrap().to_string();
        let peer = test_peer("Sender", 1).await;

        peer.reliable_send("first", &dest).await.unwrap();
        // queued behind the admission limit of 1
        peer.reliable_send("second", &dest).await.unwrap();

        peer.shutdown();
        time::timeout(Duration::from_secs(1), peer.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_limit_bounds_in_flight_sends() {
        let black_hole = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = black_hole.local_addr().unwrap().to_string();
        let peer = test_peer("Sender", 1).await;

        peer.reliable_send("first", &dest).await.unwrap();
        peer.reliable_send("second", &dest).await.unwrap();

        // with a limit of one, every (re)transmission that arrives comes from the first
        // send's ephemeral port; the second send is never admitted
        let mut buf = [0u8; 2048];
        let mut sources = HashSet::new();
        for _ in 0..4 {
            match time::timeout(Duration::from_millis(250), black_hole.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => {
                    assert_eq!(&buf[..len], b"first");
                    sources.insert(from);
                }
                _ => break,
            }
        }

        assert_eq!(sources.len(), 1);
        peer.shutdown();
        time::timeout(Duration::from_secs(1), peer.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_loss_causes_duplicate_record() {
        let receiver = test_peer("Receiver", 1).await;
        let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay.local_addr().unwrap();
        tokio::spawn(lossy_relay(relay, receiver.listen_addr(), true, false));

        let sender = test_peer("Sender", 1).await;
        sender.reliable_send("pay-load", &relay_addr.to_string()).await.unwrap();

        time::timeout(Duration::from_secs(5), sender.wait()).await.unwrap();

        // data arrived twice: once for the attempt whose ack was swallowed, once for
        // the retransmission
        assert_eq!(
            receiver.received().payloads(),
            vec![Bytes::from("pay-load"), Bytes::from("pay-load")],
        );
    }

    #[tokio::test]
    async fn test_first_datagram_lost_triggers_retransmit() {
        let receiver = test_peer("Receiver", 1).await;
        let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay.local_addr().unwrap();
        tokio::spawn(lossy_relay(relay, receiver.listen_addr(), false, true));

        let sender = test_peer("Sender", 1).await;
        sender.reliable_send("pay-load", &relay_addr.to_string()).await.unwrap();

        time::timeout(Duration::from_secs(5), sender.wait()).await.unwrap();

        // the swallowed first attempt left no trace at the receiver
        assert_eq!(receiver.received().payloads(), vec![Bytes::from("pay-load")]);
    }

    #[tokio::test]
    async fn test_unresolvable_destination_is_reported() {
        let peer = test_peer("Sender", 1).await;

        assert!(peer.reliable_send("x", "not an address").await.is_err());

        // the failed send left no outstanding work behind
        time::timeout(Duration::from_millis(100), peer.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let first = test_peer("First", 1).await;

        let result = Peer::new("Second", PeerConfig::new(first.listen_addr(), 1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_zero_send_limit_is_rejected() {
        assert!(Peer::new("Broken", test_config(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_listener() {
        let peer = test_peer("Receiver", 1).await;
        let listen_addr = peer.listen_addr();

        peer.shutdown();
        time::sleep(Duration::from_millis(50)).await;

        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        probe.send_to(b"hello?", listen_addr).await.unwrap();

        let mut buf = [0u8; 16];
        assert!(time::timeout(Duration::from_millis(200), probe.recv_from(&mut buf)).await.is_err());
        assert!(peer.received().is_empty());
    }
}
