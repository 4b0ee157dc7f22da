use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::time;
use tracing::trace;

use crate::transport::{Endpoint, RecvError};


/// [Endpoint] implementation on a Tokio UDP socket. The socket is closed when the
///  endpoint is dropped.
pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    /// Bind a peer's listening endpoint. Port 0 binds an OS-assigned port, which can be
    ///  looked up through `local_addr`.
    pub async fn bind(addr: impl ToSocketAddrs) -> anyhow::Result<UdpEndpoint> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(UdpEndpoint { socket })
    }

    /// Bind an ephemeral endpoint on an OS-assigned port for one outbound message's
    ///  retry sequence, in the address family of the destination.
    pub async fn ephemeral(dest: SocketAddr) -> anyhow::Result<UdpEndpoint> {
        let bind_addr = if dest.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(SocketAddr::from_str(bind_addr)?).await?;
        Ok(UdpEndpoint { socket })
    }
}

#[async_trait::async_trait]
impl Endpoint for UdpEndpoint {
    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        trace!("sending {} byte datagram to {:?}", buf.len(), to);
        self.socket.send_to(buf, to).await?;
        Ok(())
    }

    async fn recv_from(&self, max_len: usize, deadline: Option<Duration>) -> Result<(Bytes, SocketAddr), RecvError> {
        let mut buf = BytesMut::zeroed(max_len);

        let (len, from) = match deadline {
            Some(deadline) => {
                time::timeout(deadline, self.socket.recv_from(&mut buf)).await
                    .map_err(|_| RecvError::DeadlineElapsed)??
            }
            None => self.socket.recv_from(&mut buf).await?,
        };

        buf.truncate(len);
        Ok((buf.freeze(), from))
    }
}
