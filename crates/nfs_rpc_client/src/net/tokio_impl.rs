//! Tokio backend for the [`super::Transport`] traits, the only one this
//! crate ships (`tokio` is the primary backend in the rest of the pack,
//! `smol` an alternative we didn't carry forward).

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use socket2::{Domain, Socket, Type};
use tokio::net::{TcpStream, UdpSocket};

use super::{Connector, DgramSocket, DgramTransport, StreamSocket, StreamTransport};

/// IANA's reserved/privileged port range, the one `resvport` binds into
/// (§6.4 `MountFlags::resvport`).
const RESV_PORT_LO: u16 = 600;
const RESV_PORT_HI: u16 = 1023;

/// Binds a `socket2::Socket` to the first free port in the privileged
/// range, walking it the way the source's `bindresvport` loop does rather
/// than trusting the kernel to pick one for us (only the kernel's ephemeral
/// range is reachable by binding port `0`).
fn bind_reserved(domain: Domain, ty: Type, is_ipv4: bool) -> io::Result<Socket> {
    let socket = Socket::new(domain, ty, None)?;
    socket.set_reuse_address(true)?;
    let mut last_err = None;
    for port in RESV_PORT_LO..=RESV_PORT_HI {
        let local: SocketAddr = if is_ipv4 {
            format!("0.0.0.0:{port}").parse().unwrap()
        } else {
            format!("[::]:{port}").parse().unwrap()
        };
        match socket.bind(&local.into()) {
            Ok(()) => return Ok(socket),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::other("no reserved port available")))
}

impl DgramTransport for UdpSocket {
    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.try_send_to(buf, target)
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.try_recv_from(buf)
    }

    fn writable(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        Box::pin(self.writable())
    }

    fn readable(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        Box::pin(self.readable())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

impl StreamTransport for TcpStream {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn writable(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        Box::pin(TcpStream::writable(self))
    }

    fn readable(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        Box::pin(TcpStream::readable(self))
    }

    fn set_nodelay(&self, on: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, on)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// Connector for Tokio, producing either transport kind on request.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioConnector {
    /// Mirrors `MountFlags::resvport`: bind the outgoing socket to a
    /// privileged source port before connecting.
    pub resvport: bool,
}

impl TokioConnector {
    #[must_use]
    pub const fn with_resvport(resvport: bool) -> Self {
        Self { resvport }
    }
}

#[async_trait::async_trait]
impl Connector for TokioConnector {
    async fn connect_stream(&self, addr: SocketAddr) -> io::Result<StreamSocket> {
        let stream = if self.resvport {
            let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
            // socket2's `connect` blocks on the still-blocking socket; that's
            // fine here, the reserved-port handshake is a one-off per mount
            // and never on the hot path `try_*` methods serve.
            let socket = tokio::task::spawn_blocking(move || {
                let socket = bind_reserved(domain, Type::STREAM, addr.is_ipv4())?;
                socket.connect(&addr.into())?;
                socket.set_nonblocking(true)?;
                io::Result::Ok(socket)
            })
            .await
            .map_err(io::Error::other)??;
            TcpStream::from_std(socket.into())?
        } else {
            TcpStream::connect(addr).await?
        };
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    async fn bind_dgram(&self, local: SocketAddr, peer: SocketAddr) -> io::Result<DgramSocket> {
        let socket = if self.resvport {
            let domain = if local.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
            let socket = bind_reserved(domain, Type::DGRAM, local.is_ipv4())?;
            socket.set_nonblocking(true)?;
            UdpSocket::from_std(socket.into())?
        } else {
            UdpSocket::bind(local).await?
        };
        socket.connect(peer).await?;
        Ok(Box::new(socket))
    }
}
