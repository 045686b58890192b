//! The socket/mbuf boundary (§1): everything below this module is an
//! external collaborator (the kernel's socket API, here tokio's).

#[cfg(feature = "tokio")]
pub mod tokio_impl;

use std::io;
use std::net::SocketAddr;

/// The two transport kinds a candidate socket can be (§3 "Candidate
/// socket"). Modeled as a closed enum rather than a trait object: there are
/// exactly two wire shapes (datagram vs byte-stream) and they don't share
/// an I/O interface (one is message-oriented, the other is not), so a
/// single polymorphic handle would just hide a match on sotype everywhere
/// it's used anyway.
pub enum Transport {
    Dgram(DgramSocket),
    Stream(StreamSocket),
}

/// A non-blocking datagram endpoint.
pub trait DgramTransport: Send + Sync {
    /// Sends one datagram without blocking; `Err(WouldBlock)` means the
    /// caller should wait on [`writable`](Self::writable) and retry.
    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
    /// Receives one datagram without blocking.
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn writable(&self) -> std::pin::Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>>;
    fn readable(&self) -> std::pin::Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// A non-blocking connection-oriented byte stream.
pub trait StreamTransport: Send + Sync {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn writable(&self) -> std::pin::Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>>;
    fn readable(&self) -> std::pin::Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>>;
    fn set_nodelay(&self, on: bool) -> io::Result<()>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

pub type DgramSocket = Box<dyn DgramTransport>;
pub type StreamSocket = Box<dyn StreamTransport>;

/// Builds [`Transport`]s for a given peer: the caller picks DGRAM or
/// STREAM, since §4.2 requires the connect search to try both.
#[cfg_attr(feature = "tokio", async_trait::async_trait)]
pub trait Connector: Send + Sync {
    async fn connect_stream(&self, addr: SocketAddr) -> io::Result<StreamSocket>;
    async fn bind_dgram(&self, local: SocketAddr, peer: SocketAddr) -> io::Result<DgramSocket>;
}
