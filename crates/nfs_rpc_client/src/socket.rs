//! Socket lifecycle (§4.1): creation, configuration, and teardown of one
//! candidate transport, grounded on `nfs3_server`'s accept-loop socket setup
//! generalized to the client side and to both transport kinds.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::config::MountFlags;
use crate::net::{Connector, Transport};
use crate::record::RecordReassembler;

/// A socket plus the bookkeeping that rides along with it for its whole
/// lifetime: the peer it's bound to, and (STREAM only) the incremental
/// record reassembler, since record boundaries don't survive a reconnect.
pub struct CandidateSocket {
    pub transport: Transport,
    pub peer: SocketAddr,
    pub reassembler: Option<RecordReassembler>,
}

impl CandidateSocket {
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self.transport, Transport::Stream(_))
    }
}

/// Creates and configures one candidate socket (§4.1 steps 1-4): connect (or
/// bind, for DGRAM with `noconnect`), then apply timeouts/keepalive/nodelay.
/// Configuration failure is treated as atomic: the freshly created socket is
/// simply dropped, never returned half-configured.
pub async fn socket_create(
    connector: &dyn Connector,
    local: SocketAddr,
    peer: SocketAddr,
    stream: bool,
    flags: MountFlags,
) -> io::Result<CandidateSocket> {
    let transport = if stream {
        Transport::Stream(connector.connect_stream(peer).await?)
    } else {
        Transport::Dgram(connector.bind_dgram(local, peer).await?)
    };
    let candidate = CandidateSocket {
        reassembler: stream.then(RecordReassembler::new),
        transport,
        peer,
    };
    socket_configure(&candidate, flags)?;
    Ok(candidate)
}

/// Applies post-connect socket-option tuning (§4.1 step 4): `TCP_NODELAY`
/// for STREAM, nothing DGRAM-specific beyond what [`crate::net::Connector`]
/// already set up at bind time (buffer sizing and reserved-port binding are
/// the connector's job since they must happen before `connect`/`bind`).
fn socket_configure(candidate: &CandidateSocket, _flags: MountFlags) -> io::Result<()> {
    if let Transport::Stream(ref s) = candidate.transport {
        s.set_nodelay(true)?;
    }
    Ok(())
}

/// Tears a candidate down; for DGRAM/STREAM alike this just means dropping
/// the handle; the OS closes the file descriptor. Kept as an explicit
/// function because recovery flows want a single, named place to hang a
/// "log that we gave up on this candidate" line.
pub fn socket_destroy(candidate: CandidateSocket) {
    tracing::debug!(peer = %candidate.peer, "destroying candidate socket");
    drop(candidate);
}

/// Blocks (asynchronously) until a socket is ready for a `MSG_DONTWAIT`
/// send, honoring the per-mount socket timeout (§4.1, §6.2).
pub async fn wait_writable(candidate: &CandidateSocket, timeout: Duration) -> io::Result<()> {
    let fut = match &candidate.transport {
        Transport::Dgram(s) => s.writable(),
        Transport::Stream(s) => s.writable(),
    };
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::from(io::ErrorKind::TimedOut)),
    }
}

/// Blocks (asynchronously) until a socket has data available to read.
pub async fn wait_readable(candidate: &CandidateSocket, timeout: Duration) -> io::Result<()> {
    let fut = match &candidate.transport {
        Transport::Dgram(s) => s.readable(),
        Transport::Stream(s) => s.readable(),
    };
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::from(io::ErrorKind::TimedOut)),
    }
}
