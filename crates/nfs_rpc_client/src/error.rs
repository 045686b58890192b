//! Error types and the error-ranking taxonomy used to collapse search and
//! retransmission outcomes to a single result.

use std::fmt;
use std::io;

/// Errors produced by the transport core.
#[derive(Debug)]
pub enum Error {
    /// The calling thread (or task) was interrupted before a reply arrived.
    Interrupted,
    /// The underlying connection was torn down and the RPC must be restarted
    /// by the caller (e.g. after `WRONGSEC` or an NFSv4 grace-period bounce).
    Restart,
    /// A soft-mount request exhausted its retry budget.
    Timeout,
    /// Catch-all transport failure; the original cause is preserved.
    Io(io::Error),
    /// The server rejected the RPC's credentials.
    EAuth,
    /// The server does not support the requested program/version/procedure.
    NotSupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => write!(f, "operation interrupted"),
            Self::Restart => write!(f, "request must be restarted"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Io(e) => e.fmt(f),
            Self::EAuth => write!(f, "authentication error"),
            Self::NotSupported => write!(f, "operation not supported by server"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Transient(_) => Self::Timeout,
            TransportError::Network(e) => Self::Io(e),
            TransportError::RpcNegotiation(_) => Self::NotSupported,
            TransportError::BadRpc(m) => Self::Io(io::Error::other(m)),
            TransportError::Interrupted => Self::Interrupted,
            TransportError::Restart => Self::Restart,
            TransportError::Other(e) => Self::Io(e),
        }
    }
}

/// Internal error taxonomy (§7). Lower [`rank`](TransportError::rank) is
/// worse and wins ties only when no better result has been seen, matching
/// the "update-if->=-class" semantics the source uses when folding a
/// search's per-candidate errors into one worst-error.
#[derive(Debug)]
pub enum TransportError {
    /// Retry-worthy: `ETIMEDOUT`, `EWOULDBLOCK`.
    Transient(&'static str),
    /// Reconnect-worthy: pipe/unreachable/refused/reset/notconn/shutdown/
    /// hostdown/addr-unavail class errors.
    Network(io::Error),
    /// Surfaced to the caller as-is: RPC version/program/procedure mismatch.
    RpcNegotiation(RpcNegotiationError),
    /// Protocol parse failure.
    BadRpc(String),
    /// Always surfaced: signal delivery / forced unmount.
    Interrupted,
    /// Always surfaced: request must be reissued with different auth.
    Restart,
    /// Unclassified.
    Other(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(why) => write!(f, "transient error: {why}"),
            Self::Network(e) => write!(f, "network error: {e}"),
            Self::RpcNegotiation(n) => n.fmt(f),
            Self::BadRpc(msg) => write!(f, "malformed RPC message: {msg}"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Restart => write!(f, "request must be restarted"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcNegotiationError {
    RpcMismatch,
    ProcUnavail,
    ProgMismatch,
    ProgUnavail,
}

impl fmt::Display for RpcNegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RpcMismatch => "RPC version mismatch",
            Self::ProcUnavail => "procedure unavailable",
            Self::ProgMismatch => "program version mismatch",
            Self::ProgUnavail => "program unavailable",
        };
        write!(f, "{s}")
    }
}

impl TransportError {
    /// Rank used by [`worse`](Self::worse): 0 is `Success` (not representable
    /// here since this type only exists for error values), so the lowest
    /// rank an instance can have is 1.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Transient(_) => 1,
            Self::Network(_) => 2,
            Self::RpcNegotiation(_) => 3,
            Self::BadRpc(_) => 4,
            Self::Interrupted | Self::Restart | Self::Other(_) => 5,
        }
    }

    /// Classifies a raw I/O error observed during `connect`/`send`/`recv`.
    #[must_use]
    pub fn classify_io(e: io::Error) -> Self {
        use io::ErrorKind as K;
        match e.kind() {
            K::TimedOut | K::WouldBlock => Self::Transient(kind_name(e.kind())),
            K::BrokenPipe
            | K::AddrNotAvailable
            | K::ConnectionAborted
            | K::ConnectionReset
            | K::ConnectionRefused
            | K::NotConnected => Self::Network(e),
            K::Interrupted => Self::Interrupted,
            _ => Self::Other(e),
        }
    }

    /// Folds a newly observed error into the running "best error" of a
    /// search, keeping the later error on ties as the source does.
    #[must_use]
    pub fn worse(existing: Option<Self>, candidate: Self) -> Self {
        match existing {
            None => candidate,
            Some(prev) if candidate.rank() >= prev.rank() => candidate,
            Some(prev) => prev,
        }
    }
}

fn kind_name(kind: io::ErrorKind) -> &'static str {
    match kind {
        io::ErrorKind::TimedOut => "timed out",
        io::ErrorKind::WouldBlock => "would block",
        _ => "transient",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worse_keeps_higher_rank() {
        let a = TransportError::Transient("t");
        let b = TransportError::BadRpc("bad".into());
        let folded = TransportError::worse(Some(a), b);
        assert_eq!(folded.rank(), 4);
    }

    #[test]
    fn worse_prefers_latest_on_tie() {
        let a = TransportError::Network(io::Error::from(io::ErrorKind::ConnectionReset));
        let b = TransportError::Network(io::Error::from(io::ErrorKind::BrokenPipe));
        let folded = TransportError::worse(Some(a), b);
        assert!(matches!(folded, TransportError::Network(e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn classify_groups_reset_as_network() {
        let e = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(TransportError::classify_io(e).rank(), 2);
    }

    #[test]
    fn rpc_negotiation_surfaces_as_not_supported() {
        let e: Error = TransportError::RpcNegotiation(RpcNegotiationError::ProgMismatch).into();
        assert!(matches!(e, Error::NotSupported));
    }
}
