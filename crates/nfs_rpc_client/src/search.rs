//! Connect search (§4.2): find a working candidate socket among a server's
//! address list, pinging each with `NULL` to negotiate an acceptable RPC
//! program version before committing to it.
//!
//! Races candidates with [`futures_util::stream::FuturesUnordered`] the way
//! `graymamba` fans in its own async work, while the per-candidate deadline
//! is enforced with `tokio::time::timeout`, the same pattern
//! `nfs3_server::tcp::process_socket` uses around its own read loop.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;

use crate::auth::AuthProvider;
use crate::error::{RpcNegotiationError, TransportError};
use crate::net::Connector;
use crate::socket::{socket_create, socket_destroy, wait_readable, wait_writable, CandidateSocket};
use crate::state::MountState;
use crate::wire::{self, AcceptData, CallHeader, DeniedData, OpaqueAuth, ReplyHeader, ReplyStatus};
use crate::xid::XID;

const NULL_PROC: u32 = 0;
const CANDIDATE_TIMEOUT: Duration = Duration::from_secs(3);

/// A candidate that answered `NULL` successfully, plus the version it
/// answered on.
pub struct SearchOutcome {
    pub socket: CandidateSocket,
    pub negotiated_vers: u32,
}

/// Which transport kinds to try, in order (§4.2 "STREAM/DGRAM fallback
/// policy"). NFSv4 prefers STREAM-only; NFSv2/v3 tries STREAM then falls
/// back to DGRAM.
#[derive(Debug, Clone, Copy)]
pub enum TransportPolicy {
    StreamOnly,
    StreamThenDgram,
    DgramOnly,
}

impl TransportPolicy {
    const fn kinds(self) -> &'static [bool] {
        // `true` means STREAM.
        match self {
            Self::StreamOnly => &[true],
            Self::StreamThenDgram => &[true, false],
            Self::DgramOnly => &[false],
        }
    }
}

/// Runs the connect search: tries every address in the mount's location
/// list, for each address in the transport-kind order the policy dictates,
/// racing them all and returning the first to answer `NULL` successfully.
pub async fn connect_search(
    connector: &dyn Connector,
    state: &MountState,
    prog: u32,
    min_vers: u32,
    max_vers: u32,
    auth: &dyn AuthProvider,
    policy: TransportPolicy,
) -> Result<SearchOutcome, TransportError> {
    let addrs: Vec<SocketAddr> = state.locations.lock().addrs().to_vec();
    if addrs.is_empty() {
        return Err(TransportError::Other(std::io::Error::other(
            "no candidate addresses",
        )));
    }

    let mut attempts = FuturesUnordered::new();
    let mut already_retried = std::collections::HashSet::new();
    for &addr in &addrs {
        for &stream in policy.kinds() {
            attempts.push(probe_candidate(connector, addr, stream, prog, max_vers, auth));
        }
    }

    let mut worst: Option<TransportError> = None;
    while let Some(result) = attempts.next().await {
        match result {
            Ok(outcome) => return Ok(outcome),
            Err((addr, stream, ProbeError::Mismatch { low, high })) => {
                // §4.2 version negotiation: a candidate that rejected our
                // guessed version tells us the window it does support: walk
                // down to `high` and give that same candidate one more try,
                // as long as it still overlaps what the caller will accept.
                if high >= min_vers && high <= max_vers && already_retried.insert((addr, stream)) {
                    attempts.push(probe_candidate(connector, addr, stream, prog, high, auth));
                    continue;
                }
                if low > max_vers || high < min_vers {
                    worst = Some(TransportError::worse(
                        worst,
                        TransportError::RpcNegotiation(RpcNegotiationError::ProgMismatch),
                    ));
                }
            }
            Err((_, _, ProbeError::Transport(e))) => {
                worst = Some(TransportError::worse(worst, e));
            }
        }
    }

    Err(worst.unwrap_or(TransportError::Other(std::io::Error::other(
        "connect search exhausted all candidates",
    ))))
}

enum ProbeError {
    Mismatch { low: u32, high: u32 },
    Transport(TransportError),
}

async fn probe_candidate(
    connector: &dyn Connector,
    addr: SocketAddr,
    stream: bool,
    prog: u32,
    vers: u32,
    auth: &dyn AuthProvider,
) -> Result<SearchOutcome, (SocketAddr, bool, ProbeError)> {
    let local: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let candidate = socket_create(
        connector,
        local,
        addr,
        stream,
        crate::config::MountFlags::default(),
    )
    .await
    .map_err(|e| (addr, stream, ProbeError::Transport(TransportError::classify_io(e))))?;

    match null_ping(&candidate, prog, vers, auth).await {
        Ok(()) => Ok(SearchOutcome {
            socket: candidate,
            negotiated_vers: vers,
        }),
        Err(e) => {
            socket_destroy(candidate);
            Err((addr, stream, e))
        }
    }
}

/// Sends one `NULL` call and waits for its reply, used both by the connect
/// search and (for GSS contexts) periodic context-alive checks.
async fn null_ping(
    candidate: &CandidateSocket,
    prog: u32,
    vers: u32,
    auth: &dyn AuthProvider,
) -> Result<(), ProbeError> {
    let header = CallHeader {
        xid: XID.next_xid32(),
        prog,
        vers,
        proc: NULL_PROC,
        cred: auth.build_credential(),
        verf: auth.build_verifier(),
    };
    let record = wire::pack_call_record(&header, &[])
        .map_err(|e| ProbeError::Transport(TransportError::Other(e)))?;

    send_all(candidate, &record)
        .await
        .map_err(|e| ProbeError::Transport(TransportError::classify_io(e)))?;

    let reply = recv_one(candidate)
        .await
        .map_err(|e| ProbeError::Transport(TransportError::classify_io(e)))?;

    let mut cursor = std::io::Cursor::new(reply);
    let parsed = ReplyHeader::unpack(&mut cursor)
        .map_err(|e| ProbeError::Transport(TransportError::BadRpc(e.to_string())))?;
    if parsed.xid != header.xid {
        return Err(ProbeError::Transport(TransportError::BadRpc(
            "xid mismatch on NULL ping".into(),
        )));
    }
    match parsed.status {
        ReplyStatus::Accepted {
            data: AcceptData::Success,
            ..
        } => Ok(()),
        ReplyStatus::Accepted {
            data: AcceptData::ProgMismatch { low, high },
            ..
        } => Err(ProbeError::Mismatch { low, high }),
        ReplyStatus::Accepted {
            data: AcceptData::ProgUnavail | AcceptData::ProcUnavail | AcceptData::GarbageArgs,
            ..
        } => Err(ProbeError::Transport(TransportError::RpcNegotiation(
            RpcNegotiationError::ProgUnavail,
        ))),
        ReplyStatus::Accepted {
            data: AcceptData::SystemErr,
            ..
        } => Err(ProbeError::Transport(TransportError::BadRpc(
            "server system error".into(),
        ))),
        ReplyStatus::Denied(DeniedData::RpcMismatch { .. }) => Err(ProbeError::Transport(
            TransportError::RpcNegotiation(RpcNegotiationError::RpcMismatch),
        )),
        ReplyStatus::Denied(DeniedData::AuthError(_)) => {
            Err(ProbeError::Transport(TransportError::Restart))
        }
    }
}

pub(crate) async fn send_all(candidate: &CandidateSocket, buf: &[u8]) -> std::io::Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        wait_writable(candidate, CANDIDATE_TIMEOUT).await?;
        let n = match &candidate.transport {
            crate::net::Transport::Dgram(s) => s.try_send_to(&buf[sent..], candidate.peer)?,
            crate::net::Transport::Stream(s) => s.try_write(&buf[sent..])?,
        };
        sent += n;
    }
    Ok(())
}

pub(crate) async fn recv_one(candidate: &CandidateSocket) -> std::io::Result<Vec<u8>> {
    // NULL pings during the search never span a reconnect, so a fresh,
    // throwaway reassembler is fine even on STREAM candidates.
    let mut reassembler = crate::record::RecordReassembler::new();
    let mut buf = [0u8; 4096];
    loop {
        wait_readable(candidate, CANDIDATE_TIMEOUT).await?;
        match &candidate.transport {
            crate::net::Transport::Dgram(s) => {
                let (n, _from) = s.try_recv_from(&mut buf)?;
                return Ok(buf[..n].to_vec());
            }
            crate::net::Transport::Stream(s) => {
                let n = s.try_read(&mut buf)?;
                if n == 0 {
                    return Err(std::io::Error::from(std::io::ErrorKind::ConnectionAborted));
                }
                let mut offset = 0;
                while offset < n {
                    let (consumed, record) = reassembler
                        .feed(&buf[offset..n])
                        .map_err(|e| std::io::Error::other(e.to_string()))?;
                    offset += consumed;
                    if let Some(record) = record {
                        return Ok(record);
                    }
                }
            }
        }
    }
}

/// Warm-connect flow for the MOUNT protocol and portmapper/rpcbind lookups
/// (§4.2 "warm connect"): a thin NULL/GETPORT-style helper reusing the same
/// probe machinery, kept here since it shares all of its wire handling with
/// the main search rather than with the data-protocol send/receive path.
pub async fn warm_ping(
    connector: &dyn Connector,
    addr: SocketAddr,
    prog: u32,
    vers: u32,
    auth: &dyn AuthProvider,
) -> Result<(), TransportError> {
    let local: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let candidate = socket_create(connector, local, addr, false, crate::config::MountFlags::default())
        .await
        .map_err(TransportError::classify_io)?;
    let result = null_ping(&candidate, prog, vers, auth).await;
    socket_destroy(candidate);
    result.map_err(|e| match e {
        ProbeError::Mismatch { .. } => {
            TransportError::RpcNegotiation(RpcNegotiationError::ProgMismatch)
        }
        ProbeError::Transport(e) => e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_then_dgram_tries_stream_first() {
        let kinds = TransportPolicy::StreamThenDgram.kinds();
        assert_eq!(kinds, &[true, false]);
    }

    #[test]
    fn dgram_only_never_tries_stream() {
        assert_eq!(TransportPolicy::DgramOnly.kinds(), &[false]);
    }
}
