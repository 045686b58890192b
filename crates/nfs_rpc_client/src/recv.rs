//! Receive upcalls (§4.5): the per-mount tasks that pull replies off the
//! wire and hand them to the [`crate::registry`] for matching.
//!
//! Grounded on `nfs3_server::rpcwire::SocketMessageHandler::read` (the
//! fragment-reading loop) and `nfs3_server::tcp::process_socket` (the
//! task-per-connection upcall loop), generalized from "read one NFS call"
//! to "read one RPC reply and match it against an outstanding request".

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{RpcNegotiationError, TransportError};
use crate::net::Transport;
use crate::registry::{RpcReply, REGISTRY};
use crate::socket::wait_readable;
use crate::state::MountState;
use crate::wire::{AcceptData, DeniedData, ReplyHeader, ReplyStatus};

const MSG_REPLY: u32 = crate::wire::MSG_REPLY;
const RECV_BUF: usize = 65536;

/// Runs the receive loop for one connected candidate until it errors or the
/// mount is torn down. The caller (the per-mount worker in
/// [`crate::timer`]) is responsible for reconnecting and restarting this.
pub async fn receive_loop(state: &Arc<MountState>) -> std::io::Result<()> {
    loop {
        let is_stream = {
            let guard = state.socket.lock().await;
            match guard.as_ref() {
                Some(c) => c.is_stream(),
                None => return Ok(()),
            }
        };
        if is_stream {
            receive_one_stream(state).await?;
        } else {
            receive_one_dgram(state).await?;
        }
    }
}

async fn receive_one_dgram(state: &Arc<MountState>) -> std::io::Result<()> {
    let guard = state.socket.lock().await;
    let Some(candidate) = guard.as_ref() else {
        return Ok(());
    };
    wait_readable(candidate, std::time::Duration::from_secs(3600)).await?;
    let Transport::Dgram(sock) = &candidate.transport else {
        return Err(std::io::Error::other("expected a DGRAM candidate"));
    };
    let mut buf = [0u8; RECV_BUF];
    match sock.try_recv_from(&mut buf) {
        Ok((n, _from)) => {
            deliver(&buf[..n], true);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e),
    }
}

async fn receive_one_stream(state: &Arc<MountState>) -> std::io::Result<()> {
    let mut guard = state.socket.lock().await;
    let Some(candidate) = guard.as_mut() else {
        return Ok(());
    };
    wait_readable(candidate, std::time::Duration::from_secs(3600)).await?;
    let Transport::Stream(sock) = &candidate.transport else {
        return Err(std::io::Error::other("expected a STREAM candidate"));
    };
    let mut buf = [0u8; RECV_BUF];
    let n = match sock.try_read(&mut buf) {
        Ok(0) => return Err(std::io::Error::from(std::io::ErrorKind::ConnectionAborted)),
        Ok(n) => n,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
        Err(e) => return Err(e),
    };

    let reassembler = candidate
        .reassembler
        .as_mut()
        .expect("STREAM candidate always carries a reassembler");

    let mut offset = 0;
    while offset < n {
        let (consumed, record) = reassembler
            .feed(&buf[offset..n])
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        offset += consumed;
        if let Some(record) = record {
            deliver(&record, false);
        }
    }
    Ok(())
}

/// Parses the reply envelope and hands the result to the registry
/// (invariant 2: reply matching is keyed purely on XID, the payload itself
/// is opaque to this crate). `is_dgram` tells the registry whether a cwnd
/// charge needs releasing.
fn deliver(buf: &[u8], is_dgram: bool) {
    let (xid, msg_type) = match ReplyHeader::peek_xid_and_type(buf) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "dropping unparseable message");
            return;
        }
    };
    if msg_type != MSG_REPLY {
        trace!(xid, "dropping non-reply message on data socket");
        return;
    }
    let mut cursor = std::io::Cursor::new(buf);
    match ReplyHeader::unpack(&mut cursor) {
        Ok(header) => {
            let body_offset = usize::try_from(cursor.position()).unwrap_or(buf.len());
            let outcome = classify(&header.status, &buf[body_offset.min(buf.len())..]);
            if !REGISTRY.match_reply(header.xid, is_dgram, outcome) {
                debug!(xid = header.xid, "reply matched no outstanding request");
            }
        }
        Err(e) => warn!(xid, error = %e, "failed to parse reply header"),
    }
}

/// Turns a parsed reply status into either a successful [`RpcReply`] or the
/// [`TransportError`] it represents (§4.5, §7 error taxonomy).
fn classify(status: &ReplyStatus, body: &[u8]) -> Result<RpcReply, TransportError> {
    match status {
        ReplyStatus::Accepted {
            verf,
            data: AcceptData::Success,
        } => Ok(RpcReply {
            verf: verf.clone(),
            body: body.to_vec(),
        }),
        ReplyStatus::Accepted {
            data: AcceptData::ProgMismatch { .. },
            ..
        } => Err(TransportError::RpcNegotiation(RpcNegotiationError::ProgMismatch)),
        ReplyStatus::Accepted {
            data: AcceptData::ProgUnavail,
            ..
        } => Err(TransportError::RpcNegotiation(RpcNegotiationError::ProgUnavail)),
        ReplyStatus::Accepted {
            data: AcceptData::ProcUnavail,
            ..
        } => Err(TransportError::RpcNegotiation(RpcNegotiationError::ProcUnavail)),
        ReplyStatus::Accepted {
            data: AcceptData::GarbageArgs | AcceptData::SystemErr,
            ..
        } => Err(TransportError::BadRpc("server rejected call arguments".into())),
        ReplyStatus::Denied(DeniedData::RpcMismatch { .. }) => {
            Err(TransportError::RpcNegotiation(RpcNegotiationError::RpcMismatch))
        }
        ReplyStatus::Denied(DeniedData::AuthError(_)) => Err(TransportError::Restart),
    }
}
