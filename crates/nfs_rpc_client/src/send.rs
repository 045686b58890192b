//! Send engine (§4.4): serializes sends onto a mount's socket, honors the
//! DGRAM congestion window, and classifies every outcome so the caller knows
//! whether to retry, reconnect, or give up.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::TransportError;
use crate::net::Transport;
use crate::rto::ProcClass;
use crate::socket::wait_writable;
use crate::state::{MountState, SocketFlags};

/// What happened when we tried to push one record onto the wire.
#[derive(Debug)]
pub enum SendOutcome {
    /// The whole record is on the wire (or, for DGRAM, handed to the
    /// kernel as one atomic datagram).
    Sent,
    /// A retransmission of a request already in flight (§4.4 step 5: halve
    /// cwnd, bump the request's timeout count).
    Resent,
}

/// Sends one already-framed record (see [`crate::wire::pack_call_record`])
/// over a mount's current socket (§4.4 steps 1-6).
///
/// `is_retransmit` distinguishes a fresh send from a retransmission so the
/// congestion window is only charged once per request and halved (not
/// charged again) on a resend.
pub async fn send_request(
    state: &Arc<MountState>,
    class: ProcClass,
    record: &[u8],
    is_retransmit: bool,
) -> Result<SendOutcome, TransportError> {
    if state.flags().contains(SocketFlags::SOFTTERM) {
        return Err(TransportError::Interrupted);
    }

    // DGRAM mounts are windowed; STREAM relies on TCP's own flow control
    // (§4.4 step 5, invariant 3).
    let is_dgram = {
        let guard = state.socket.lock().await;
        guard.as_ref().is_some_and(|c| !c.is_stream())
    };

    if is_dgram {
        if is_retransmit {
            state.cwnd.lock().halve();
        } else {
            wait_for_cwnd_room(state).await;
            state.cwnd.lock().charge();
        }
    }

    // Only one task may be mid-send on the socket at a time (§4.4 "Send
    // lock"); this also protects STREAM writes from interleaving, which
    // would otherwise corrupt record framing.
    let _send_guard = state.send_lock.lock().await;

    wait_until_sendable(state, class).await?;

    let timeout = socket_send_timeout(state);
    let guard = state.socket.lock().await;
    let Some(candidate) = guard.as_ref() else {
        return Err(TransportError::Network(std::io::Error::from(
            std::io::ErrorKind::NotConnected,
        )));
    };

    wait_writable(candidate, timeout)
        .await
        .map_err(TransportError::classify_io)?;

    let result = match &candidate.transport {
        Transport::Dgram(s) => s.try_send_to(record, candidate.peer).map(|n| n == record.len()),
        Transport::Stream(s) => send_all_stream(s.as_ref(), record).await,
    };

    match result {
        Ok(true) => {
            debug!(bytes = record.len(), retransmit = is_retransmit, "sent RPC record");
            Ok(if is_retransmit {
                SendOutcome::Resent
            } else {
                SendOutcome::Sent
            })
        }
        Ok(false) => Err(TransportError::BadRpc("short write".into())),
        Err(e) => {
            warn!(error = %e, "send failed");
            Err(TransportError::classify_io(e))
        }
    }
}

async fn send_all_stream(
    stream: &dyn crate::net::StreamTransport,
    record: &[u8],
) -> std::io::Result<bool> {
    let mut sent = 0;
    while sent < record.len() {
        match stream.try_write(&record[sent..]) {
            Ok(0) => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero)),
            Ok(n) => sent += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                stream.writable().await?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(sent == record.len())
}

/// Parks the caller until the DGRAM congestion window has room, waking on
/// every `cwnd_room` notification rather than polling (§4.4 step 5).
async fn wait_for_cwnd_room(state: &MountState) {
    loop {
        if state.cwnd.lock().has_room() {
            return;
        }
        state.cwnd_room.notified().await;
    }
}

/// Blocks the caller while the mount is mid-reconnect or mid-recovery
/// (§4.4 step 2-3: `CONNECTING`/`RECOVER` must clear before a send proceeds).
async fn wait_until_sendable(state: &MountState, _class: ProcClass) -> Result<(), TransportError> {
    loop {
        let flags = state.flags();
        if flags.contains(SocketFlags::SOFTTERM) {
            return Err(TransportError::Interrupted);
        }
        if !flags.contains(SocketFlags::CONNECTING) && !flags.contains(SocketFlags::RECOVER) {
            return Ok(());
        }
        state.flags_changed.notified().await;
    }
}

fn socket_send_timeout(state: &MountState) -> Duration {
    crate::config::socket_timeout(state.config.flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoneAuth;
    use crate::config::MountConfig;

    #[tokio::test]
    async fn send_on_softterm_is_rejected_immediately() {
        let state = Arc::new(MountState::new(MountConfig::default(), Arc::new(NoneAuth), vec![]));
        state.set_flags(SocketFlags::SOFTTERM, SocketFlags::empty());
        let result = send_request(&state, ProcClass::Default, &[1, 2, 3], false).await;
        assert!(matches!(result, Err(TransportError::Interrupted)));
    }

    #[tokio::test]
    async fn send_without_socket_reports_not_connected() {
        let state = Arc::new(MountState::new(MountConfig::default(), Arc::new(NoneAuth), vec![]));
        let result = send_request(&state, ProcClass::Default, &[1, 2, 3], false).await;
        assert!(matches!(result, Err(TransportError::Network(_))));
    }
}
