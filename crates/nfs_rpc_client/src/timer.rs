//! Timer & reconnect (§4.6): the global retransmission timer and the
//! per-mount worker that reconnects, flushes the resend queue, and declares
//! dead servers.
//!
//! Grounded on `nfs3_server::transaction_tracker::Cleaner::run`: a lazily
//! started/stopped periodic task that naps between passes and exits once
//! there's nothing left to watch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::{debug, info, warn};

use crate::config::dead_timeout;
use crate::net::Connector;
use crate::registry::REGISTRY;
use crate::rto::ProcClass;
use crate::search::{connect_search, TransportPolicy};
use crate::state::{MountState, SocketFlags};

const TICK_INTERVAL: Duration = Duration::from_millis(500);

static TIMER_RUNNING: AtomicBool = AtomicBool::new(false);
static TIMER_HANDLE: Lazy<parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>> =
    Lazy::new(|| parking_lot::Mutex::new(None));

/// Idempotently starts the global timer task if it isn't already running
/// (§4.6 "Timer": started on a mount's first outstanding request, stopped
/// once the registry goes empty).
pub fn ensure_timer_running() {
    if TIMER_RUNNING.swap(true, Ordering::AcqRel) {
        return;
    }
    let handle = tokio::spawn(timer_loop());
    *TIMER_HANDLE.lock() = Some(handle);
}

async fn timer_loop() {
    loop {
        tokio::time::sleep(TICK_INTERVAL).await;
        tick();
        if REGISTRY.is_empty() {
            TIMER_RUNNING.store(false, Ordering::Release);
            return;
        }
    }
}

/// One pass of the 9-step algorithm (§4.6 "Timer"), simplified to what's
/// representable without kernel timer ticks: scan every outstanding
/// request, and for any that have been unanswered longer than its mount's
/// current per-try timeout, bump its timeout count and mark it for resend.
fn tick() {
    for req in REGISTRY.snapshot() {
        if req.flags().contains(crate::registry::RequestFlags::BUSY) {
            continue;
        }
        let Some(mount) = req.mount.upgrade() else {
            continue;
        };
        req.set_busy(true);

        let maxtime =
            crate::rto::RtoEstimator::maxtime(!mount.is_soft(), false, req.timeout_count.load(Ordering::Relaxed));
        let per_try = mount.rto.lock().timeout_for_try(
            req.class,
            false,
            req.timeout_count.load(Ordering::Relaxed),
            maxtime,
        );

        if req.created.elapsed() >= per_try {
            let count = req.timeout_count.fetch_add(1, Ordering::AcqRel) + 1;
            mount.note_timeout();
            debug!(xid = req.xid, count, "request timed out, queuing for resend");
            mount.resend_queue.lock().push_back(req.xid);

            if mount.is_soft() && count > mount.config.retry {
                REGISTRY.remove(req.xid);
                warn!(xid = req.xid, "soft mount giving up after retry budget exhausted");
                req.fulfill(Err(crate::error::TransportError::Transient(
                    "soft mount retry budget exhausted",
                )));
            }
        }

        req.set_busy(false);
    }
}

/// Per-mount worker (§4.6 "Per-mount worker"): owns reconnect and the
/// resend-queue flush for one mount. Runs until the mount is soft-
/// terminated and its refcount drops to zero.
pub async fn run_mount_worker(state: Arc<MountState>, connector: Arc<dyn Connector>, prog: u32, vers: u32) {
    loop {
        if state.flags().contains(SocketFlags::SOFTTERM) {
            return;
        }

        let needs_reconnect = state.socket.lock().await.is_none();
        if needs_reconnect {
            if let Err(e) = reconnect(&state, connector.as_ref(), prog, vers).await {
                warn!(error = %e, "reconnect attempt failed, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        }

        flush_resend_queue(&state).await;
        check_dead_server(&state);

        tokio::time::sleep(TICK_INTERVAL).await;
    }
}

async fn reconnect(
    state: &Arc<MountState>,
    connector: &dyn Connector,
    prog: u32,
    vers: u32,
) -> Result<(), crate::error::TransportError> {
    state.set_flags(SocketFlags::CONNECTING, SocketFlags::empty());
    let outcome = connect_search(
        connector,
        state,
        prog,
        vers,
        vers,
        state.auth.as_ref(),
        TransportPolicy::StreamThenDgram,
    )
    .await;
    let result = match outcome {
        Ok(outcome) => {
            *state.socket.lock().await = Some(outcome.socket);
            state.set_flags(SocketFlags::CONNECTED, SocketFlags::CONNECTING | SocketFlags::DEAD);
            info!(vers = outcome.negotiated_vers, "mount reconnected");
            // Every outstanding request must be resent on the new
            // connection (§4.6 "Timer" step 7 / "reconnect").
            for req in REGISTRY.snapshot_for_mount(&Arc::downgrade(state)) {
                state.resend_queue.lock().push_back(req.xid);
            }
            Ok(())
        }
        Err(e) => {
            state.set_flags(SocketFlags::empty(), SocketFlags::CONNECTING);
            Err(e)
        }
    };
    state.flags_changed.notify_waiters();
    result
}

/// Drains XIDs queued for resend, retransmitting each one's last-sent
/// record over the (now reconnected) socket via the normal send engine
/// (§4.6 "Per-mount worker" resend flush).
async fn flush_resend_queue(state: &Arc<MountState>) {
    let xids: Vec<u32> = {
        let mut queue = state.resend_queue.lock();
        std::mem::take(&mut *queue).into()
    };
    for xid in xids {
        let Some(req) = REGISTRY.get(xid) else {
            continue;
        };
        let record = req.record();
        if record.is_empty() {
            continue;
        }
        match crate::send::send_request(state, req.class, &record, true).await {
            Ok(_) => debug!(xid, "resent queued request"),
            Err(e) => warn!(xid, error = %e, "resend attempt failed"),
        }
    }
}

/// Dead-server detection (§4.6): once a mount has gone unanswered for
/// longer than its dead timeout, mark it `DEAD` so callers can fail fast
/// instead of hanging on a soft-terminated-looking server.
fn check_dead_server(state: &MountState) {
    let timeouts = state.timeouts_since_reply.load(Ordering::Relaxed);
    if timeouts == 0 {
        return;
    }
    let elapsed = Duration::from_secs(u64::from(timeouts)) * 500 / 1000;
    let dead_after = dead_timeout(&state.config, false);
    if elapsed >= dead_after && !state.flags().contains(SocketFlags::DEAD) {
        warn!("mount declared dead after sustained unresponsiveness");
        state.set_flags(SocketFlags::DEAD, SocketFlags::empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoneAuth;
    use crate::config::MountConfig;

    #[test]
    fn check_dead_server_is_noop_with_no_timeouts() {
        let state = MountState::new(MountConfig::default(), Arc::new(NoneAuth), vec![]);
        check_dead_server(&state);
        assert!(!state.flags().contains(SocketFlags::DEAD));
    }

    #[tokio::test]
    async fn resend_queue_drains_fully() {
        let state = Arc::new(MountState::new(MountConfig::default(), Arc::new(NoneAuth), vec![]));
        state.resend_queue.lock().push_back(1);
        state.resend_queue.lock().push_back(2);
        // Neither xid is a live request, so each lookup is a no-op; what's
        // under test here is that the queue itself is fully drained either
        // way, not that the resend actually goes out.
        flush_resend_queue(&state).await;
        assert!(state.resend_queue.lock().is_empty());
    }
}
