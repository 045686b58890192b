//! Per-mount shared state (§3 "Mount"), the hub every other module reaches
//! through. Held behind an `Arc` by the public [`crate::mount::Mount`]
//! handle and its worker task; [`crate::registry::Request`] only ever holds
//! a `Weak` back-reference to it, breaking the reference cycle the source
//! avoids by using a raw, non-owning pointer (§9 "Cyclic references").

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::auth::AuthProvider;
use crate::config::MountConfig;
use crate::cwnd::CongestionWindow;
use crate::rto::RtoEstimator;
use crate::socket::CandidateSocket;

bitflags::bitflags! {
    /// The socket flag word (§3, §4.1/§4.6): bits other modules test to
    /// decide whether a send/reconnect/teardown may proceed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SocketFlags: u32 {
        /// A connect/reconnect is in progress; senders must wait.
        const CONNECTING   = 1 << 0;
        /// The socket is usable for sends.
        const CONNECTED    = 1 << 1;
        /// The mount is being torn down; new requests are refused.
        const SOFTTERM     = 1 << 2;
        /// NFSv4 (or similar) state recovery is in progress.
        const RECOVER      = 1 << 3;
        /// The dead-server heuristic has fired for this mount.
        const DEAD         = 1 << 4;
    }
}

/// Location list cursor (§4.2 "Multi-homed servers"): which address in a
/// server's address list the connect search should try next.
#[derive(Debug, Default)]
pub struct LocationCursor {
    addrs: Vec<SocketAddr>,
    next: usize,
}

impl LocationCursor {
    #[must_use]
    pub const fn new(addrs: Vec<SocketAddr>) -> Self {
        Self { addrs, next: 0 }
    }

    #[must_use]
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Round-robins through the address list, starting after whichever
    /// address last failed.
    pub fn advance(&mut self) -> Option<SocketAddr> {
        if self.addrs.is_empty() {
            return None;
        }
        let addr = self.addrs[self.next % self.addrs.len()];
        self.next = (self.next + 1) % self.addrs.len();
        Some(addr)
    }
}

/// Shared, mutable per-mount state.
pub struct MountState {
    pub config: MountConfig,
    pub auth: Arc<dyn AuthProvider>,
    pub locations: SyncMutex<LocationCursor>,

    /// The live candidate socket, if connected. `None` while a reconnect is
    /// in flight. Guarded by an async mutex because holding it spans actual
    /// `.await` points (send/recv), unlike the other, purely-synchronous
    /// fields below.
    pub socket: AsyncMutex<Option<CandidateSocket>>,
    /// Serializes sends onto [`Self::socket`] (§4.4 "Send lock"): only one
    /// task may be mid-`sosend` at a time.
    pub send_lock: AsyncMutex<()>,

    pub flags: AtomicU32,
    /// Woken whenever [`Self::flags`] changes, so waiters blocked on
    /// `CONNECTING` or `RECOVER` clearing don't have to poll.
    pub flags_changed: Notify,

    pub rto: SyncMutex<RtoEstimator>,
    pub cwnd: SyncMutex<CongestionWindow>,
    /// Woken whenever [`Self::cwnd`] gains room, so senders parked in
    /// [`crate::send::send_request`] waiting for window don't have to poll.
    pub cwnd_room: Notify,

    /// XIDs of requests queued to resend once the next reconnect completes
    /// (§4.6 "Timer" step 7, "Per-mount worker").
    pub resend_queue: SyncMutex<VecDeque<u32>>,

    /// Outstanding references to this mount (handle clones + in-flight
    /// requests); the worker task exits once this drops to zero and
    /// [`SocketFlags::SOFTTERM`] is set.
    pub refcount: AtomicU64,

    /// Monotonic tick counter bumped by the timer each pass it finds this
    /// mount unresponsive, reset on any reply (§4.6 "Dead-server detection").
    pub timeouts_since_reply: AtomicU32,
}

impl MountState {
    #[must_use]
    pub fn new(config: MountConfig, auth: Arc<dyn AuthProvider>, addrs: Vec<SocketAddr>) -> Self {
        let rto = RtoEstimator::new(config.timeo);
        Self {
            locations: SyncMutex::new(LocationCursor::new(addrs)),
            socket: AsyncMutex::new(None),
            send_lock: AsyncMutex::new(()),
            flags: AtomicU32::new(0),
            flags_changed: Notify::new(),
            rto: SyncMutex::new(rto),
            cwnd: SyncMutex::new(CongestionWindow::new()),
            cwnd_room: Notify::new(),
            resend_queue: SyncMutex::new(VecDeque::new()),
            refcount: AtomicU64::new(1),
            timeouts_since_reply: AtomicU32::new(0),
            config,
            auth,
        }
    }

    #[must_use]
    pub fn flags(&self) -> SocketFlags {
        SocketFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, set: SocketFlags, clear: SocketFlags) {
        self.flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let mut f = SocketFlags::from_bits_truncate(bits);
                f.insert(set);
                f.remove(clear);
                Some(f.bits())
            })
            .ok();
        self.flags_changed.notify_waiters();
    }

    #[must_use]
    pub const fn is_soft(&self) -> bool {
        self.config.flags.soft
    }

    pub fn note_reply_received(&self) {
        self.timeouts_since_reply.store(0, Ordering::Relaxed);
    }

    pub fn note_timeout(&self) -> u32 {
        self.timeouts_since_reply.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_cursor_round_robins() {
        let a1: SocketAddr = "127.0.0.1:2049".parse().unwrap();
        let a2: SocketAddr = "127.0.0.2:2049".parse().unwrap();
        let mut cursor = LocationCursor::new(vec![a1, a2]);
        assert_eq!(cursor.advance(), Some(a1));
        assert_eq!(cursor.advance(), Some(a2));
        assert_eq!(cursor.advance(), Some(a1));
    }

    #[test]
    fn empty_location_cursor_yields_none() {
        let mut cursor = LocationCursor::new(vec![]);
        assert_eq!(cursor.advance(), None);
    }

    #[test]
    fn set_flags_inserts_and_clears() {
        let config = MountConfig::default();
        let state = MountState::new(config, Arc::new(crate::auth::NoneAuth), vec![]);
        state.set_flags(SocketFlags::CONNECTING, SocketFlags::empty());
        assert!(state.flags().contains(SocketFlags::CONNECTING));
        state.set_flags(SocketFlags::CONNECTED, SocketFlags::CONNECTING);
        let f = state.flags();
        assert!(f.contains(SocketFlags::CONNECTED));
        assert!(!f.contains(SocketFlags::CONNECTING));
    }
}
