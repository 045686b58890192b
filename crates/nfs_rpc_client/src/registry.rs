//! The process-wide request registry (§4.3, §9 "Global tables").
//!
//! Every outstanding RPC gets one [`Request`] here, keyed by XID, from the
//! moment it's assigned an XID until a reply matches it or it's abandoned.
//! Grounded on `nfs3_server::transaction_tracker::TransactionTracker`'s
//! XID-keyed table, generalized from "track duplicates on the server side"
//! to "match replies and drive retransmission on the client side".

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::rto::ProcClass;
use crate::state::MountState;
use crate::wire::OpaqueAuth;

/// A successfully matched reply: the server's verifier (for
/// [`crate::auth::AuthProvider::verify_reply`]) plus the opaque procedure
/// result.
#[derive(Debug, Clone)]
pub struct RpcReply {
    pub verf: OpaqueAuth,
    pub body: Vec<u8>,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestFlags: u32 {
        /// Currently being inspected by the timer tick; the send/receive
        /// paths must not mutate it until this clears (§4.6 "busy/unbusy").
        const BUSY        = 1 << 0;
        /// At least one reply has already been received for this XID and a
        /// duplicate arrived; used only for diagnostics.
        const DUP_REPLY    = 1 << 1;
        /// The initial send for this try has completed; before this, a
        /// timer tick must not count it as an unanswered try.
        const SENT         = 1 << 2;
    }
}

/// One outstanding RPC's bookkeeping, shared between the caller awaiting its
/// reply, the send engine, the receive upcall, and the timer.
pub struct Request {
    pub xid: u32,
    pub class: ProcClass,
    /// Non-owning: a `Request` must never keep a mount alive, mirroring the
    /// source's use of a raw back-pointer instead of a refcounted one
    /// (§9 "Cyclic references").
    pub mount: Weak<MountState>,
    pub created: Instant,
    pub flags: AtomicU32,
    /// Number of retransmissions attempted so far (§4.6 step 5/8).
    pub timeout_count: AtomicU32,
    /// The fully framed record last sent for this request, kept around so
    /// the per-mount worker can retransmit it without the original caller's
    /// involvement (§4.6 "Per-mount worker" resend flush).
    record: SyncMutex<Vec<u8>>,
    reply: SyncMutex<Option<Result<RpcReply, TransportError>>>,
    notify: Notify,
}

impl Request {
    fn new(xid: u32, class: ProcClass, mount: Weak<MountState>) -> Self {
        Self {
            xid,
            class,
            mount,
            created: Instant::now(),
            flags: AtomicU32::new(0),
            timeout_count: AtomicU32::new(0),
            record: SyncMutex::new(Vec::new()),
            reply: SyncMutex::new(None),
            notify: Notify::new(),
        }
    }

    pub fn set_record(&self, bytes: Vec<u8>) {
        *self.record.lock() = bytes;
    }

    #[must_use]
    pub fn record(&self) -> Vec<u8> {
        self.record.lock().clone()
    }

    #[must_use]
    pub fn flags(&self) -> RequestFlags {
        RequestFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_busy(&self, busy: bool) {
        self.flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let mut f = RequestFlags::from_bits_truncate(bits);
                f.set(RequestFlags::BUSY, busy);
                Some(f.bits())
            })
            .ok();
    }

    /// Suspends the caller until a reply arrives or the request is
    /// abandoned by the registry (§4.3, §9 "suspension points").
    pub async fn wait(&self) -> Result<RpcReply, TransportError> {
        loop {
            if let Some(outcome) = self.reply.lock().take() {
                return outcome;
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn fulfill(&self, outcome: Result<RpcReply, TransportError>) {
        *self.reply.lock() = Some(outcome);
        self.notify.notify_waiters();
    }
}

/// The global registry. Lazily initialized, matching the source's
/// once-per-boot table rather than per-mount tables, since XIDs are
/// process-wide (§3 GLOSSARY).
pub static REGISTRY: Lazy<RequestRegistry> = Lazy::new(RequestRegistry::default);

#[derive(Default)]
pub struct RequestRegistry {
    inner: SyncMutex<Vec<Arc<Request>>>,
}

impl RequestRegistry {
    /// Registers a fresh request before it's ever sent, so a reply that
    /// races ahead of the sender's own bookkeeping still has somewhere to
    /// land (§4.3 "create before send").
    pub fn create(&self, xid: u32, class: ProcClass, mount: Weak<MountState>) -> Arc<Request> {
        let req = Arc::new(Request::new(xid, class, mount));
        self.inner.lock().push(Arc::clone(&req));
        req
    }

    /// Looks up a request without removing it, used by the resend flush to
    /// find the record to retransmit.
    #[must_use]
    pub fn get(&self, xid: u32) -> Option<Arc<Request>> {
        self.inner.lock().iter().find(|r| r.xid == xid).cloned()
    }

    /// Removes a request from the registry (normal completion, abandonment
    /// on soft-mount timeout, or forced unmount).
    pub fn remove(&self, xid: u32) -> Option<Arc<Request>> {
        let mut inner = self.inner.lock();
        let pos = inner.iter().position(|r| r.xid == xid)?;
        Some(inner.swap_remove(pos))
    }

    /// Matches an inbound reply (already classified as success or a
    /// protocol-level error) against its waiting [`Request`] and wakes the
    /// caller (§4.5 "reply matching", invariant 2: exactly one live request
    /// per XID).
    ///
    /// `is_dgram` tells us whether this reply came in over a DGRAM socket,
    /// so the matched request's cwnd charge (if any) can be released; a
    /// request that was retransmitted (`timeout_count > 0`) releases without
    /// growing the window and is never used to sample RTT, since the reply
    /// can't be attributed to a specific try (§4.3 "RTT update on reply").
    pub fn match_reply(&self, xid: u32, is_dgram: bool, outcome: Result<RpcReply, TransportError>) -> bool {
        let Some(req) = self.remove(xid) else {
            return false;
        };
        if let Some(mount) = req.mount.upgrade() {
            mount.note_reply_received();

            let retransmitted = req.timeout_count.load(Ordering::Relaxed) > 0;
            if is_dgram {
                {
                    let mut cwnd = mount.cwnd.lock();
                    if retransmitted {
                        cwnd.release();
                    } else {
                        cwnd.release_grow();
                    }
                }
                mount.cwnd_room.notify_waiters();
            }

            if !retransmitted && req.class.is_timing_eligible() {
                let ticks = crate::rto::duration_to_ticks(req.created.elapsed());
                mount.rto.lock().update(req.class, ticks);
            }
        }
        req.fulfill(outcome);
        true
    }

    /// Fails every outstanding request for one mount with the same error,
    /// used when a mount is force-unmounted or declared dead (§4.6
    /// "Dead-server detection").
    pub fn abandon_mount(&self, mount: &Weak<MountState>, error_for: impl Fn() -> TransportError) {
        let target = mount.as_ptr();
        let mut inner = self.inner.lock();
        inner.retain(|req| {
            if req.mount.as_ptr() == target {
                req.fulfill(Err(error_for()));
                false
            } else {
                true
            }
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Snapshots the currently outstanding requests for the timer to scan
    /// (§4.6 "Timer" step 1: "Acquire the request list").
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Request>> {
        self.inner.lock().clone()
    }

    /// Requests belonging to one mount only, used by the per-mount worker's
    /// reconnect/resend pass.
    #[must_use]
    pub fn snapshot_for_mount(&self, mount: &Weak<MountState>) -> Vec<Arc<Request>> {
        let target = mount.as_ptr();
        self.inner
            .lock()
            .iter()
            .filter(|r| r.mount.as_ptr() == target)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoneAuth;
    use crate::config::MountConfig;

    fn test_mount() -> Arc<MountState> {
        Arc::new(MountState::new(MountConfig::default(), Arc::new(NoneAuth), vec![]))
    }

    #[tokio::test]
    async fn create_then_match_reply_wakes_waiter() {
        let registry = RequestRegistry::default();
        let mount = test_mount();
        let req = registry.create(7, ProcClass::Getattr, Arc::downgrade(&mount));

        let waiter = tokio::spawn({
            let req = Arc::clone(&req);
            async move { req.wait().await }
        });
        tokio::task::yield_now().await;
        assert!(registry.match_reply(
            7,
            false,
            Ok(RpcReply {
                verf: OpaqueAuth::none(),
                body: vec![1, 2, 3]
            })
        ));
        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap().body, vec![1, 2, 3]);
    }

    #[test]
    fn unknown_xid_does_not_match() {
        let registry = RequestRegistry::default();
        assert!(!registry.match_reply(
            999,
            false,
            Ok(RpcReply {
                verf: OpaqueAuth::none(),
                body: vec![]
            })
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = RequestRegistry::default();
        let mount = test_mount();
        registry.create(1, ProcClass::Default, Arc::downgrade(&mount));
        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
    }

    #[tokio::test]
    async fn abandon_mount_fails_only_its_own_requests() {
        let registry = RequestRegistry::default();
        let mount_a = test_mount();
        let mount_b = test_mount();
        let req_a = registry.create(1, ProcClass::Default, Arc::downgrade(&mount_a));
        let req_b = registry.create(2, ProcClass::Default, Arc::downgrade(&mount_b));

        registry.abandon_mount(&Arc::downgrade(&mount_a), || TransportError::Restart);

        assert!(matches!(req_a.wait().await, Err(TransportError::Restart)));
        assert!(registry.match_reply(
            2,
            false,
            Ok(RpcReply {
                verf: OpaqueAuth::none(),
                body: vec![9]
            })
        ));
        assert_eq!(req_b.wait().await.unwrap().body, vec![9]);
    }

    #[test]
    fn match_reply_releases_dgram_cwnd_charge() {
        let registry = RequestRegistry::default();
        let mount = test_mount();
        mount.cwnd.lock().charge();
        let req = registry.create(1, ProcClass::Getattr, Arc::downgrade(&mount));
        req.set_record(vec![0]);

        assert!(registry.match_reply(
            1,
            true,
            Ok(RpcReply {
                verf: OpaqueAuth::none(),
                body: vec![]
            })
        ));
        assert_eq!(mount.cwnd.lock().sent(), 0);
    }

    #[test]
    fn match_reply_retransmitted_request_releases_without_growing_cwnd() {
        let registry = RequestRegistry::default();
        let mount = test_mount();
        mount.cwnd.lock().charge();
        let req = registry.create(1, ProcClass::Getattr, Arc::downgrade(&mount));
        req.timeout_count.fetch_add(1, Ordering::Relaxed);
        let cwnd_before = mount.cwnd.lock().cwnd();

        assert!(registry.match_reply(
            1,
            true,
            Ok(RpcReply {
                verf: OpaqueAuth::none(),
                body: vec![]
            })
        ));
        assert_eq!(mount.cwnd.lock().sent(), 0);
        assert_eq!(mount.cwnd.lock().cwnd(), cwnd_before);
    }

    #[test]
    fn match_reply_samples_rto_for_timing_eligible_class() {
        let registry = RequestRegistry::default();
        let mount = test_mount();
        registry.create(1, ProcClass::Getattr, Arc::downgrade(&mount));

        assert!(registry.match_reply(
            1,
            false,
            Ok(RpcReply {
                verf: OpaqueAuth::none(),
                body: vec![]
            })
        ));
        assert!(mount.rto.lock().rto_ticks(ProcClass::Getattr).is_some());
    }

    #[test]
    fn snapshot_for_mount_filters_by_mount() {
        let registry = RequestRegistry::default();
        let mount_a = test_mount();
        let mount_b = test_mount();
        registry.create(1, ProcClass::Default, Arc::downgrade(&mount_a));
        registry.create(2, ProcClass::Default, Arc::downgrade(&mount_b));
        let only_a = registry.snapshot_for_mount(&Arc::downgrade(&mount_a));
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].xid, 1);
    }
}
