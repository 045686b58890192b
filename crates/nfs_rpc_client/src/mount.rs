//! The public API (§3 "Mount", §4 overview): a cheap-to-clone handle tying
//! the registry, socket lifecycle, connect search, send engine, receive
//! upcalls, and timer/reconnect worker together behind one `call` entry
//! point.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::AuthProvider;
use crate::config::MountConfig;
use crate::error::Error;
use crate::net::Connector;
use crate::registry::REGISTRY;
use crate::rto::ProcClass;
use crate::search::{connect_search, TransportPolicy};
use crate::state::{MountState, SocketFlags};
use crate::timer::{ensure_timer_running, run_mount_worker};
use crate::wire::{self, CallHeader};
use crate::xid::XID;

/// A handle to one established NFS mount's RPC transport. Cheaply
/// `Clone`-able; the underlying mount tears down once the last clone (and
/// every request derived from it) is dropped.
#[derive(Clone)]
pub struct Mount {
    inner: Arc<MountInner>,
}

struct MountInner {
    state: Arc<MountState>,
    prog: u32,
    worker: tokio::task::JoinHandle<()>,
}

impl Drop for MountInner {
    fn drop(&mut self) {
        self.state.set_flags(SocketFlags::SOFTTERM, SocketFlags::empty());
        self.worker.abort();
        REGISTRY.abandon_mount(&Arc::downgrade(&self.state), || {
            crate::error::TransportError::Interrupted
        });
    }
}

impl Mount {
    /// Establishes a mount: runs the connect search once synchronously so
    /// the caller learns immediately whether any candidate answered, then
    /// hands reconnection duties to the per-mount worker (§4.6).
    pub async fn connect(
        addrs: Vec<SocketAddr>,
        prog: u32,
        min_vers: u32,
        max_vers: u32,
        auth: Arc<dyn AuthProvider>,
        config: MountConfig,
        connector: Arc<dyn Connector>,
        policy: TransportPolicy,
    ) -> Result<(Self, u32), Error> {
        let state = Arc::new(MountState::new(config, auth, addrs));
        state.set_flags(SocketFlags::CONNECTING, SocketFlags::empty());

        let outcome = connect_search(
            connector.as_ref(),
            &state,
            prog,
            min_vers,
            max_vers,
            state.auth.as_ref(),
            policy,
        )
        .await
        .map_err(Error::from)?;

        let negotiated_vers = outcome.negotiated_vers;
        *state.socket.lock().await = Some(outcome.socket);
        state.set_flags(SocketFlags::CONNECTED, SocketFlags::CONNECTING);
        info!(vers = negotiated_vers, "mount established");

        let worker_state = Arc::clone(&state);
        let worker = tokio::spawn(run_mount_worker(worker_state, connector, prog, negotiated_vers));

        let mount = Self {
            inner: Arc::new(MountInner {
                state,
                prog,
                worker,
            }),
        };
        Ok((mount, negotiated_vers))
    }

    /// Issues one RPC and awaits its reply (§4 overview, the caller-facing
    /// operation everything else in this crate exists to support).
    ///
    /// `args` must already be an XDR-packed, opaque argument blob; the
    /// returned bytes are the equally opaque procedure result, with the
    /// reply envelope already stripped off.
    pub async fn call(&self, vers: u32, proc: u32, class: ProcClass, args: &[u8]) -> Result<Vec<u8>, Error> {
        let state = &self.inner.state;
        if state.flags().contains(SocketFlags::SOFTTERM) {
            return Err(Error::Interrupted);
        }

        let xid = XID.next_xid32();
        let req = REGISTRY.create(xid, class, Arc::downgrade(state));
        ensure_timer_running();

        let header = CallHeader {
            xid,
            prog: self.inner.prog,
            vers,
            proc,
            cred: state.auth.build_credential(),
            verf: state.auth.build_verifier(),
        };
        let record = wire::pack_call_record(&header, args).map_err(Error::from)?;
        req.set_record(record.clone());

        if let Err(e) = crate::send::send_request(state, class, &record, false).await {
            REGISTRY.remove(xid);
            return Err(e.into());
        }

        // `intr` (§6.4) maps onto async cancellation rather than a polled
        // signal flag: an interruptible caller simply drops this future
        // (e.g. via `tokio::select!` against its own cancellation token),
        // which is the idiomatic equivalent of the source unblocking a
        // sleeping thread on signal delivery.
        match req.wait().await {
            Ok(reply) => {
                if !state.auth.verify_reply(&reply.verf) {
                    return Err(Error::EAuth);
                }
                Ok(reply.body)
            }
            Err(e) => {
                warn!(xid, error = %e, "call failed");
                Err(e.into())
            }
        }
    }

    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.inner.state.flags().contains(SocketFlags::DEAD)
    }

    #[must_use]
    pub fn is_soft_terminated(&self) -> bool {
        self.inner.state.flags().contains(SocketFlags::SOFTTERM)
    }

    /// Forces an orderly teardown ahead of the last clone being dropped
    /// (e.g. on `umount`): refuses new calls and abandons any outstanding
    /// ones immediately rather than waiting out their timeouts.
    pub fn shutdown(&self) {
        self.inner.state.set_flags(SocketFlags::SOFTTERM, SocketFlags::empty());
        REGISTRY.abandon_mount(&Arc::downgrade(&self.inner.state), || {
            crate::error::TransportError::Interrupted
        });
    }
}
