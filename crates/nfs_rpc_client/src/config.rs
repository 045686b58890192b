//! Per-mount configuration knobs (§6.4).

use std::time::Duration;

/// Boolean mount flags recognized by the transport core.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountFlags {
    /// Soft mount: give up after [`MountConfig::retry`] retransmissions
    /// instead of retrying forever.
    pub soft: bool,
    /// Interruptible: suspension points observe signal/cancellation.
    pub intr: bool,
    /// Synthesize "connected" for DGRAM sockets instead of calling
    /// `connect`, so the peer address must be supplied on every send.
    pub noconnect: bool,
    /// Bind to a reserved (privileged) source port.
    pub resvport: bool,
    /// Issue `UMNT` on the MOUNT protocol when tearing the mount down.
    pub callumnt: bool,
    /// Force the MOUNT protocol itself onto UDP even if the data
    /// connection negotiates TCP.
    pub mntudp: bool,
    /// Treat `NFSERR_JUKEBOX` as a deferral rather than an error.
    pub mutejukebox: bool,
    /// Disable the NFSv4 callback channel.
    pub nocallback: bool,
    /// Ignore the RTO estimator and always use `timeo` (§4.6 step 5).
    pub dumbtimer: bool,
    /// May be declared dead more aggressively when idle (§4.6 "squishy").
    pub squishy: bool,
}

/// Per-request override: uninterruptible even if the mount is `INTR`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    pub nointr: bool,
}

/// Integer tuning knobs recognized per mount (§6.4).
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub flags: MountFlags,
    /// Static per-RPC timeout used when the RTO estimator has no sample yet
    /// or `dumbtimer` is set.
    pub timeo: Duration,
    /// Number of retransmissions before a soft mount gives up.
    pub retry: u32,
    pub max_vers: u32,
    pub min_vers: u32,
    /// Seconds of unresponsiveness before logging "not responding".
    pub tprintf_delay: Duration,
    pub tprintf_initial_delay: Duration,
    pub deadtimeout: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            flags: MountFlags::default(),
            timeo: Duration::from_secs(1),
            retry: 3,
            max_vers: 3,
            min_vers: 2,
            tprintf_delay: Duration::from_secs(12),
            tprintf_initial_delay: Duration::from_secs(12),
            deadtimeout: Duration::from_secs(0),
        }
    }
}

/// Socket-level timeouts (§4.1, §6.2): short for soft/squishy mounts, long
/// otherwise.
#[must_use]
pub fn socket_timeout(flags: MountFlags) -> Duration {
    if flags.soft || flags.squishy {
        Duration::from_secs(5)
    } else {
        Duration::from_secs(60)
    }
}

/// Dead-mount timeout (§4.6 "Dead-server detection", §6.2), squish-adjusted.
#[must_use]
pub fn dead_timeout(cfg: &MountConfig, quick: bool) -> Duration {
    if cfg.flags.squishy {
        if quick {
            Duration::from_secs(4)
        } else {
            Duration::from_secs(8)
        }
    } else if cfg.deadtimeout.is_zero() {
        Duration::from_secs(8)
    } else {
        cfg.deadtimeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_mount_uses_short_socket_timeout() {
        let flags = MountFlags {
            soft: true,
            ..Default::default()
        };
        assert_eq!(socket_timeout(flags), Duration::from_secs(5));
    }

    #[test]
    fn hard_mount_uses_long_socket_timeout() {
        assert_eq!(socket_timeout(MountFlags::default()), Duration::from_secs(60));
    }

    #[test]
    fn squishy_quick_dead_timeout_is_shortest() {
        let cfg = MountConfig {
            flags: MountFlags {
                squishy: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(dead_timeout(&cfg, true), Duration::from_secs(4));
        assert_eq!(dead_timeout(&cfg, false), Duration::from_secs(8));
    }
}
