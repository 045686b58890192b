//! Per-mount RTO (retransmission timeout) estimator (§4.3 "RTT update").
//!
//! A small SRTT/SDRTT pair is kept per procedure class so that, e.g., a slow
//! `WRITE` doesn't inflate the timeout used for a cheap `GETATTR`.

use std::time::Duration;

/// Classifies a procedure number into one of the five RTT buckets the
/// source keeps separate estimators for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ProcClass {
    Default = 0,
    Getattr = 1,
    Lookup = 2,
    Read = 3,
    Write = 4,
}

impl ProcClass {
    /// `GETATTR`/`LOOKUP` use the coarser `(S=2, ROUND=3)` scaling, `READ`/
    /// `WRITE` the finer `(S=3, ROUND=7)`; class 0 (anything else, e.g.
    /// `NULL`) is not timing-eligible at all (§4.3).
    const fn scale(self) -> Option<(u32, u32)> {
        match self {
            Self::Default => None,
            Self::Getattr | Self::Lookup => Some((2, 3)),
            Self::Read | Self::Write => Some((3, 7)),
        }
    }

    #[must_use]
    pub const fn is_timing_eligible(self) -> bool {
        !matches!(self, Self::Default)
    }
}

const NUM_CLASSES: usize = 5;

/// Backoff multiplier table indexed by the mount's saturating timeout
/// counter (§4.6, §6.2).
pub const BACKOFF: [u32; 8] = [2, 4, 8, 16, 32, 64, 128, 256];

const MIN_TIMEO: Duration = Duration::from_millis(62); // floor: 62.5ms, rounded down
const NFS_MINTIMEO: Duration = Duration::from_millis(800);
const NFS_MAXTIMEO: Duration = Duration::from_secs(60);
/// `NULL` pings during GSS context setup get a short, fixed timeout rather
/// than an RTO derived from a class with no samples (§4.6).
pub const MIN_IDEM_TIMEO: Duration = Duration::from_millis(500);

/// SRTT/SDRTT estimator for one mount, per [`ProcClass`].
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    srtt: [i32; NUM_CLASSES],
    sdrtt: [i32; NUM_CLASSES],
    sampled: [bool; NUM_CLASSES],
    /// When set, every class uses the mount's static `timeo` regardless of
    /// samples (§4.6 `DUMBTIMER`).
    pub dumb_timer: bool,
    pub static_timeo: Duration,
}

impl RtoEstimator {
    #[must_use]
    pub const fn new(static_timeo: Duration) -> Self {
        Self {
            srtt: [0; NUM_CLASSES],
            sdrtt: [0; NUM_CLASSES],
            sampled: [false; NUM_CLASSES],
            dumb_timer: false,
            static_timeo,
        }
    }

    /// Folds one observed round-trip (in integer NFS_HZ ticks, as the
    /// source represents it) into the class's estimator.
    pub fn update(&mut self, class: ProcClass, rtt_ticks: i32) {
        let Some(_) = class.scale() else { return };
        let idx = class as usize;
        let srtt = self.srtt[idx];
        let t1 = rtt_ticks + 1 - (srtt >> 3);
        self.srtt[idx] = srtt + t1;
        self.sdrtt[idx] += t1.abs() - (self.sdrtt[idx] >> 2);
        self.sampled[idx] = true;
    }

    /// Computes `RTO(class)` in ticks, or `None` if the mount's static
    /// timeout should be used instead (dumb timer, or no samples yet).
    #[must_use]
    pub fn rto_ticks(&self, class: ProcClass) -> Option<i32> {
        if self.dumb_timer {
            return None;
        }
        let (s, round) = class.scale()?;
        let idx = class as usize;
        if !self.sampled[idx] {
            return None;
        }
        Some(((self.srtt[idx] + round as i32) >> s) + self.sdrtt[idx] + 1)
    }

    /// §4.6 step 5: the full per-try timeout computation, including
    /// backoff and the `[62.5ms, maxtime]` clamp.
    #[must_use]
    pub fn timeout_for_try(
        &self,
        class: ProcClass,
        is_gss_null: bool,
        timeout_count: u32,
        maxtime: Duration,
    ) -> Duration {
        let base = if is_gss_null {
            MIN_IDEM_TIMEO
        } else {
            match self.rto_ticks(class) {
                Some(ticks) if ticks > 0 => ticks_to_duration(ticks),
                _ => self.static_timeo,
            }
        };
        let idx = (timeout_count as usize).min(BACKOFF.len() - 1);
        let backed_off = base * BACKOFF[idx];
        backed_off.clamp(MIN_TIMEO, maxtime.max(MIN_TIMEO))
    }

    /// §4.6 step 4.
    #[must_use]
    pub fn maxtime(hard_mount: bool, setup_or_recover: bool, timeouts: u32) -> Duration {
        if hard_mount && !setup_or_recover {
            return NFS_MAXTIMEO;
        }
        let by_timeouts = NFS_MAXTIMEO / (timeouts + 1) / 2;
        let floor = NFS_MINTIMEO / 4;
        by_timeouts.max(floor)
    }
}

/// NFS_HZ: ticks per second used to convert the source's integer tick
/// arithmetic to [`Duration`].
const NFS_HZ: u32 = 100;

fn ticks_to_duration(ticks: i32) -> Duration {
    Duration::from_millis(u64::from(ticks.max(0) as u32) * 1000 / u64::from(NFS_HZ) as u64)
}

/// Converts a measured round-trip into NFS_HZ ticks for
/// [`RtoEstimator::update`] (§4.3 "RTT update").
#[must_use]
pub fn duration_to_ticks(d: Duration) -> i32 {
    i32::try_from(d.as_millis() * u128::from(NFS_HZ) / 1000).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_class_never_samples() {
        let mut est = RtoEstimator::new(Duration::from_secs(1));
        est.update(ProcClass::Default, 50);
        assert_eq!(est.rto_ticks(ProcClass::Default), None);
    }

    #[test]
    fn getattr_class_samples_and_converges() {
        let mut est = RtoEstimator::new(Duration::from_secs(1));
        for _ in 0..10 {
            est.update(ProcClass::Getattr, 20);
        }
        let rto = est.rto_ticks(ProcClass::Getattr).unwrap();
        assert!(rto > 0);
    }

    #[test]
    fn backoff_is_monotonic_until_capped() {
        let est = RtoEstimator::new(Duration::from_millis(500));
        let maxtime = Duration::from_secs(10);
        let mut last = Duration::ZERO;
        for count in 0..8 {
            let t = est.timeout_for_try(ProcClass::Default, false, count, maxtime);
            assert!(t >= last, "backoff must not decrease");
            last = t;
        }
    }

    #[test]
    fn timeout_is_capped_by_maxtime() {
        let est = RtoEstimator::new(Duration::from_secs(100));
        let maxtime = Duration::from_secs(5);
        let t = est.timeout_for_try(ProcClass::Default, false, 7, maxtime);
        assert_eq!(t, maxtime);
    }

    #[test]
    fn gss_null_uses_fixed_timeout() {
        let est = RtoEstimator::new(Duration::from_secs(5));
        let t = est.timeout_for_try(ProcClass::Default, true, 0, Duration::from_secs(30));
        assert_eq!(t, MIN_IDEM_TIMEO * BACKOFF[0]);
    }
}
