//! Wall-clock representation and an injectable clock source.
//!
//! Durations and instants are both represented as plain milliseconds so the
//! closed wire schema (SPEC_FULL.md §6.2) serializes them as integers rather
//! than as nested structs.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WallClockMs(u64);

impl WallClockMs {
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, other: WallClockMs) -> DurationMs {
        DurationMs::from_millis(self.0.saturating_sub(other.0))
    }
}

impl From<SystemTime> for WallClockMs {
    fn from(t: SystemTime) -> Self {
        let millis = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        Self(millis)
    }
}

/// A duration expressed as plain milliseconds, matching the `DurationMs`
/// wire-level type convention used across this workspace's event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurationMs(u64);

impl DurationMs {
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub fn to_std(self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl From<Duration> for DurationMs {
    fn from(d: Duration) -> Self {
        Self(d.as_millis() as u64)
    }
}

/// Abstracts the wall-clock source so tests can inject deterministic time
/// instead of reading `SystemTime::now()` directly.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> WallClockMs;
}

/// The production clock, backed by `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> WallClockMs {
        WallClockMs::from(SystemTime::now())
    }
}

/// A fixed clock for deterministic tests; advances only when told to.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl FixedClock {
    pub fn at(ms: u64) -> Self {
        Self {
            now: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(ms)),
        }
    }

    pub fn advance(&self, by: DurationMs) {
        self.now
            .fetch_add(by.as_millis(), std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> WallClockMs {
        WallClockMs::from_millis(self.now.load(std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_round_trips_through_std() {
        let d = DurationMs::from_secs(30);
        assert_eq!(d.to_std(), Duration::from_secs(30));
    }

    #[test]
    fn fixed_clock_advances_deterministically() {
        let clock = FixedClock::at(1_000);
        assert_eq!(clock.now_ms().as_millis(), 1_000);
        clock.advance(DurationMs::from_millis(500));
        assert_eq!(clock.now_ms().as_millis(), 1_500);
    }

    #[test]
    fn wall_clock_sub_is_saturating() {
        let a = WallClockMs::from_millis(100);
        let b = WallClockMs::from_millis(200);
        assert_eq!(a.saturating_sub(b).as_millis(), 0);
        assert_eq!(b.saturating_sub(a).as_millis(), 100);
    }
}
