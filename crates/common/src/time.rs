//! The `TimeSource` seam: every component that reads the wall clock does so
//! through this trait instead of calling `SystemTime::now()`/`Instant::now()`
//! directly, so tests can swap in a deterministic clock. The default is
//! always a fresh wall-clock reader — replacing one component's time source
//! never affects another's, and a newly constructed component always starts
//! out on wall-clock time unless the caller explicitly hands it something
//! else.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const SECONDS_PER_DAY: i64 = 86_400;

/// A source of "now", abstracted so it can be replaced in tests.
pub trait TimeSource: Send + Sync {
    /// Current time as seconds since the Unix epoch.
    fn now_unix(&self) -> i64;

    /// Current time as whole days since the Unix epoch (1970-01-01 UTC),
    /// matching the `u32` day-epoch fields used in on-disk records.
    fn now_day_epoch(&self) -> u32 {
        (self.now_unix() / SECONDS_PER_DAY).max(0) as u32
    }
}

/// The default time source: reads the real wall clock on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// Cloning a `ManualTimeSource` shares the same underlying counter (it is
/// backed by an `Arc<AtomicI64>`), so a clone handed to a component under
/// test can be advanced independently from the caller's handle.
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    unix_seconds: Arc<AtomicI64>,
}

impl ManualTimeSource {
    /// Start the clock at the given unix timestamp.
    pub fn starting_at(unix_seconds: i64) -> Self {
        ManualTimeSource {
            unix_seconds: Arc::new(AtomicI64::new(unix_seconds)),
        }
    }

    /// Start the clock at the real current wall-clock time.
    pub fn starting_now() -> Self {
        Self::starting_at(SystemTimeSource.now_unix())
    }

    /// Move the clock forward by `seconds`.
    pub fn advance(&self, seconds: i64) {
        self.unix_seconds.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Set the clock to an absolute unix timestamp.
    pub fn set(&self, unix_seconds: i64) {
        self.unix_seconds.store(unix_seconds, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_unix(&self) -> i64 {
        self.unix_seconds.load(Ordering::SeqCst)
    }
}

/// Convert a `SystemTime` to a day-epoch (whole days since 1970-01-01 UTC).
pub fn day_epoch(t: SystemTime) -> u32 {
    let secs = t
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    (secs / SECONDS_PER_DAY).max(0) as u32
}

/// Convert a day-epoch back to the `SystemTime` at the start of that day.
pub fn from_day_epoch(day: u32) -> SystemTime {
    UNIX_EPOCH + std::time::Duration::from_secs(day as u64 * SECONDS_PER_DAY as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualTimeSource::starting_at(0);
        assert_eq!(clock.now_day_epoch(), 0);
        clock.advance(SECONDS_PER_DAY * 3);
        assert_eq!(clock.now_day_epoch(), 3);
    }

    #[test]
    fn clones_share_state() {
        let clock = ManualTimeSource::starting_at(100);
        let clone = clock.clone();
        clone.advance(50);
        assert_eq!(clock.now_unix(), 150);
    }

    #[test]
    fn day_epoch_round_trips() {
        let day = 19723u32; // 2024-01-01
        let t = from_day_epoch(day);
        assert_eq!(day_epoch(t), day);
    }

    #[test]
    fn new_source_defaults_to_wall_clock() {
        let a = SystemTimeSource;
        let b = SystemTimeSource;
        assert!((a.now_unix() - b.now_unix()).abs() < 2);
    }
}
