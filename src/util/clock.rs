//! Wall-clock access for suspend timestamps and timeout checks.
//!
//! Timeouts are measured on the wall clock, not a monotonic one. A clock that
//! jumps backwards must be observable, because the lock-wait monitor releases
//! a waiter whose elapsed wait time comes out negative.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, signed so that differences can go negative.
pub type TimestampMs = i64;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// A system clock set before the epoch reads as a negative value.
#[must_use]
pub fn now_ms() -> TimestampMs {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> TimestampMs;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        now_ms()
    }
}

/// A manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start_ms`.
    #[must_use]
    pub const fn new(start_ms: TimestampMs) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    /// Move the clock by `delta_ms`; negative values simulate a rollback.
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Set the clock to an absolute reading.
    pub fn set(&self, now_ms: TimestampMs) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> TimestampMs {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_epoch() {
        assert!(SystemClock.now_ms() > 0);
    }

    #[test]
    fn test_manual_clock_rollback() {
        let clock = ManualClock::new(10_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 10_500);
        clock.advance(-2_000);
        assert_eq!(clock.now_ms(), 8_500);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }
}
