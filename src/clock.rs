//! Wall-clock source for admission, TTL and retry arithmetic.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanosecond wall clock.
///
/// Every timestamp in this crate is an i64 of nanoseconds since the Unix
/// epoch, matching the wire metadata. The writer takes the source by
/// trait object so tests can drive the scan deterministically.
pub trait TimeSource: Send + Sync {
    fn now_nanos(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new(nanos: i64) -> Self {
        Self {
            nanos: AtomicI64::new(nanos),
        }
    }

    pub fn set(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::Release);
    }

    pub fn advance(&self, nanos: i64) {
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }
}

impl TimeSource for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
        assert!(a > 0);
    }

    #[test]
    fn manual_clock_is_settable() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_nanos(), 100);
        clock.advance(50);
        assert_eq!(clock.now_nanos(), 150);
        clock.set(10);
        assert_eq!(clock.now_nanos(), 10);
    }
}
