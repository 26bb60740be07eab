//! Monotonic time sources
//!
//! Capture timestamps, pacing and pause accounting all read the same
//! monotonic microsecond clock so their values can be compared directly.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

static ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Microseconds elapsed on the process-wide monotonic clock
pub fn monotonic_now_us() -> i64 {
    let origin = ORIGIN.get_or_init(Instant::now);
    origin.elapsed().as_micros() as i64
}

/// A monotonic time source in microseconds
pub trait MonotonicClock: Send + Sync {
    fn now_us(&self) -> i64;

    fn now_ms(&self) -> i64 {
        self.now_us() / 1000
    }
}

/// The process-wide monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
    fn now_us(&self) -> i64 {
        monotonic_now_us()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicI64,
}

impl ManualClock {
    pub fn new(start_us: i64) -> Self {
        Self {
            now_us: AtomicI64::new(start_us),
        }
    }

    pub fn set_us(&self, value: i64) {
        self.now_us.store(value, Ordering::SeqCst);
    }

    pub fn advance_us(&self, delta: i64) {
        self.now_us.fetch_add(delta, Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(5_000);
        assert_eq!(clock.now_ms(), 5);
        clock.advance_us(2_500);
        assert_eq!(clock.now_us(), 7_500);
        clock.set_us(1_000_000);
        assert_eq!(clock.now_ms(), 1_000);
    }
}
