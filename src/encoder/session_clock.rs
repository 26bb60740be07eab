//! Shared presentation-time baseline
//!
//! Every pump of a recording session measures presentation timestamps from
//! the same baseline so audio and video stay in sync. The baseline is set at
//! most once per session and cleared only by a full stop.

use crate::utils::clock::{MonotonicClock, SystemClock};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct SessionClock {
    baseline_us: Mutex<Option<i64>>,
    clock: Arc<dyn MonotonicClock>,
}

impl SessionClock {
    pub fn new(clock: Arc<dyn MonotonicClock>) -> Self {
        Self {
            baseline_us: Mutex::new(None),
            clock,
        }
    }

    /// Set the baseline to now unless it is already set; returns the baseline
    pub fn establish(&self) -> i64 {
        let mut baseline = self.baseline_us.lock();
        match *baseline {
            Some(value) => value,
            None => {
                let value = self.clock.now_us();
                *baseline = Some(value);
                tracing::debug!("Session baseline established at {}us", value);
                value
            }
        }
    }

    pub fn baseline(&self) -> Option<i64> {
        *self.baseline_us.lock()
    }

    pub fn clear(&self) {
        *self.baseline_us.lock() = None;
    }

    pub fn now_us(&self) -> i64 {
        self.clock.now_us()
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for SessionClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClock")
            .field("baseline_us", &self.baseline())
            .finish()
    }
}
