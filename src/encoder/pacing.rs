//! Frame-rate pacing
//!
//! Throttles consumption of video frames to a target rate. Over-rate input
//! is not delayed and re-queued: the worker waits out the remaining interval
//! and fetches a fresh frame, discarding the one it held.

pub const DEFAULT_FPS: u32 = 30;

/// Tracks when the last frame was let through
#[derive(Debug, Clone)]
pub struct PacingLimiter {
    fps: u32,
    interval_ms: i64,
    last_emit_ms: i64,
}

impl PacingLimiter {
    pub fn new(fps: u32, now_ms: i64) -> Self {
        let fps = fps.max(1);
        Self {
            fps,
            interval_ms: 1000 / fps as i64,
            last_emit_ms: now_ms,
        }
    }

    /// Change the target rate and restart the interval from `now_ms`
    pub fn set_fps(&mut self, fps: u32, now_ms: i64) {
        *self = Self::new(fps, now_ms);
    }

    /// Milliseconds left before the next frame may be emitted
    ///
    /// Positive means the caller should wait; zero or negative means go.
    pub fn delay_before_next(&self, now_ms: i64) -> i64 {
        self.interval_ms - (now_ms - self.last_emit_ms)
    }

    /// Wait required for a frame whose fetch started at `fetch_started_ms`
    ///
    /// Time spent fetching is subtracted from the remaining interval.
    pub fn wait_after_fetch(&self, now_ms: i64, fetch_started_ms: i64) -> i64 {
        self.delay_before_next(now_ms) - (now_ms - fetch_started_ms)
    }

    pub fn mark_emitted(&mut self, at_ms: i64) {
        self.last_emit_ms = at_ms;
    }

    pub fn reset(&mut self, now_ms: i64) {
        self.last_emit_ms = now_ms;
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }
}

impl Default for PacingLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_FPS, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_fps() {
        assert_eq!(PacingLimiter::new(30, 0).interval_ms(), 33);
        assert_eq!(PacingLimiter::new(60, 0).interval_ms(), 16);
        // A zero rate is treated as one frame per second
        assert_eq!(PacingLimiter::new(0, 0).interval_ms(), 1000);
    }

    #[test]
    fn test_delay_before_next() {
        let mut limiter = PacingLimiter::new(25, 1_000);
        assert_eq!(limiter.delay_before_next(1_010), 30);
        assert_eq!(limiter.delay_before_next(1_040), 0);
        assert!(limiter.delay_before_next(1_100) < 0);

        limiter.mark_emitted(1_100);
        assert_eq!(limiter.delay_before_next(1_120), 20);
    }

    #[test]
    fn test_wait_after_fetch_subtracts_fetch_time() {
        let limiter = PacingLimiter::new(20, 1_000);
        // Instant fetch: the full remainder of the interval
        assert_eq!(limiter.wait_after_fetch(1_010, 1_010), 40);
        // A 10 ms fetch is taken off the remaining 40 ms
        assert_eq!(limiter.wait_after_fetch(1_010, 1_000), 30);
        assert_eq!(limiter.wait_after_fetch(1_040, 1_030), 0);
        assert!(limiter.wait_after_fetch(1_060, 1_030) < 0);
    }

    #[test]
    fn test_set_fps_restarts_interval() {
        let mut limiter = PacingLimiter::new(10, 0);
        limiter.set_fps(50, 500);
        assert_eq!(limiter.fps(), 50);
        assert_eq!(limiter.delay_before_next(500), 20);
    }
}
