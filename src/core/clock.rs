//! Time source and frame timer.
//!
//! The host calls `AnimatedPlayer::update()` from its render/event loop;
//! [`FrameTimer`] turns the time elapsed between calls into "a tick is due".
//! The clock is injectable so tests advance time by hand instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time since an arbitrary origin
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Duration) {
        self.nanos.store(to.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Accumulates elapsed time and reports when the current frame is used up.
///
/// At most one tick per poll: after a long stall the leftover time is capped
/// at one interval instead of replaying every missed frame at once.
#[derive(Debug, Clone, Default)]
pub struct FrameTimer {
    last: Option<Duration>,
    accumulated: Duration,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget elapsed time (start/resume/seek)
    pub fn reset(&mut self, now: Duration) {
        self.last = Some(now);
        self.accumulated = Duration::ZERO;
    }

    /// Stop measuring until the next `reset()` or `poll()`
    pub fn halt(&mut self) {
        self.last = None;
        self.accumulated = Duration::ZERO;
    }

    /// True if `frame_duration / rate` has elapsed since the last tick.
    ///
    /// Rate 0 never ticks; time spent at rate 0 is discarded. So slow a rate
    /// that the interval does not fit a `Duration` counts as 0.
    pub fn poll(&mut self, now: Duration, frame_duration: Duration, rate: f64) -> bool {
        let Some(last) = self.last else {
            self.reset(now);
            return false;
        };
        self.last = Some(now);

        if rate <= 0.0 || !rate.is_finite() {
            self.accumulated = Duration::ZERO;
            return false;
        }

        let Ok(interval) = Duration::try_from_secs_f64(frame_duration.as_secs_f64() / rate) else {
            self.accumulated = Duration::ZERO;
            return false;
        };
        self.accumulated += now.saturating_sub(last);
        if self.accumulated < interval {
            return false;
        }

        self.accumulated -= interval;
        if self.accumulated > interval {
            self.accumulated = interval;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(100);

    #[test]
    fn test_first_poll_only_starts_timer() {
        let mut timer = FrameTimer::new();
        assert!(!timer.poll(Duration::from_secs(5), FRAME, 1.0));
        assert!(timer.poll(Duration::from_millis(5100), FRAME, 1.0));
    }

    #[test]
    fn test_rate_scales_interval() {
        let mut timer = FrameTimer::new();
        timer.reset(Duration::ZERO);
        // 2x: 50ms per frame
        assert!(!timer.poll(Duration::from_millis(40), FRAME, 2.0));
        assert!(timer.poll(Duration::from_millis(50), FRAME, 2.0));
        // 0.5x: 200ms per frame
        assert!(!timer.poll(Duration::from_millis(150), FRAME, 0.5));
        assert!(timer.poll(Duration::from_millis(250), FRAME, 0.5));
    }

    #[test]
    fn test_zero_rate_never_ticks() {
        let mut timer = FrameTimer::new();
        timer.reset(Duration::ZERO);
        assert!(!timer.poll(Duration::from_secs(10), FRAME, 0.0));
        // Time spent paused at rate 0 does not burst out later
        assert!(!timer.poll(Duration::from_millis(10_050), FRAME, 1.0));
        assert!(timer.poll(Duration::from_millis(10_100), FRAME, 1.0));
    }

    #[test]
    fn test_tiny_rate_never_ticks() {
        let mut timer = FrameTimer::new();
        timer.reset(Duration::ZERO);
        assert!(!timer.poll(Duration::from_millis(16), FRAME, 1e-25));
        assert!(!timer.poll(Duration::from_secs(3600), FRAME, 1e-25));
        // Back to normal speed without a burst
        assert!(!timer.poll(Duration::from_millis(3_600_050), FRAME, 1.0));
        assert!(timer.poll(Duration::from_millis(3_600_100), FRAME, 1.0));
    }

    #[test]
    fn test_stall_is_capped() {
        let mut timer = FrameTimer::new();
        timer.reset(Duration::ZERO);
        assert!(timer.poll(Duration::from_secs(10), FRAME, 1.0));
        assert!(timer.poll(Duration::from_secs(10), FRAME, 1.0));
        assert!(!timer.poll(Duration::from_secs(10), FRAME, 1.0));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(30));
        clock.advance(Duration::from_millis(20));
        assert_eq!(clock.now(), Duration::from_millis(50));
        clock.set(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(1));
    }
}
