//! Monotonic clock implementations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::Clock;

/// Wall clock backed by [`Instant`], started at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    started: Instant,
}

impl MonotonicClock {
    #[must_use]
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::start()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Clock that only moves when told to.
///
/// Used by tests and by [`SimulatedHost`](super::SimulatedHost) to produce
/// reproducible timestamps.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rtos_telemetry::host::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_micros(250));
/// assert_eq!(clock.now(), Duration::from_micros(250));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the absolute time. Going backwards is ignored.
    pub fn set(&self, now: Duration) {
        self.micros.fetch_max(as_micros(now), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(as_micros(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

/// Whole microseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn as_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_starts_at_zero() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn test_manual_clock_advance_and_set() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_micros(100));
        clock.advance(Duration::from_micros(50));
        assert_eq!(clock.now(), Duration::from_micros(150));

        clock.set(Duration::from_millis(1));
        assert_eq!(clock.now(), Duration::from_micros(1000));
    }

    #[test]
    fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::new();
        clock.set(Duration::from_micros(500));
        clock.set(Duration::from_micros(200));
        assert_eq!(clock.now(), Duration::from_micros(500));
    }

    #[test]
    fn test_monotonic_clock_is_non_decreasing() {
        let clock = MonotonicClock::start();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn test_as_micros_truncates_nanos() {
        assert_eq!(as_micros(Duration::from_nanos(1_999)), 1);
    }
}
