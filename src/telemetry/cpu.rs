//! # CPU Utilization
//!
//! Busy percentage between two samples of the scheduler's cumulative
//! uptime and idle counters.
//!
//! `usage = 100 - (100 * idle_in_period / elapsed)`
//!
//! Integer arithmetic only; the result truncates.

use serde::Serialize;
use tracing::info;

use crate::host::clock::as_micros;
use crate::host::{Clock, CpuCounters, CpuStatsSource};

/// CPU figures for the interval between two samples (microseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuUsage {
    pub uptime_since_start_us: u64,
    pub elapsed_us: u64,
    pub up_time_in_period_us: u64,
    pub idle_time_in_period_us: u64,
    pub sleep_time_in_period_us: u64,
    pub deep_sleep_time_in_period_us: u64,
    /// Busy share of the interval, 0 to 100.
    pub usage_percent: u32,
}

#[derive(Debug, Clone, Copy)]
struct CpuSnapshot {
    counters: CpuCounters,
    taken_at: u64,
}

/// Tracks CPU usage between successive calls to [`sample`](Self::sample).
#[derive(Debug)]
pub struct CpuUtilizationTracker<S: CpuStatsSource, C: Clock> {
    source: S,
    clock: C,
    previous: Option<CpuSnapshot>,
}

impl<S: CpuStatsSource, C: Clock> CpuUtilizationTracker<S, C> {
    pub fn new(source: S, clock: C) -> Self {
        Self {
            source,
            clock,
            previous: None,
        }
    }

    /// Samples the counters and reports usage since the previous sample.
    ///
    /// Returns `None` on the first call, which only sets the baseline, and
    /// when no time elapsed since the previous sample. The stored snapshot is
    /// replaced in every case.
    pub fn sample(&mut self) -> Option<CpuUsage> {
        let current = CpuSnapshot {
            counters: self.source.cpu_stats(),
            taken_at: as_micros(self.clock.now()),
        };
        let previous = self.previous.replace(current);

        let Some(previous) = previous else {
            info!("Up time since start: {} msecs", current.counters.uptime / 1000);
            return None;
        };

        let elapsed = current.taken_at.saturating_sub(previous.taken_at);
        if elapsed == 0 {
            return None;
        }

        let (now, before) = (current.counters, previous.counters);
        let idle_in_period = now.idle_time.saturating_sub(before.idle_time);
        let busy_share = (idle_in_period.saturating_mul(100) / elapsed).min(100);
        let usage = CpuUsage {
            uptime_since_start_us: now.uptime,
            elapsed_us: elapsed,
            up_time_in_period_us: now.uptime.saturating_sub(before.uptime),
            idle_time_in_period_us: idle_in_period,
            sleep_time_in_period_us: now.sleep_time.saturating_sub(before.sleep_time),
            deep_sleep_time_in_period_us: now.deep_sleep_time.saturating_sub(before.deep_sleep_time),
            usage_percent: 100 - busy_share as u32,
        };

        info!("Up time since start: {} msecs", usage.uptime_since_start_us / 1000);
        info!("Up time in period: {} msecs", usage.up_time_in_period_us / 1000);
        info!("Idle time in period: {} msecs", usage.idle_time_in_period_us / 1000);
        info!("Usage in period: {} %", usage.usage_percent);

        Some(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ManualClock, MockCpuStatsSource};
    use mockall::Sequence;
    use std::sync::Arc;
    use std::time::Duration;

    fn counters(uptime: u64, idle_time: u64) -> CpuCounters {
        CpuCounters {
            uptime,
            idle_time,
            ..CpuCounters::default()
        }
    }

    fn source_with(samples: Vec<CpuCounters>) -> MockCpuStatsSource {
        let mut source = MockCpuStatsSource::new();
        let mut seq = Sequence::new();
        for sample in samples {
            source
                .expect_cpu_stats()
                .times(1)
                .in_sequence(&mut seq)
                .return_const(sample);
        }
        source
    }

    #[test]
    fn test_first_sample_sets_baseline() {
        let clock = Arc::new(ManualClock::new());
        clock.set(Duration::from_secs(1));
        let mut tracker = CpuUtilizationTracker::new(source_with(vec![counters(1_000_000, 900_000)]), clock);

        assert_eq!(tracker.sample(), None);
    }

    #[test]
    fn test_usage_over_one_second() {
        let clock = Arc::new(ManualClock::new());
        let source = source_with(vec![
            counters(2_000_000, 1_000_000),
            counters(3_000_000, 1_250_000),
        ]);
        let mut tracker = CpuUtilizationTracker::new(source, Arc::clone(&clock));

        clock.set(Duration::from_secs(2));
        assert_eq!(tracker.sample(), None);

        clock.set(Duration::from_secs(3));
        let usage = tracker.sample().unwrap();
        assert_eq!(usage.usage_percent, 75);
        assert_eq!(usage.elapsed_us, 1_000_000);
        assert_eq!(usage.up_time_in_period_us, 1_000_000);
        assert_eq!(usage.idle_time_in_period_us, 250_000);
        assert_eq!(usage.uptime_since_start_us, 3_000_000);
    }

    #[test]
    fn test_zero_elapsed_suppresses_percentage() {
        let clock = Arc::new(ManualClock::new());
        clock.set(Duration::from_millis(500));
        let source = source_with(vec![
            counters(500_000, 100_000),
            counters(500_000, 100_000),
            counters(1_500_000, 1_100_000),
        ]);
        let mut tracker = CpuUtilizationTracker::new(source, Arc::clone(&clock));

        assert_eq!(tracker.sample(), None);
        assert_eq!(tracker.sample(), None);

        // Baseline was still replaced by the zero-elapsed sample
        clock.advance(Duration::from_secs(1));
        let usage = tracker.sample().unwrap();
        assert_eq!(usage.usage_percent, 0);
    }

    #[test]
    fn test_truncating_arithmetic() {
        let clock = Arc::new(ManualClock::new());
        let source = source_with(vec![counters(0, 0), counters(3, 1)]);
        let mut tracker = CpuUtilizationTracker::new(source, Arc::clone(&clock));

        tracker.sample();
        clock.advance(Duration::from_micros(3));
        // 100 * 1 / 3 = 33 -> 67
        assert_eq!(tracker.sample().unwrap().usage_percent, 67);
    }

    #[test]
    fn test_idle_exceeding_elapsed_saturates_at_zero() {
        let clock = Arc::new(ManualClock::new());
        let source = source_with(vec![counters(0, 0), counters(1_000, 2_000)]);
        let mut tracker = CpuUtilizationTracker::new(source, Arc::clone(&clock));

        tracker.sample();
        clock.advance(Duration::from_micros(1_000));
        assert_eq!(tracker.sample().unwrap().usage_percent, 0);
    }

    #[test]
    fn test_sleep_deltas_reported() {
        let clock = Arc::new(ManualClock::new());
        let before = CpuCounters { uptime: 0, idle_time: 0, sleep_time: 100, deep_sleep_time: 10 };
        let after = CpuCounters { uptime: 1_000, idle_time: 500, sleep_time: 400, deep_sleep_time: 60 };
        let mut tracker = CpuUtilizationTracker::new(source_with(vec![before, after]), Arc::clone(&clock));

        tracker.sample();
        clock.advance(Duration::from_micros(1_000));
        let usage = tracker.sample().unwrap();
        assert_eq!(usage.sleep_time_in_period_us, 300);
        assert_eq!(usage.deep_sleep_time_in_period_us, 50);
        assert_eq!(usage.usage_percent, 50);
    }
}
