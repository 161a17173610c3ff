//! # Task Telemetry
//!
//! Running averages of the invocation period and execution time of each
//! application task.
//!
//! ## Running average
//!
//! No sample history is kept. With `n` samples already folded into `avg`,
//! a new sample updates it as:
//!
//! `avg' = (avg * n + sample) / (n + 1)`
//!
//! The period and execution time of one invocation share the same `n`, and
//! `n` is incremented once afterwards. All values are whole microseconds and
//! divisions truncate.
//!
//! ## Invocation contract
//!
//! The first invocation of a slot only seeds its start-time baseline; the
//! second one produces the first period sample. Callers either pass the
//! start time explicitly at the end of the task body
//! ([`TaskTelemetry::record_invocation`]), or bracket the body with
//! [`TaskTelemetry::begin`] and [`TaskTelemetry::end`].
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rtos_telemetry::host::ManualClock;
//! use rtos_telemetry::telemetry::{TaskSlot, TaskTelemetry};
//!
//! let clock = Arc::new(ManualClock::new());
//! let telemetry = TaskTelemetry::new(Arc::clone(&clock));
//!
//! for _ in 0..3 {
//!     telemetry.begin(TaskSlot::Gear.index());
//!     clock.advance(Duration::from_micros(20));
//!     telemetry.end(TaskSlot::Gear.index());
//!     clock.advance(Duration::from_micros(80));
//! }
//!
//! assert_eq!(telemetry.period(TaskSlot::Gear.index()), Duration::from_micros(100));
//! assert_eq!(telemetry.execution_time(TaskSlot::Gear.index()), Duration::from_micros(20));
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::host::clock::as_micros;
use crate::host::Clock;

/// Number of task slots.
pub const TASK_SLOT_COUNT: usize = 6;

/// Application tasks tracked by [`TaskTelemetry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskSlot {
    Gear,
    Speed,
    Temperature,
    Reset,
    Display1,
    Display2,
}

impl TaskSlot {
    /// All slots in index order.
    pub const ALL: [TaskSlot; TASK_SLOT_COUNT] = [
        TaskSlot::Gear,
        TaskSlot::Speed,
        TaskSlot::Temperature,
        TaskSlot::Reset,
        TaskSlot::Display1,
        TaskSlot::Display2,
    ];

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Slot at `index`, or `None` if out of range.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Name used in diagnostic lines.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TaskSlot::Gear => "Gear",
            TaskSlot::Speed => "Speed",
            TaskSlot::Temperature => "Temperature",
            TaskSlot::Reset => "Reset",
            TaskSlot::Display1 => "Display(1)",
            TaskSlot::Display2 => "Display(2)",
        }
    }
}

impl From<TaskSlot> for usize {
    fn from(slot: TaskSlot) -> usize {
        slot.index()
    }
}

/// Copy of one slot's telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub slot: TaskSlot,
    /// Start time of the last observed invocation, `None` before the first.
    pub last_start_us: Option<u64>,
    pub average_period_us: u64,
    pub average_execution_us: u64,
    /// Number of samples folded into the averages.
    pub invocation_count: u32,
}

#[derive(Debug, Default)]
struct TaskRecord {
    last_start: Option<u64>,
    /// Start time recorded by `begin`, consumed by `end`.
    pending_start: Option<u64>,
    average_period: u64,
    average_execution: u64,
    invocation_count: u32,
}

/// Folds `sample` into an average of `count` samples.
fn running_average(average: u64, count: u32, sample: u64) -> u64 {
    let count = u128::from(count);
    let sum = u128::from(average) * count + u128::from(sample);
    u64::try_from(sum / (count + 1)).unwrap_or(u64::MAX)
}

/// Per-slot period and execution time tracker.
///
/// Each slot is locked independently, so tasks running on different threads
/// can record concurrently. A slot must only be written by its own task.
#[derive(Debug)]
pub struct TaskTelemetry<C: Clock> {
    clock: C,
    enabled: AtomicBool,
    records: [Mutex<TaskRecord>; TASK_SLOT_COUNT],
}

impl<C: Clock> TaskTelemetry<C> {
    /// Creates an enabled tracker with all slots zeroed.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            enabled: AtomicBool::new(true),
            records: std::array::from_fn(|_| Mutex::new(TaskRecord::default())),
        }
    }

    /// Turns aggregation and reporting on or off.
    ///
    /// While disabled, start times are still recorded so that the first
    /// invocation after re-enabling yields a valid period.
    pub fn enable(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Shared clock used for completion timestamps.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn record(&self, slot: usize) -> Option<MutexGuard<'_, TaskRecord>> {
        self.records
            .get(slot)
            .map(|record| record.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Records an invocation that started at `start` and completes now.
    ///
    /// Must be called at the end of the task body: the execution time is
    /// measured from `start` to the moment of this call. Out-of-range slots
    /// are ignored.
    ///
    /// # Arguments
    ///
    /// * `slot` - Task slot index (0 to [`TASK_SLOT_COUNT`] - 1)
    /// * `start` - Clock time at which this invocation started
    pub fn record_invocation(&self, slot: usize, start: Duration) {
        let end = self.clock.now();
        self.complete(slot, as_micros(start), as_micros(end));
    }

    /// Marks the start of an invocation and returns its timestamp.
    ///
    /// For an out-of-range slot nothing is stored.
    pub fn begin(&self, slot: usize) -> Duration {
        let now = self.clock.now();
        if let Some(mut record) = self.record(slot) {
            record.pending_start = Some(as_micros(now));
        }
        now
    }

    /// Completes the invocation started by the last [`begin`](Self::begin).
    ///
    /// Without a pending `begin` this is a no-op.
    pub fn end(&self, slot: usize) {
        let end = as_micros(self.clock.now());
        let pending = self.record(slot).and_then(|mut record| record.pending_start.take());
        if let Some(start) = pending {
            self.complete(slot, start, end);
        }
    }

    fn complete(&self, slot: usize, start: u64, end: u64) {
        let Some(mut record) = self.record(slot) else {
            return;
        };

        let Some(previous_start) = record.last_start.replace(start) else {
            return;
        };
        if !self.is_enabled() {
            return;
        }

        let period = start.saturating_sub(previous_start);
        let execution = end.saturating_sub(start);
        let count = record.invocation_count;
        record.average_period = running_average(record.average_period, count, period);
        record.average_execution = running_average(record.average_execution, count, execution);
        record.invocation_count = count.saturating_add(1);

        let (average_period, average_execution) = (record.average_period, record.average_execution);
        drop(record);

        if let Some(task) = TaskSlot::from_index(slot) {
            debug!(
                "{} task: period {} usecs execution time {} usecs start time {} usecs",
                task.name(),
                average_period,
                average_execution,
                start
            );
        }
    }

    /// Average period of a slot, zero if out of range or not yet measured.
    #[must_use]
    pub fn period(&self, slot: usize) -> Duration {
        self.record(slot)
            .map_or(Duration::ZERO, |record| Duration::from_micros(record.average_period))
    }

    /// Average execution time of a slot, zero if out of range or not yet measured.
    #[must_use]
    pub fn execution_time(&self, slot: usize) -> Duration {
        self.record(slot)
            .map_or(Duration::ZERO, |record| Duration::from_micros(record.average_execution))
    }

    #[must_use]
    pub fn invocation_count(&self, slot: usize) -> u32 {
        self.record(slot).map_or(0, |record| record.invocation_count)
    }

    /// Copy of a slot's record, `None` if out of range.
    #[must_use]
    pub fn stats(&self, slot: usize) -> Option<TaskStats> {
        let task = TaskSlot::from_index(slot)?;
        let record = self.record(slot)?;
        Some(TaskStats {
            slot: task,
            last_start_us: record.last_start,
            average_period_us: record.average_period,
            average_execution_us: record.average_execution,
            invocation_count: record.invocation_count,
        })
    }

    /// Records of all slots in index order.
    pub fn iter_stats(&self) -> impl Iterator<Item = TaskStats> + '_ {
        (0..TASK_SLOT_COUNT).filter_map(|slot| self.stats(slot))
    }
}
