//! # Host Module
//!
//! Capability traits for everything the telemetry core needs from the host
//! scheduler, plus the counter types they exchange.
//!
//! This module handles:
//! - The shared monotonic clock ([`Clock`])
//! - Cumulative CPU uptime/idle counters ([`CpuStatsSource`])
//! - Heap, stack and per-thread statistics ([`MemoryStatsSource`])
//! - Live thread enumeration for the runtime memory map ([`ThreadEnumerator`])
//!
//! The telemetry core never touches host memory layouts directly; a port to
//! a real RTOS only has to implement these traits.

pub mod clock;
pub mod simulated;

pub use clock::{ManualClock, MonotonicClock};
pub use simulated::SimulatedHost;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Mask applied to the raw scheduler state byte before decoding.
pub const THREAD_STATE_MASK: u8 = 0x0F;

/// Monotonic elapsed-time source with microsecond resolution.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was started.
    fn now(&self) -> Duration;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Cumulative CPU time counters reported by the scheduler (microseconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuCounters {
    /// Time since the scheduler started.
    pub uptime: u64,
    /// Time spent in the idle thread.
    pub idle_time: u64,
    /// Time spent in sleep mode.
    pub sleep_time: u64,
    /// Time spent in deep sleep mode.
    pub deep_sleep_time: u64,
}

/// Source of cumulative CPU counters.
#[cfg_attr(test, mockall::automock)]
pub trait CpuStatsSource: Send + Sync {
    fn cpu_stats(&self) -> CpuCounters;
}

impl<T: CpuStatsSource + ?Sized> CpuStatsSource for Arc<T> {
    fn cpu_stats(&self) -> CpuCounters {
        (**self).cpu_stats()
    }
}

/// Heap allocation counters (bytes unless noted).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    /// Bytes allocated currently.
    pub current_size: u32,
    /// Max bytes allocated at a given time.
    pub max_size: u32,
    /// Cumulative sum of bytes ever allocated.
    pub total_size: u32,
    /// Bytes reserved for the heap.
    pub reserved_size: u32,
    /// Current number of allocations.
    pub alloc_count: u32,
    /// Number of failed allocations.
    pub alloc_fail_count: u32,
}

/// Stack usage counters, either global or for one thread.
///
/// `thread_id` is zero for the global (cumulative) entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StackStats {
    pub thread_id: u32,
    /// High-water mark in bytes.
    pub max_size: u32,
    /// Bytes reserved for the stack.
    pub reserved_size: u32,
    /// Number of stacks accumulated in this entry.
    pub stack_count: u32,
}

/// Scheduling information for one thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThreadInfo {
    pub id: u32,
    pub name: &'static str,
    /// Raw scheduler state byte, see [`ThreadState::from_raw`].
    pub state: u8,
    pub priority: u32,
    pub stack_size: u32,
    /// Free stack bytes remaining.
    pub stack_space: u32,
}

/// Source of heap, stack and thread statistics.
///
/// The `*_each` methods fill `out` from the front and return how many
/// entries were written, never more than `out.len()`.
#[cfg_attr(test, mockall::automock)]
pub trait MemoryStatsSource: Send + Sync {
    fn heap_stats(&self) -> HeapStats;

    /// Cumulative stack statistics over all threads.
    fn stack_stats(&self) -> StackStats;

    fn stack_stats_each(&self, out: &mut [StackStats]) -> usize;

    fn thread_stats_each(&self, out: &mut [ThreadInfo]) -> usize;
}

impl<T: MemoryStatsSource + ?Sized> MemoryStatsSource for Arc<T> {
    fn heap_stats(&self) -> HeapStats {
        (**self).heap_stats()
    }

    fn stack_stats(&self) -> StackStats {
        (**self).stack_stats()
    }

    fn stack_stats_each(&self, out: &mut [StackStats]) -> usize {
        (**self).stack_stats_each(out)
    }

    fn thread_stats_each(&self, out: &mut [ThreadInfo]) -> usize {
        (**self).thread_stats_each(out)
    }
}

/// Structural description of a live thread, as seen in its control block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThreadDescriptor {
    pub name: &'static str,
    pub stack_start: usize,
    pub stack_size: u32,
    pub priority: u8,
    /// Raw scheduler state byte.
    pub state: u8,
}

/// A contiguous memory region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryRegion {
    pub start: usize,
    pub size: u32,
}

impl MemoryRegion {
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.size as usize
    }
}

/// Enumerates live threads and the static memory regions.
#[cfg_attr(test, mockall::automock)]
pub trait ThreadEnumerator: Send + Sync {
    /// Fills `out` with live threads and returns the number written.
    fn enumerate_threads(&self, out: &mut [ThreadDescriptor]) -> usize;

    fn heap_region(&self) -> MemoryRegion;

    /// Interrupt (main) stack region.
    fn isr_stack_region(&self) -> MemoryRegion;
}

impl<T: ThreadEnumerator + ?Sized> ThreadEnumerator for Arc<T> {
    fn enumerate_threads(&self, out: &mut [ThreadDescriptor]) -> usize {
        (**self).enumerate_threads(out)
    }

    fn heap_region(&self) -> MemoryRegion {
        (**self).heap_region()
    }

    fn isr_stack_region(&self) -> MemoryRegion {
        (**self).isr_stack_region()
    }
}

/// Closed set of thread scheduling states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ThreadState {
    Inactive,
    Ready,
    Running,
    Blocked,
    Terminated,
    #[default]
    Unknown,
}

impl ThreadState {
    /// Decodes a raw scheduler state byte.
    ///
    /// Only the low nibble carries the state; the upper bits hold the
    /// blocking reason and are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtos_telemetry::host::ThreadState;
    ///
    /// assert_eq!(ThreadState::from_raw(0x02), ThreadState::Running);
    /// assert_eq!(ThreadState::from_raw(0x33), ThreadState::Blocked);
    /// assert_eq!(ThreadState::from_raw(0x0A), ThreadState::Unknown);
    /// ```
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        match raw & THREAD_STATE_MASK {
            0 => ThreadState::Inactive,
            1 => ThreadState::Ready,
            2 => ThreadState::Running,
            3 => ThreadState::Blocked,
            4 => ThreadState::Terminated,
            _ => ThreadState::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadState::Inactive => "Inactive",
            ThreadState::Ready => "Ready",
            ThreadState::Running => "Running",
            ThreadState::Blocked => "Blocked",
            ThreadState::Terminated => "Terminated",
            ThreadState::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_state_decoding() {
        assert_eq!(ThreadState::from_raw(0), ThreadState::Inactive);
        assert_eq!(ThreadState::from_raw(1), ThreadState::Ready);
        assert_eq!(ThreadState::from_raw(2), ThreadState::Running);
        assert_eq!(ThreadState::from_raw(3), ThreadState::Blocked);
        assert_eq!(ThreadState::from_raw(4), ThreadState::Terminated);
        assert_eq!(ThreadState::from_raw(5), ThreadState::Unknown);
        assert_eq!(ThreadState::from_raw(0xFF), ThreadState::Unknown);
    }

    #[test]
    fn test_thread_state_ignores_upper_bits() {
        // Blocked with a delay reason in the upper nibble
        assert_eq!(ThreadState::from_raw(0x13), ThreadState::Blocked);
        assert_eq!(ThreadState::from_raw(0x41), ThreadState::Ready);
    }

    #[test]
    fn test_thread_state_display() {
        assert_eq!(ThreadState::Running.to_string(), "Running");
        assert_eq!(ThreadState::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_memory_region_end() {
        let region = MemoryRegion { start: 0x2000_0000, size: 0x1000 };
        assert_eq!(region.end(), 0x2000_1000);
    }

    #[test]
    fn test_arc_clock_forwards() {
        let clock = Arc::new(ManualClock::new());
        clock.advance(Duration::from_micros(42));
        let shared: Arc<ManualClock> = Arc::clone(&clock);
        assert_eq!(shared.now(), Duration::from_micros(42));
    }
}
