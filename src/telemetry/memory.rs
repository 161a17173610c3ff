//! # Memory Telemetry
//!
//! Heap counters, stack high-water marks and thread scheduling state.
//!
//! Three reports are available:
//! - [`MemoryTelemetry::snapshot_and_report_diffs`]: increases since the
//!   previous snapshot, zero deltas suppressed
//! - [`MemoryTelemetry::snapshot_and_report_absolute`]: every current value
//! - [`MemoryTelemetry::report_runtime_memory_map`]: stack ranges of live
//!   threads plus heap and interrupt stack regions
//!
//! The stored snapshot starts zeroed, so the first diff reports every
//! counter that is already above zero.

use serde::Serialize;
use tracing::debug;

use super::thread_table::ThreadTable;
use crate::host::{
    HeapStats, MemoryRegion, MemoryStatsSource, StackStats, ThreadDescriptor, ThreadEnumerator,
    ThreadInfo, ThreadState,
};

/// Heap, stack and thread counters captured at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub heap: HeapStats,
    pub global_stack: StackStats,
    pub thread_stacks: ThreadTable<StackStats>,
    pub threads: ThreadTable<ThreadInfo>,
}

impl MemorySnapshot {
    /// Name of a thread in this snapshot, if known.
    #[must_use]
    pub fn thread_name(&self, thread_id: u32) -> Option<&'static str> {
        self.threads.iter().find(|t| t.id == thread_id).map(|t| t.name)
    }
}

/// Stack high-water mark increase of one thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThreadStackDelta {
    pub thread_id: u32,
    pub name: Option<&'static str>,
    pub increase: u32,
    pub max_size: u32,
    pub reserved_size: u32,
}

/// Increases observed between two snapshots. `None` means unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryDiff {
    pub heap_current_increase: Option<u32>,
    pub heap_max_increase: Option<u32>,
    pub stack_max_increase: Option<u32>,
    pub stack_count_increase: Option<u32>,
    pub thread_stacks: ThreadTable<ThreadStackDelta>,
}

impl MemoryDiff {
    /// True when nothing increased.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap_current_increase.is_none()
            && self.heap_max_increase.is_none()
            && self.stack_max_increase.is_none()
            && self.stack_count_increase.is_none()
            && self.thread_stacks.is_empty()
    }
}

/// One live thread in the runtime memory map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThreadMapEntry {
    pub name: &'static str,
    pub stack_start: usize,
    pub stack_end: usize,
    pub stack_size: u32,
    pub priority: u8,
    pub state: ThreadState,
}

/// Point-in-time layout of thread stacks, heap and interrupt stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryMap {
    pub threads: ThreadTable<ThreadMapEntry>,
    pub heap: MemoryRegion,
    pub isr_stack: MemoryRegion,
}

/// Positive difference of a counter, `None` when it did not grow.
fn increase(new: u32, old: u32) -> Option<u32> {
    new.checked_sub(old).filter(|delta| *delta > 0)
}

/// Builds the runtime memory map from a thread enumerator.
pub fn runtime_memory_map<E: ThreadEnumerator + ?Sized>(enumerator: &E) -> MemoryMap {
    let mut descriptors = ThreadTable::<ThreadDescriptor>::new();
    descriptors.fill_with(|buf| enumerator.enumerate_threads(buf));

    let mut map = MemoryMap {
        threads: ThreadTable::new(),
        heap: enumerator.heap_region(),
        isr_stack: enumerator.isr_stack_region(),
    };
    for thread in &descriptors {
        map.threads.push(ThreadMapEntry {
            name: thread.name,
            stack_start: thread.stack_start,
            stack_end: thread.stack_start + thread.stack_size as usize,
            stack_size: thread.stack_size,
            priority: thread.priority,
            state: ThreadState::from_raw(thread.state),
        });
    }
    map
}

/// Snapshot-based memory telemetry over a host statistics source.
#[derive(Debug)]
pub struct MemoryTelemetry<H: MemoryStatsSource> {
    host: H,
    snapshot: MemorySnapshot,
}

impl<H: MemoryStatsSource> MemoryTelemetry<H> {
    /// Creates the tracker with a zeroed snapshot.
    pub fn new(host: H) -> Self {
        Self {
            host,
            snapshot: MemorySnapshot::default(),
        }
    }

    /// Last stored snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &MemorySnapshot {
        &self.snapshot
    }

    fn sample(&self) -> MemorySnapshot {
        let mut snapshot = MemorySnapshot {
            heap: self.host.heap_stats(),
            global_stack: self.host.stack_stats(),
            ..MemorySnapshot::default()
        };
        snapshot.thread_stacks.fill_with(|buf| self.host.stack_stats_each(buf));
        snapshot.threads.fill_with(|buf| self.host.thread_stats_each(buf));
        snapshot
    }

    /// Samples the host and reports counters that increased since the
    /// previous snapshot.
    ///
    /// Per-thread stack entries are matched by thread id; threads absent
    /// from the previous snapshot are stored without a delta.
    pub fn snapshot_and_report_diffs(&mut self) -> MemoryDiff {
        let current = self.sample();
        let previous = std::mem::replace(&mut self.snapshot, current);

        let mut diff = MemoryDiff {
            heap_current_increase: increase(current.heap.current_size, previous.heap.current_size),
            heap_max_increase: increase(current.heap.max_size, previous.heap.max_size),
            stack_max_increase: increase(current.global_stack.max_size, previous.global_stack.max_size),
            stack_count_increase: increase(current.global_stack.stack_count, previous.global_stack.stack_count),
            thread_stacks: ThreadTable::new(),
        };

        debug!("MemoryStats (Heap):");
        if let Some(delta) = diff.heap_current_increase {
            debug!("\tBytes allocated increased by {} to {} bytes", delta, current.heap.current_size);
        }
        if let Some(delta) = diff.heap_max_increase {
            debug!(
                "\tMax bytes allocated at a given time increased by {} to {} bytes (max heap size is {} bytes)",
                delta, current.heap.max_size, current.heap.reserved_size
            );
        }

        debug!("Cumulative Stack Info:");
        if let Some(delta) = diff.stack_max_increase {
            debug!(
                "\tMaximum number of bytes used on the stack increased by {} to {} bytes (stack size is {} bytes)",
                delta, current.global_stack.max_size, current.global_stack.reserved_size
            );
        }
        if let Some(delta) = diff.stack_count_increase {
            debug!(
                "\tNumber of stacks stats accumulated increased by {} to {}",
                delta, current.global_stack.stack_count
            );
        }

        debug!("Thread Stack Info:");
        for stack in &current.thread_stacks {
            let Some(old) = previous.thread_stacks.iter().find(|old| old.thread_id == stack.thread_id) else {
                continue;
            };
            let Some(delta) = increase(stack.max_size, old.max_size) else {
                continue;
            };
            let name = current.thread_name(stack.thread_id);
            debug!("\t\tThread Id: 0x{:08x} with name {}", stack.thread_id, name.unwrap_or("?"));
            debug!(
                "\t\tMaximum number of bytes used on the stack increased by {} to {} bytes (stack size is {} bytes)",
                delta, stack.max_size, stack.reserved_size
            );
            diff.thread_stacks.push(ThreadStackDelta {
                thread_id: stack.thread_id,
                name,
                increase: delta,
                max_size: stack.max_size,
                reserved_size: stack.reserved_size,
            });
        }

        diff
    }

    /// Samples the host and reports every absolute value.
    pub fn snapshot_and_report_absolute(&mut self) -> MemorySnapshot {
        self.snapshot = self.sample();
        let snapshot = self.snapshot;

        let heap = &snapshot.heap;
        debug!("MemoryStats (Heap):");
        debug!("\tBytes allocated currently: {}", heap.current_size);
        debug!("\tMax bytes allocated at a given time: {}", heap.max_size);
        debug!("\tCumulative sum of bytes ever allocated: {}", heap.total_size);
        debug!("\tCurrent number of bytes allocated for the heap: {}", heap.reserved_size);
        debug!("\tCurrent number of allocations: {}", heap.alloc_count);
        debug!("\tNumber of failed allocations: {}", heap.alloc_fail_count);

        let stack = &snapshot.global_stack;
        debug!("Cumulative Stack Info:");
        debug!("\tMaximum number of bytes used on the stack: {}", stack.max_size);
        debug!("\tCurrent number of bytes allocated for the stack: {}", stack.reserved_size);
        debug!("\tNumber of stacks stats accumulated in the structure: {}", stack.stack_count);

        debug!("Thread Stack Info:");
        for (index, stack) in snapshot.thread_stacks.iter().enumerate() {
            debug!("\tThread: {}", index);
            debug!(
                "\t\tThread Id: 0x{:08x} with name {}",
                stack.thread_id,
                snapshot.thread_name(stack.thread_id).unwrap_or("?")
            );
            debug!("\t\tMaximum number of bytes used on the stack: {}", stack.max_size);
            debug!("\t\tCurrent number of bytes allocated for the stack: {}", stack.reserved_size);
        }

        debug!("Thread Info:");
        for (index, thread) in snapshot.threads.iter().enumerate() {
            debug!("\tThread: {}", index);
            debug!(
                "\t\tThread Id: 0x{:08x} with name {}, state {}, priority {}",
                thread.id,
                thread.name,
                ThreadState::from_raw(thread.state),
                thread.priority
            );
            debug!(
                "\t\tStack size {} (free bytes remaining {})",
                thread.stack_size, thread.stack_space
            );
        }

        snapshot
    }
}

impl<H: MemoryStatsSource + ThreadEnumerator> MemoryTelemetry<H> {
    /// Reports the stack range, size, priority and state of every live
    /// thread, then the heap and interrupt stack regions.
    pub fn report_runtime_memory_map(&self) -> MemoryMap {
        let map = runtime_memory_map(&self.host);

        debug!("Runtime Memory Map:");
        for thread in &map.threads {
            debug!(
                "\t thread with name {}, stack_start: {:#x}, stack_end: {:#x}, size: {}, priority: {}, state: {}",
                thread.name, thread.stack_start, thread.stack_end, thread.stack_size, thread.priority, thread.state
            );
        }
        debug!(
            "\t heap_start: {:#x}, heap_end: {:#x}, size: {}",
            map.heap.start,
            map.heap.end(),
            map.heap.size
        );
        debug!(
            "\t stack_isr_start: {:#x}, stack_isr_end: {:#x}, size: {}",
            map.isr_stack.start,
            map.isr_stack.end(),
            map.isr_stack.size
        );

        map
    }
}
