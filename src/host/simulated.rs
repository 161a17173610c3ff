//! # Simulated Host
//!
//! In-process stand-in for an RTOS statistics API.
//!
//! Counters only change through the mutation methods, so every snapshot is
//! reproducible. CPU time is derived from the attached clock and a
//! configurable idle ratio.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::clock::as_micros;
use super::{
    Clock, CpuCounters, CpuStatsSource, HeapStats, MemoryRegion, MemoryStatsSource, StackStats,
    ThreadDescriptor, ThreadEnumerator, ThreadInfo,
};

/// Heap region reported by the simulated target.
pub const SIM_HEAP_REGION: MemoryRegion = MemoryRegion { start: 0x2001_0000, size: 0x0002_0000 };

/// Interrupt stack region reported by the simulated target.
pub const SIM_ISR_STACK_REGION: MemoryRegion = MemoryRegion { start: 0x2003_f000, size: 0x1000 };

const FIRST_THREAD_ID: u32 = 0x2000_1000;
const THREAD_CONTROL_BLOCK_SIZE: u32 = 0x48;
const FIRST_STACK_ADDRESS: usize = 0x2000_4000;

/// Raw state bytes used by the simulated scheduler.
pub mod raw_state {
    pub const INACTIVE: u8 = 0x00;
    pub const READY: u8 = 0x01;
    pub const RUNNING: u8 = 0x02;
    pub const BLOCKED: u8 = 0x03;
    pub const TERMINATED: u8 = 0x04;
}

#[derive(Debug, Clone, Copy)]
struct SimThread {
    id: u32,
    name: &'static str,
    priority: u8,
    state: u8,
    stack_start: usize,
    stack_size: u32,
    stack_high_water: u32,
}

#[derive(Debug)]
struct SimState {
    heap: HeapStats,
    threads: Vec<SimThread>,
    next_id: u32,
    next_stack: usize,
}

/// Simulated scheduler implementing every host capability.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use rtos_telemetry::host::{ManualClock, MemoryStatsSource, SimulatedHost};
///
/// let host = SimulatedHost::new(Arc::new(ManualClock::new()), 4096);
/// assert!(host.allocate(1000));
/// assert_eq!(host.heap_stats().current_size, 1000);
/// ```
#[derive(Debug)]
pub struct SimulatedHost<C: Clock> {
    clock: C,
    /// Idle share of elapsed time, in per-mille.
    idle_permille: AtomicU32,
    state: Mutex<SimState>,
}

impl<C: Clock> SimulatedHost<C> {
    /// Creates a host with an empty heap of `heap_reserved` bytes and no threads.
    pub fn new(clock: C, heap_reserved: u32) -> Self {
        Self {
            clock,
            idle_permille: AtomicU32::new(1000),
            state: Mutex::new(SimState {
                heap: HeapStats { reserved_size: heap_reserved, ..HeapStats::default() },
                threads: Vec::new(),
                next_id: FIRST_THREAD_ID,
                next_stack: FIRST_STACK_ADDRESS,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the fraction of time spent idle (clamped to 0..=1000 per-mille).
    pub fn set_idle_permille(&self, permille: u32) {
        self.idle_permille.store(permille.min(1000), Ordering::Relaxed);
    }

    /// Creates a ready thread and returns its identifier.
    pub fn spawn_thread(&self, name: &'static str, priority: u8, stack_size: u32) -> u32 {
        let mut state = self.state();
        let id = state.next_id;
        let stack_start = state.next_stack;
        state.next_id += THREAD_CONTROL_BLOCK_SIZE;
        state.next_stack += stack_size as usize;
        state.threads.push(SimThread {
            id,
            name,
            priority,
            state: raw_state::READY,
            stack_start,
            stack_size,
            stack_high_water: 0,
        });
        id
    }

    /// Removes a thread. Unknown identifiers are ignored.
    pub fn exit_thread(&self, id: u32) {
        self.state().threads.retain(|t| t.id != id);
    }

    /// Sets the raw scheduler state byte of a thread.
    pub fn set_thread_state(&self, id: u32, raw: u8) {
        if let Some(thread) = self.state().threads.iter_mut().find(|t| t.id == id) {
            thread.state = raw;
        }
    }

    /// Records a stack depth reached by a thread; only raises the high-water mark.
    pub fn touch_stack(&self, id: u32, depth: u32) {
        if let Some(thread) = self.state().threads.iter_mut().find(|t| t.id == id) {
            thread.stack_high_water = thread.stack_high_water.max(depth.min(thread.stack_size));
        }
    }

    /// Allocates `bytes` from the heap. Returns `false` and counts a failure
    /// when the reserved size would be exceeded.
    pub fn allocate(&self, bytes: u32) -> bool {
        let mut state = self.state();
        let heap = &mut state.heap;
        match heap.current_size.checked_add(bytes) {
            Some(next) if next <= heap.reserved_size => {
                heap.current_size = next;
                heap.max_size = heap.max_size.max(next);
                heap.total_size = heap.total_size.saturating_add(bytes);
                heap.alloc_count += 1;
                true
            }
            _ => {
                heap.alloc_fail_count += 1;
                false
            }
        }
    }

    pub fn free(&self, bytes: u32) {
        let mut state = self.state();
        state.heap.current_size = state.heap.current_size.saturating_sub(bytes);
        state.heap.alloc_count = state.heap.alloc_count.saturating_sub(1);
    }

    /// Number of live threads.
    pub fn thread_count(&self) -> usize {
        self.state().threads.len()
    }
}

impl<C: Clock> CpuStatsSource for SimulatedHost<C> {
    fn cpu_stats(&self) -> CpuCounters {
        let uptime = as_micros(self.clock.now());
        let permille = u64::from(self.idle_permille.load(Ordering::Relaxed));
        CpuCounters {
            uptime,
            idle_time: uptime / 1000 * permille,
            sleep_time: 0,
            deep_sleep_time: 0,
        }
    }
}

impl<C: Clock> MemoryStatsSource for SimulatedHost<C> {
    fn heap_stats(&self) -> HeapStats {
        self.state().heap
    }

    fn stack_stats(&self) -> StackStats {
        let state = self.state();
        state.threads.iter().fold(StackStats::default(), |acc, t| StackStats {
            thread_id: 0,
            max_size: acc.max_size + t.stack_high_water,
            reserved_size: acc.reserved_size + t.stack_size,
            stack_count: acc.stack_count + 1,
        })
    }

    fn stack_stats_each(&self, out: &mut [StackStats]) -> usize {
        let state = self.state();
        let mut written = 0;
        for (slot, thread) in out.iter_mut().zip(&state.threads) {
            *slot = StackStats {
                thread_id: thread.id,
                max_size: thread.stack_high_water,
                reserved_size: thread.stack_size,
                stack_count: 1,
            };
            written += 1;
        }
        written
    }

    fn thread_stats_each(&self, out: &mut [ThreadInfo]) -> usize {
        let state = self.state();
        let mut written = 0;
        for (slot, thread) in out.iter_mut().zip(&state.threads) {
            *slot = ThreadInfo {
                id: thread.id,
                name: thread.name,
                state: thread.state,
                priority: u32::from(thread.priority),
                stack_size: thread.stack_size,
                stack_space: thread.stack_size - thread.stack_high_water,
            };
            written += 1;
        }
        written
    }
}

impl<C: Clock> ThreadEnumerator for SimulatedHost<C> {
    fn enumerate_threads(&self, out: &mut [ThreadDescriptor]) -> usize {
        let state = self.state();
        let mut written = 0;
        for (slot, thread) in out.iter_mut().zip(&state.threads) {
            *slot = ThreadDescriptor {
                name: thread.name,
                stack_start: thread.stack_start,
                stack_size: thread.stack_size,
                priority: thread.priority,
                state: thread.state,
            };
            written += 1;
        }
        written
    }

    fn heap_region(&self) -> MemoryRegion {
        SIM_HEAP_REGION
    }

    fn isr_stack_region(&self) -> MemoryRegion {
        SIM_ISR_STACK_REGION
    }
}
