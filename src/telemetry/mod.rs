//! # Telemetry Module
//!
//! Task timing, CPU utilization and memory telemetry.
//!
//! This module handles:
//! - Running averages of task periods and execution times
//! - CPU busy percentage between two samples
//! - Heap/stack high-water marks, deltas and absolute dumps
//! - The runtime memory map of live threads
//!
//! Every component follows the same pattern: sample the host, compare with
//! the previous snapshot, report through `tracing` and return a typed report.

pub mod cpu;
pub mod memory;
pub mod task;
pub mod thread_table;

pub use cpu::{CpuUsage, CpuUtilizationTracker};
pub use memory::{MemoryDiff, MemoryMap, MemorySnapshot, MemoryTelemetry};
pub use task::{TaskSlot, TaskStats, TaskTelemetry, TASK_SLOT_COUNT};
pub use thread_table::{ThreadTable, MAX_TRACKED_THREADS};
