//! # RTOS Telemetry Library
//!
//! Runtime telemetry for real-time schedulers.
//!
//! This library measures and reports per-task period and execution time,
//! processor utilization, and heap/stack/thread memory consumption. All
//! scheduler-specific access goes through the capability traits in [`host`].

pub mod config;
pub mod error;
pub mod host;
pub mod recorder;
pub mod telemetry;
