//! # RTOS Telemetry
//!
//! Periodic diagnostics driver running the telemetry components against a
//! simulated scheduler.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (first argument, or `config/default.toml`)
//!    - Set up logging with tracing subscriber
//!    - Create the simulated host and its application threads
//!
//! 2. **Main Loop**
//!    - Application tasks run on their own periods, bracketed by
//!      `begin`/`end` task telemetry calls
//!    - Every `interval_ms` the diagnostics sample CPU and memory
//!    - Reports go to the log and, when enabled, to JSONL files
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C stops the loop
//!    - Final per-task averages are logged
//!
//! # Examples
//!
//! ```bash
//! RUST_LOG=debug cargo run --release -- config/default.toml
//! ```

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use rtos_telemetry::config::{Config, LoggingConfig, MemoryMode};
use rtos_telemetry::host::{Clock, MonotonicClock, SimulatedHost};
use rtos_telemetry::recorder::JsonlRecorder;
use rtos_telemetry::telemetry::{CpuUtilizationTracker, MemoryTelemetry, TaskSlot, TaskTelemetry};

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Heap reserved by the simulated target
const SIM_HEAP_BYTES: u32 = 128 * 1024;

/// Idle share of the simulated CPU, in per-mille
const SIM_IDLE_PERMILLE: u32 = 700;

/// Stack reserved for each simulated application thread
const TASK_STACK_BYTES: u32 = 1024;

type SharedClock = Arc<MonotonicClock>;
type Host = Arc<SimulatedHost<SharedClock>>;

/// Invocation period of each simulated application task
fn task_period(slot: TaskSlot) -> Duration {
    match slot {
        TaskSlot::Gear | TaskSlot::Reset => Duration::from_millis(800),
        TaskSlot::Speed => Duration::from_millis(400),
        TaskSlot::Temperature | TaskSlot::Display1 | TaskSlot::Display2 => Duration::from_millis(1600),
    }
}

/// Sets up the tracing subscriber, returning the file writer guard if any
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.to_file {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "rtos-telemetry.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

fn load_config() -> Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {path}")),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load(DEFAULT_CONFIG_PATH).with_context(|| format!("loading {DEFAULT_CONFIG_PATH}"))
        }
        None => Ok(Config::default()),
    }
}

/// CPU and memory sampling run from the periodic diagnostics timer
struct Diagnostics {
    cpu: Option<CpuUtilizationTracker<Host, SharedClock>>,
    memory: MemoryTelemetry<Host>,
    memory_mode: MemoryMode,
    recorder: Option<JsonlRecorder>,
}

impl Diagnostics {
    fn record<T: serde::Serialize>(&mut self, kind: &str, data: &T) {
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record(kind, data) {
                warn!("Failed to record {} telemetry: {}", kind, e);
            }
        }
    }

    fn memory_map(&mut self) {
        let map = self.memory.report_runtime_memory_map();
        self.record("memory_map", &map);
    }

    fn run_once<C: Clock>(&mut self, tasks: &TaskTelemetry<C>) {
        if let Some(usage) = self.cpu.as_mut().and_then(|cpu| cpu.sample()) {
            self.record("cpu", &usage);
        }

        match self.memory_mode {
            MemoryMode::Diff => {
                let diff = self.memory.snapshot_and_report_diffs();
                if !diff.is_empty() {
                    self.record("memory_diff", &diff);
                }
            }
            MemoryMode::Absolute => {
                let snapshot = self.memory.snapshot_and_report_absolute();
                self.record("memory_snapshot", &snapshot);
            }
        }

        if self.recorder.is_some() {
            for stats in tasks.iter_stats() {
                self.record("task", &stats);
            }
            if let Some(Err(e)) = self.recorder.as_mut().map(JsonlRecorder::flush) {
                warn!("Failed to flush telemetry records: {}", e);
            }
        }
    }
}

/// Spawns one simulated application task per slot
fn spawn_tasks(host: &Host, telemetry: &Arc<TaskTelemetry<SharedClock>>) {
    for slot in TaskSlot::ALL {
        let thread_id = host.spawn_thread(slot.name(), 24, TASK_STACK_BYTES);
        let host = Arc::clone(host);
        let telemetry = Arc::clone(telemetry);

        tokio::spawn(async move {
            let mut ticker = interval(task_period(slot));
            let mut depth = 64;
            loop {
                ticker.tick().await;
                telemetry.begin(slot.index());

                // Simulated work: some stack growth and a short-lived buffer
                depth = (depth + 16 * (slot.index() as u32 + 1)).min(TASK_STACK_BYTES);
                host.touch_stack(thread_id, depth);
                if host.allocate(256) {
                    tokio::time::sleep(Duration::from_micros(500)).await;
                    host.free(256);
                }

                telemetry.end(slot.index());
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    let _log_guard = init_logging(&config.logging);

    info!("RTOS Telemetry v{} starting...", env!("CARGO_PKG_VERSION"));

    let clock: SharedClock = Arc::new(MonotonicClock::start());
    let host: Host = Arc::new(SimulatedHost::new(Arc::clone(&clock), SIM_HEAP_BYTES));
    host.set_idle_permille(SIM_IDLE_PERMILLE);
    host.spawn_thread("main", 24, 4096);
    host.spawn_thread("idle", 1, 512);

    let telemetry = Arc::new(TaskTelemetry::new(Arc::clone(&clock)));
    telemetry.enable(config.tasks.enabled);

    let recorder = if config.recording.enabled {
        let recorder = JsonlRecorder::from_config(&config.recording)?;
        info!("Recording telemetry to {}", recorder.dir().display());
        Some(recorder)
    } else {
        None
    };

    let mut diagnostics = Diagnostics {
        cpu: config
            .diagnostics
            .cpu
            .then(|| CpuUtilizationTracker::new(Arc::clone(&host), Arc::clone(&clock))),
        memory: MemoryTelemetry::new(Arc::clone(&host)),
        memory_mode: config.diagnostics.memory_mode,
        recorder,
    };

    spawn_tasks(&host, &telemetry);

    if config.diagnostics.memory_map_on_start {
        diagnostics.memory_map();
    }

    let mut diagnostics_interval = interval(Duration::from_millis(config.diagnostics.interval_ms));
    info!("Running diagnostics every {} ms", config.diagnostics.interval_ms);
    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = diagnostics_interval.tick() => {
                diagnostics.run_once(&telemetry);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    for stats in telemetry.iter_stats() {
        info!(
            "{} task: {} invocations, period {} usecs, execution time {} usecs",
            stats.slot.name(),
            stats.invocation_count,
            stats.average_period_us,
            stats.average_execution_us
        );
    }
    if let Some(recorder) = diagnostics.recorder.as_mut() {
        recorder.flush()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_periods_are_nonzero() {
        for slot in TaskSlot::ALL {
            assert!(task_period(slot) > Duration::ZERO, "{} has no period", slot.name());
        }
    }

    #[test]
    fn test_simulated_stacks_fit_heap() {
        let total = TASK_STACK_BYTES * TaskSlot::ALL.len() as u32;
        assert!(total < SIM_HEAP_BYTES);
    }

    #[test]
    fn test_idle_ratio_in_range() {
        assert!(SIM_IDLE_PERMILLE <= 1000);
    }

    #[test]
    fn test_default_config_path_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        assert!(Config::load(path).is_ok());
    }
}
