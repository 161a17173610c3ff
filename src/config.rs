//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Result, TelemetryError};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
}

/// Task telemetry configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TasksConfig {
    #[serde(default = "default_tasks_enabled")]
    pub enabled: bool,
}

/// How the periodic diagnostics report memory usage
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    /// Only counters that increased since the previous sample
    Diff,
    /// Every counter on every sample
    Absolute,
}

/// Periodic diagnostics configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_cpu_enabled")]
    pub cpu: bool,

    #[serde(default = "default_memory_mode")]
    pub memory_mode: MemoryMode,

    #[serde(default = "default_memory_map_on_start")]
    pub memory_map_on_start: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub to_file: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

/// JSONL telemetry recording configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RecordingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_recording_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

// Default value functions
fn default_tasks_enabled() -> bool { true }

fn default_interval_ms() -> u64 { 1000 }
fn default_cpu_enabled() -> bool { true }
fn default_memory_mode() -> MemoryMode { MemoryMode::Diff }
fn default_memory_map_on_start() -> bool { true }

fn default_log_level() -> String { "info".to_string() }
fn default_log_dir() -> String { "./logs".to_string() }

fn default_recording_dir() -> String { "./telemetry".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

impl Default for TasksConfig {
    fn default() -> Self {
        Self { enabled: default_tasks_enabled() }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            cpu: default_cpu_enabled(),
            memory_mode: default_memory_mode(),
            memory_map_on_start: default_memory_map_on_start(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
            log_dir: default_log_dir(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_recording_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn invalid(message: &str) -> TelemetryError {
    TelemetryError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields take their default values.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rtos_telemetry::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.diagnostics.interval_ms == 0 || self.diagnostics.interval_ms > 60000 {
            return Err(invalid("interval_ms must be between 1 and 60000"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid("level must be one of: trace, debug, info, warn, error"));
        }

        if self.logging.to_file && self.logging.log_dir.is_empty() {
            return Err(invalid("logging log_dir cannot be empty when to_file is set"));
        }

        if self.recording.enabled && self.recording.log_dir.is_empty() {
            return Err(invalid("recording log_dir cannot be empty when enabled"));
        }

        if self.recording.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.recording.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.tasks.enabled);
        assert_eq!(config.diagnostics.interval_ms, 1000);
        assert_eq!(config.diagnostics.memory_mode, MemoryMode::Diff);
        assert_eq!(config.logging.level, "info");
        assert!(!config.recording.enabled);
    }

    #[test]
    fn test_empty_file_equals_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[tasks]
enabled = false

[diagnostics]
interval_ms = 250
cpu = false
memory_mode = "absolute"

[logging]
level = "debug"

[recording]
enabled = true
log_dir = "/tmp/telemetry"
max_records_per_file = 50
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert!(!config.tasks.enabled);
        assert_eq!(config.diagnostics.interval_ms, 250);
        assert!(!config.diagnostics.cpu);
        assert_eq!(config.diagnostics.memory_mode, MemoryMode::Absolute);
        assert!(config.diagnostics.memory_map_on_start);
        assert_eq!(config.logging.level, "debug");
        assert!(config.recording.enabled);
        assert_eq!(config.recording.max_records_per_file, 50);
        assert_eq!(config.recording.max_files_to_keep, 10);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/telemetry.toml");
        assert!(matches!(result, Err(TelemetryError::Io(_))));
    }

    #[test]
    fn test_unknown_memory_mode() {
        let result = Config::parse("[diagnostics]\nmemory_mode = \"verbose\"\n");
        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }

    #[test]
    fn test_interval_zero() {
        let mut config = Config::default();
        config.diagnostics.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_too_high() {
        let mut config = Config::default();
        config.diagnostics.interval_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir_when_logging_to_file() {
        let mut config = Config::default();
        config.logging.to_file = true;
        config.logging.log_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_recording_dir_when_enabled() {
        let mut config = Config::default();
        config.recording.enabled = true;
        config.recording.log_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_recording_dir_when_disabled() {
        let mut config = Config::default();
        config.recording.enabled = false;
        config.recording.log_dir = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_records_per_file_zero() {
        let mut config = Config::default();
        config.recording.max_records_per_file = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_files_to_keep_zero() {
        let mut config = Config::default();
        config.recording.max_files_to_keep = 0;
        assert!(config.validate().is_err());
    }
}
