//! # Error Types
//!
//! Custom error types for RTOS Telemetry using `thiserror`.
//!
//! Sampling paths never fail; only the configuration loader and the JSONL
//! recorder produce errors.

use thiserror::Error;

/// Main error type for RTOS Telemetry
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for RTOS Telemetry
pub type Result<T> = std::result::Result<T, TelemetryError>;
