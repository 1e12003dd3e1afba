//! Error types for accel-dl
//!
//! Parsing and failure classification never fail: malformed accelerator output
//! degrades to default values. The errors in this module only surface from I/O
//! (reading an output stream, querying free disk space) and from loading
//! configuration.

use thiserror::Error;

/// Result type alias for accel-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for accel-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "event_channel_capacity")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the download
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// The reactor has been shut down and no longer schedules retries
    #[error("shutdown in progress: not scheduling retries")]
    ShuttingDown,
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}
