// src/error.rs

//! Unified error handling for the harvest cache.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Result type alias for cache, index and search operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Cache entry is malformed or incomplete
    #[error("Corrupt cache entry {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Payload could not be encoded, even after filtering
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A per-file task exceeded its time budget
    #[error("Timed out after {after_ms}ms: {context}")]
    Timeout { context: String, after_ms: u64 },

    /// Aggregate error rate exceeded the configured threshold
    #[error(
        "Circuit breaker triggered: {error_count}/{processed} failures ({error_percent:.1}% > {threshold_percent:.1}%)"
    )]
    CircuitBreakerTriggered {
        error_count: usize,
        processed: usize,
        error_percent: f64,
        threshold_percent: f64,
    },

    /// Process memory exceeded the configured ceiling
    #[error("Memory ceiling exceeded: {used_mb:.1}MB > {ceiling_mb}MB")]
    MemoryCeiling { used_mb: f64, ceiling_mb: u64 },

    /// A spawned task failed to complete
    #[error("Task error: {0}")]
    Task(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a corruption error for the file at `path`.
    pub fn corrupt(path: impl AsRef<Path>, reason: impl fmt::Display) -> Self {
        Self::Corrupt {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl fmt::Display) -> Self {
        Self::Serialization(message.to_string())
    }

    /// Create a timeout error with context.
    pub fn timeout(context: impl Into<String>, after_ms: u64) -> Self {
        Self::Timeout {
            context: context.into(),
            after_ms,
        }
    }

    /// Whether the error is worth retrying (I/O hiccups and timeouts).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout { .. })
    }
}
