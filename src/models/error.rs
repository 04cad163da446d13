//! Error types for chanscope.
//!
//! Job-level failures are data (they become result rows); the variants here
//! cover the failures that reach a caller: persistence, configuration, input
//! loading and the classifier transport.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for chanscope.
#[derive(Debug, Error)]
pub enum ChanscopeError {
    // ═══════════════════════════════════════════════════════════════════
    // Expected failures (bad input, missing things)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job list not found: {0}")]
    JobListNotFound(PathBuf),

    #[error("No job column found; available columns: {available:?}")]
    JobColumnNotFound { available: Vec<String> },

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Invalid backup name: {0:?}")]
    InvalidBackupName(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // Infrastructure failures (network, disk, time)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Classifier API error: {0}")]
    ClassifierApi(#[from] ClassifierApiError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {context}")]
    Csv {
        context: String,
        #[source]
        source: csv::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Invariant violations
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors reported by the chat-completions endpoint.
#[derive(Debug, Error)]
pub enum ClassifierApiError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("missing API key")]
    MissingApiKey,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl ChanscopeError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a CSV error with context.
    pub fn csv(context: impl Into<String>, source: csv::Error) -> Self {
        Self::Csv {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Network(_)
        )
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Result type alias for chanscope.
pub type Result<T> = std::result::Result<T, ChanscopeError>;
