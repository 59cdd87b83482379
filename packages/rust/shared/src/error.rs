//! Error types for benchforge.
//!
//! Library crates use [`BenchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all benchforge operations.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Configuration loading or validation error. Always fatal.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to a corpus, model, or dataset service.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed corpus row, benchmark file, or service response.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Local database or remote dataset store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Generative completion error (API or response shape).
    #[error("completion error: {0}")]
    Completion(String),

    /// Embedding service error.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invariant violation, invalid value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BenchError>;

impl BenchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should abort the whole run rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}
