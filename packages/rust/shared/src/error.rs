//! Error types for ingestkit.
//!
//! Library crates use [`IngestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ingestkit operations.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Configuration error: bad config file, duplicate or unregistered connector.
    #[error("config error: {message}")]
    Config { message: String },

    /// A gating condition could not be built from its declaration.
    #[error("condition error: {message}")]
    Condition { message: String },

    /// A single connector call failed. Recorded into the run, never fatal.
    #[error("connector '{connector}' failed: {message}")]
    Connector { connector: String, message: String },

    /// Data validation error (invalid request, malformed fixture, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// JSON/TOML (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a condition-build error from any displayable message.
    pub fn condition(msg: impl Into<String>) -> Self {
        Self::Condition {
            message: msg.into(),
        }
    }

    /// Create a connector execution error.
    pub fn connector(connector: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Connector {
            connector: connector.into(),
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

    /// Whether this error must abort a run before any phase executes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Condition { .. })
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
