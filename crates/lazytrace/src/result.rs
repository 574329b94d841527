//! Result and error types for lazytrace.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for lazytrace operations
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors that can occur while instrumenting, loading or persisting a trace
#[derive(Debug, Error)]
pub enum TraceError {
    /// A matched source unit could not be parsed
    #[error("Parse error in {path} at {line}:{column}: {message}")]
    Parse {
        /// Path of the unit being instrumented
        path: PathBuf,
        /// 1-based line of the first syntax error
        line: usize,
        /// 0-based column of the first syntax error
        column: usize,
        /// Error message
        message: String,
    },

    /// A module request or target could not be resolved to a file
    #[error("Cannot resolve '{request}' from {from}")]
    Resolution {
        /// The request as written (module id or target)
        request: String,
        /// Directory the request was resolved from
        from: PathBuf,
    },

    /// The report directory or trace file could not be written
    #[error("Cannot write trace to {path}: {source}")]
    Storage {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An include or exclude pattern is not a valid glob
    #[error("Invalid match pattern '{pattern}': {message}")]
    Pattern {
        /// The offending pattern
        pattern: String,
        /// Error message
        message: String,
    },

    /// The embedded script engine reported an error
    #[error("Script error: {message}")]
    Script {
        /// Error message
        message: String,
    },

    /// Operation called in the wrong lifecycle state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TraceError {
    /// Create a script error
    #[must_use]
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a resolution error
    #[must_use]
    pub fn resolution(request: impl Into<String>, from: impl Into<PathBuf>) -> Self {
        Self::Resolution {
            request: request.into(),
            from: from.into(),
        }
    }

    /// Whether this error came from parsing a source unit
    #[must_use]
    pub const fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}
