//! Error types for the CLI

use lazytrace::TraceError;
use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad or missing command-line input
    #[error("Usage error: {message}")]
    Usage {
        /// Error message
        message: String,
    },

    /// Target or hook could not be found
    #[error("{message}")]
    Resolution {
        /// Error message
        message: String,
    },

    /// Lazytrace library error
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Create a usage error
    #[must_use]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Sort a library error into the CLI taxonomy
    #[must_use]
    pub fn classify(err: TraceError) -> Self {
        match err {
            TraceError::Resolution { .. } => Self::Resolution {
                message: err.to_string(),
            },
            TraceError::Pattern { .. } => Self::usage(err.to_string()),
            other => Self::Trace(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_classify_resolution() {
        let err = CliError::classify(TraceError::resolution("./app.js", PathBuf::from("/w")));
        assert!(matches!(err, CliError::Resolution { .. }));
        assert!(err.to_string().contains("./app.js"));
    }

    #[test]
    fn test_classify_pattern_is_usage() {
        let err = CliError::classify(TraceError::Pattern {
            pattern: "[".into(),
            message: "unclosed".into(),
        });
        assert!(matches!(err, CliError::Usage { .. }));
    }

    #[test]
    fn test_classify_keeps_other_errors() {
        let err = CliError::classify(TraceError::script("boom"));
        assert!(matches!(err, CliError::Trace(TraceError::Script { .. })));
    }
}
