//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use vexport_models::{EncodeSpecError, TimestampError};

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Missing executable or unusable required directory. Fatal, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The encoder ran and exited non-zero. Never retried automatically.
    #[error("Encoder exited with code {exit_code:?}: {}", last_line(.stderr))]
    EncodeExecution {
        command: String,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("Cannot map {}: {reason}", .path.display())]
    Mapping { path: PathBuf, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid encode spec: {0}")]
    InvalidSpec(#[from] EncodeSpecError),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] TimestampError),

    #[error("FFprobe failed: {message}")]
    ProbeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn last_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("<no stderr>")
}

impl MediaError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a mapping error.
    pub fn mapping(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Mapping {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Captured encoder stderr, for surfacing verbatim to the user.
    pub fn encoder_stderr(&self) -> Option<&str> {
        match self {
            Self::EncodeExecution { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// Whether the failure is a fatal setup problem rather than a bad input.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
