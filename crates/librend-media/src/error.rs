//! Error types for process and media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while managing external processes.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    BinaryNotFound(String),

    #[error("Failed to spawn {name}: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} failed: {message}")]
    ProcessFailed {
        name: String,
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Failed to signal {name}: {message}")]
    SignalFailed { name: String, message: String },

    #[error("No free display number in {0}")]
    DisplayUnavailable(String),

    #[error("Display :{display} not ready after {waited_ms} ms")]
    DisplayNotReady { display: u32, waited_ms: u64 },

    #[error("Refusing path outside {base}: {name:?}")]
    UnsafePath { base: PathBuf, name: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create a process failure error.
    pub fn process_failed(
        name: impl Into<String>,
        message: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::ProcessFailed {
            name: name.into(),
            message: message.into(),
            exit_code,
        }
    }

    /// Create a spawn failure error.
    pub fn spawn_failed(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            name: name.into(),
            source,
        }
    }
}
