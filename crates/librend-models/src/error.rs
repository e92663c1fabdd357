//! Model error types.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Malformed segment: {0}")]
    MalformedSegment(String),

    #[error("Unknown control marker: {0}")]
    UnknownControlMarker(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedSegment(msg.into())
    }
}
