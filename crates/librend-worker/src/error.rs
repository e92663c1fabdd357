//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Could not connect to synthesis socket {addr} after {attempts} attempts")]
    ConnectFailed { addr: String, attempts: u32 },

    #[error("Process failed: {0}")]
    ProcessFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Media error: {0}")]
    Media(#[from] librend_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] librend_queue::QueueError),

    #[error("Model error: {0}")]
    Model(#[from] librend_models::ModelError),
}

impl WorkerError {
    pub fn process_failed(msg: impl Into<String>) -> Self {
        Self::ProcessFailed(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Check if the error must take the worker down.
    ///
    /// Everything that happens once a session is finalizing is fatal: the
    /// inbound messages are already acknowledged and there is no local
    /// recovery, so the process exits and is restarted by its supervisor.
    /// Broker hiccups while consuming are not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WorkerError::Queue(_) | WorkerError::Model(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use librend_media::MediaError;
    use librend_queue::QueueError;

    #[test]
    fn test_process_failures_are_fatal() {
        assert!(WorkerError::process_failed("synthesis exited with 1").is_fatal());
        assert!(WorkerError::from(MediaError::Timeout(60)).is_fatal());
        assert!(WorkerError::ConnectFailed {
            addr: "127.0.0.1:5555".to_string(),
            attempts: 3
        }
        .is_fatal());
    }

    #[test]
    fn test_queue_errors_are_not_fatal() {
        assert!(!WorkerError::from(QueueError::connection_failed("reset")).is_fatal());
    }
}
