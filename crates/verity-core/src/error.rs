//! Error types for verity.

use thiserror::Error;

use crate::models::JobStatus;

/// Result type alias using verity's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for verity operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Queue backend could not be reached or rejected a command
    #[error("Queue backend unavailable: {0}")]
    Queue(String),

    /// Queue entry could not be decoded into a job descriptor
    #[error("Malformed queue entry: {0}")]
    MalformedEntry(String),

    /// Job record update affected zero rows
    #[error("Store error: {0}")]
    Store(String),

    /// Job record update would leave a terminal state
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Object storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Inference/classification failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Report rendering failed
    #[error("Render error: {0}")]
    Render(String),

    /// Notification delivery failed
    #[error("Notify error: {0}")]
    Notify(String),

    /// Job processing exceeded its deadline
    #[error("Job timed out after {0}s")]
    Timeout(u64),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the queue backend itself is unreachable.
    ///
    /// The consumer loop backs off and reconnects on these instead of
    /// counting them as empty polls.
    pub fn is_queue_unavailable(&self) -> bool {
        matches!(self, Error::Queue(_))
    }

    /// True when a queue payload failed schema validation.
    pub fn is_malformed_entry(&self) -> bool {
        matches!(self, Error::MalformedEntry(_))
    }

    /// True for errors that indicate a bug rather than an environmental failure.
    pub fn is_logic_error(&self) -> bool {
        matches!(self, Error::InvalidTransition { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Queue(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_queue() {
        let err = Error::Queue("connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "Queue backend unavailable: connection refused"
        );
    }

    #[test]
    fn test_error_display_malformed_entry() {
        let err = Error::MalformedEntry("missing field `job_id`".to_string());
        assert_eq!(
            err.to_string(),
            "Malformed queue entry: missing field `job_id`"
        );
    }

    #[test]
    fn test_error_display_store() {
        let err = Error::Store("Job update affected 0 rows".to_string());
        assert_eq!(err.to_string(), "Store error: Job update affected 0 rows");
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let err = Error::InvalidTransition {
            job_id: "J1".to_string(),
            from: JobStatus::Done,
            to: JobStatus::Progressed,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for job J1: DONE -> PROGRESSED"
        );
    }

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout(300);
        assert_eq!(err.to_string(), "Job timed out after 300s");
    }

    #[test]
    fn test_error_display_step_errors() {
        assert_eq!(
            Error::Storage("bucket missing".into()).to_string(),
            "Storage error: bucket missing"
        );
        assert_eq!(
            Error::Inference("model offline".into()).to_string(),
            "Inference error: model offline"
        );
        assert_eq!(
            Error::Render("empty results".into()).to_string(),
            "Render error: empty results"
        );
        assert_eq!(
            Error::Notify("rejected".into()).to_string(),
            "Notify error: rejected"
        );
    }

    #[test]
    fn test_is_queue_unavailable() {
        assert!(Error::Queue("down".into()).is_queue_unavailable());
        assert!(!Error::Storage("down".into()).is_queue_unavailable());
        assert!(!Error::Store("0 rows".into()).is_queue_unavailable());
    }

    #[test]
    fn test_is_malformed_entry() {
        assert!(Error::MalformedEntry("bad".into()).is_malformed_entry());
        assert!(!Error::Serialization("bad".into()).is_malformed_entry());
    }

    #[test]
    fn test_is_logic_error() {
        let err = Error::InvalidTransition {
            job_id: "J1".into(),
            from: JobStatus::Failed,
            to: JobStatus::Done,
        };
        assert!(err.is_logic_error());
        assert!(!Error::Internal("x".into()).is_logic_error());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => {
                assert!(!msg.is_empty());
            }
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_redis_error_is_queue_unavailable() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"));
        let err: Error = redis_err.into();
        assert!(err.is_queue_unavailable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        match err {
            Error::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
