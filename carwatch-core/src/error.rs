//! Error types for carwatch-core

use std::time::Duration;

use thiserror::Error;

/// Main error type for the carwatch-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Credentials missing, unreadable, or rejected by the API
    #[error("authentication error: {0}")]
    Auth(String),

    /// Telemetry API request failed
    #[error("network error: {0}")]
    Network(String),

    /// Telemetry request did not complete in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Configured display name is not in the account's vehicle list
    #[error("vehicle not found: {0}")]
    VehicleNotFound(String),

    /// Durable store rejected a write
    #[error("storage error: {0}")]
    Storage(String),

    /// Broker client error
    #[error("broker error: {0}")]
    Broker(String),

    /// Broker connection is not live
    #[error("broker disconnected")]
    Disconnected,

    /// No snapshot arrived within the watchdog window
    #[error("no snapshot received for {window:?}")]
    Stalled { window: Duration },

    /// A supervised task panicked or was aborted unexpectedly
    #[error("task {task} panicked: {message}")]
    TaskPanicked { task: String, message: String },
}

impl Error {
    /// Whether this failure is expected to clear up on its own.
    ///
    /// Retry loops log transient failures at warn and anything else at
    /// error. Whether a failure is retried at all is up to the component.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Network(_) | Error::Disconnected | Error::Broker(_)
        )
    }
}

/// Result type alias for carwatch-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Timeout(Duration::from_secs(10)).is_transient());
        assert!(Error::Disconnected.is_transient());
        assert!(Error::Network("reset".to_string()).is_transient());
        assert!(Error::Broker("connection refused".to_string()).is_transient());
        assert!(!Error::Auth("401 Unauthorized".to_string()).is_transient());
        assert!(!Error::Storage("disk full".to_string()).is_transient());
        assert!(!Error::VehicleNotFound("Ghost".to_string()).is_transient());
        assert!(!Error::Stalled {
            window: Duration::from_secs(1800)
        }
        .is_transient());
    }

    #[test]
    fn test_stalled_message() {
        let err = Error::Stalled {
            window: Duration::from_secs(1800),
        };
        assert_eq!(err.to_string(), "no snapshot received for 1800s");
    }
}
