//! Error types and handling for mailstorm
//!
//! This module defines all error types used throughout the harness and the
//! failure taxonomy used to classify per-iteration failures into counters.
//! No error category is fatal to a run: workers consume iteration errors at
//! the iteration boundary and convert them into metric counters.

use std::time::Duration;
use thiserror::Error;

/// Main error type for mailstorm operations
#[derive(Debug, Error)]
pub enum MailstormError {
    #[error("Authentication failed for {username}: {message}")]
    AuthFailure { username: String, message: String },

    #[error("Connection error on {target}: {message}")]
    ConnectionError {
        target: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Client error during {operation}: {message}")]
    ClientError { operation: String, message: String },

    #[error("Server error during {operation}: {message}")]
    ServerError { operation: String, message: String },

    #[error("Contention error during {operation}: {message}")]
    ContentionError { operation: String, message: String },

    #[error("Operation {operation} timed out after {limit:?}")]
    OperationTimeout { operation: String, limit: Duration },

    #[error("Protocol error on {target}: {message}")]
    ProtocolError { target: String, message: String },

    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
        config_key: Option<String>,
    },

    #[error("Baseline error: {message}")]
    BaselineError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Internal error: {message}")]
    InternalError {
        message: String,
        component: Option<String>,
    },
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, MailstormError>;

/// Failure classification used for counter naming and pool eviction
/// decisions. Every iteration-level failure maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Auth,
    Connection,
    Client,
    Server,
    Contention,
    Timeout,
    Internal,
}

impl FailureKind {
    /// Stable label used as a counter name suffix
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Auth => "auth_failure",
            FailureKind::Connection => "connection_error",
            FailureKind::Client => "client_error",
            FailureKind::Server => "server_error",
            FailureKind::Contention => "contention_error",
            FailureKind::Timeout => "timed_out",
            FailureKind::Internal => "internal_error",
        }
    }
}

impl MailstormError {
    /// Classify this error into the failure taxonomy
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            MailstormError::AuthFailure { .. } => FailureKind::Auth,
            MailstormError::ConnectionError { .. } => FailureKind::Connection,
            MailstormError::ClientError { .. } => FailureKind::Client,
            MailstormError::ServerError { .. } => FailureKind::Server,
            MailstormError::ProtocolError { .. } => FailureKind::Server,
            MailstormError::ContentionError { .. } => FailureKind::Contention,
            MailstormError::OperationTimeout { .. } => FailureKind::Timeout,
            MailstormError::ConfigError { .. }
            | MailstormError::BaselineError { .. }
            | MailstormError::InternalError { .. } => FailureKind::Internal,
        }
    }

    /// Whether a pooled connection that produced this error must be evicted
    /// rather than returned to the pool. Connection-level faults and timeouts
    /// leave the transport in an unknown state.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self.failure_kind(),
            FailureKind::Connection | FailureKind::Timeout
        )
    }

    /// Build a connection error from an I/O failure on the given target
    pub fn connection(target: impl Into<String>, err: std::io::Error) -> Self {
        MailstormError::ConnectionError {
            target: target.into(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_classification() {
        let err = MailstormError::AuthFailure {
            username: "loadtest-7@example.com".to_string(),
            message: "invalid credentials".to_string(),
        };
        assert_eq!(err.failure_kind(), FailureKind::Auth);

        let err = MailstormError::OperationTimeout {
            operation: "send_message".to_string(),
            limit: Duration::from_secs(10),
        };
        assert_eq!(err.failure_kind(), FailureKind::Timeout);

        let err = MailstormError::ContentionError {
            operation: "mark_message".to_string(),
            message: "deadlock detected".to_string(),
        };
        assert_eq!(err.failure_kind(), FailureKind::Contention);
    }

    #[test]
    fn test_connection_poisoning() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = MailstormError::connection("submission", io_err);
        assert!(err.poisons_connection());

        let err = MailstormError::ClientError {
            operation: "fetch_message".to_string(),
            message: "no such message".to_string(),
        };
        assert!(!err.poisons_connection());
    }

    #[test]
    fn test_counter_labels_are_distinct() {
        let kinds = [
            FailureKind::Auth,
            FailureKind::Connection,
            FailureKind::Client,
            FailureKind::Server,
            FailureKind::Contention,
            FailureKind::Timeout,
            FailureKind::Internal,
        ];
        let labels: std::collections::HashSet<_> = kinds.iter().map(|k| k.as_str()).collect();
        assert_eq!(labels.len(), kinds.len());
    }
}
