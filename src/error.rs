//! Custom error types for the application.
//!
//! This module defines the primary error type, `NodeError`, for the entire
//! service. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures the pipeline can
//! encounter, from configuration and I/O issues to serial-device problems.
//!
//! Transient framing rejects are deliberately *not* represented here: a
//! corrupted candidate frame is a normal wire condition, reported as a
//! [`crate::protocol::DemuxEvent::Reject`] diagnostic and recovered by
//! resynchronization. `NodeError` is reserved for conditions that need
//! backpressure, retry, or process exit.
//!
//! By using `#[from]`, `NodeError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the service with the
//! `?` operator.

use thiserror::Error;

/// Convenience alias for results using the service error type.
pub type NodeResult<T> = std::result::Result<T, NodeError>;

/// Top-level error type for the ingestion node.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Serial device unrecoverable after {attempts} reopen attempts")]
    SerialExhausted {
        /// Reopen attempts made before giving up.
        attempts: u32,
    },

    #[error("Archive error for {path}: {message}")]
    Archive {
        /// Bucket file the housekeeping step was processing.
        path: String,
        /// Underlying failure description.
        message: String,
    },

    #[error("Uplink submission failed after {attempts} attempts: {message}")]
    UplinkExhausted {
        /// Submission attempts made before the batch was dropped.
        attempts: u32,
        /// Last transport or response failure.
        message: String,
    },

    #[error("Uplink transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Batch serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<NodeError>),
}

impl NodeError {
    /// Whether the pipeline can keep running after this error.
    ///
    /// Recoverable errors are surfaced as diagnostics and retried or dropped;
    /// unrecoverable ones terminate the process so the external supervisor
    /// can restart it.
    pub fn is_recoverable(&self) -> bool {
        match self {
            NodeError::Config(_) | NodeError::Configuration(_) => false,
            NodeError::SerialExhausted { .. } => false,
            NodeError::ShutdownFailed(_) => false,
            NodeError::Io(_)
            | NodeError::Serial(_)
            | NodeError::Archive { .. }
            | NodeError::UplinkExhausted { .. }
            | NodeError::Transport(_)
            | NodeError::Serialize(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_exhaustion_is_fatal() {
        let err = NodeError::SerialExhausted { attempts: 5 };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("5 reopen attempts"));
    }

    #[test]
    fn uplink_exhaustion_is_recoverable() {
        let err = NodeError::UplinkExhausted {
            attempts: 3,
            message: "connection refused".into(),
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: NodeError = io.into();
        assert!(matches!(err, NodeError::Io(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn shutdown_failure_collects_causes() {
        let err = NodeError::ShutdownFailed(vec![
            NodeError::Archive {
                path: "07.ubx".into(),
                message: "disk full".into(),
            },
            NodeError::Configuration("bad".into()),
        ]);
        assert!(!err.is_recoverable());
    }
}
