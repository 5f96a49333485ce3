//! Error types for the ingest pipeline
//!
//! Provides error handling for:
//! - Inbound message validation
//! - Capability polling (timeout, cancellation)
//! - Host command and readiness failures
//! - Pipeline state transitions
//!
//! Store failures come from `nbi_store::StoreError` and are wrapped here.

use crate::state_machine::PipelineState;
use nbi_store::StoreError;
use std::time::Duration;

/// Main per-request error type
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Inbound message is missing required fields
    #[error("invalid ingest message: {0}")]
    Validation(#[from] ValidationError),

    /// Primary notebook write failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Waiting on a host capability failed
    #[error(transparent)]
    Poll(#[from] PollError),

    /// Host command or readiness signal failed
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// Pipeline attempted an illegal transition
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    /// Artifact could not be serialized
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    /// Whether the error came from the message itself rather than the pipeline
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether the request failed on its own rather than being cancelled
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Poll(PollError::Cancelled { .. }))
    }

    /// Check if a fresh attempt could succeed
    ///
    /// Nothing is retried automatically; this only classifies.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Poll(PollError::CapabilityTimeout { .. }) | Self::Host(_)
        ) || matches!(self, Self::Store(e) if !e.is_caller_error())
    }
}

/// Validation errors for inbound messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message is not a JSON object
    #[error("message is not an object")]
    NotAnObject,

    /// Required field absent or null
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// Field present with the wrong shape
    #[error("field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Capability polling errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// Capability was not registered in time
    #[error("capability '{capability}' not available after {}ms", .timeout.as_millis())]
    CapabilityTimeout {
        capability: String,
        timeout: Duration,
    },

    /// The enclosing request was abandoned
    #[error("wait for capability '{capability}' cancelled")]
    Cancelled { capability: String },
}

impl PollError {
    /// Capability this error is about
    #[must_use]
    pub fn capability(&self) -> &str {
        match self {
            Self::CapabilityTimeout { capability, .. } | Self::Cancelled { capability } => {
                capability
            }
        }
    }
}

/// Host-side failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// Command is not registered
    #[error("command not registered: {0}")]
    UnknownCommand(String),

    /// Command ran and failed
    #[error("command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Session readiness rejected
    #[error("session failed to start: {0}")]
    SessionFailed(String),

    /// Local key-value storage rejected a write
    #[error("local storage write failed for '{key}': {message}")]
    LocalStorage { key: String, message: String },

    /// Opener context could not be reached
    #[error("opener unreachable: {0}")]
    OpenerUnreachable(String),
}

impl HostError {
    /// Create command failure
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }
}

/// State machine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the allowed table
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition { from: PipelineState, to: PipelineState },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = IngestError::from(ValidationError::MissingField("filename"));
        assert!(err.to_string().contains("missing required field 'filename'"));
        assert!(err.is_validation());
    }

    #[test]
    fn poll_timeout_display_names_capability() {
        let err = PollError::CapabilityTimeout {
            capability: "docmanager:open".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(
            err.to_string(),
            "capability 'docmanager:open' not available after 10000ms"
        );
        assert_eq!(err.capability(), "docmanager:open");
    }

    #[test]
    fn ingest_error_is_retryable() {
        let timeout = IngestError::Poll(PollError::CapabilityTimeout {
            capability: "x".into(),
            timeout: Duration::from_millis(1),
        });
        assert!(timeout.is_retryable());

        let invalid = IngestError::Validation(ValidationError::NotAnObject);
        assert!(!invalid.is_retryable());

        let cancelled = IngestError::Poll(PollError::Cancelled {
            capability: "x".into(),
        });
        assert!(!cancelled.is_retryable());

        assert!(!IngestError::Store(StoreError::EmptyKey).is_retryable());
        assert!(IngestError::Store(StoreError::Write("full".into())).is_retryable());
    }

    #[test]
    fn only_cancellation_is_not_fatal() {
        let cancelled = IngestError::Poll(PollError::Cancelled {
            capability: "x".into(),
        });
        assert!(!cancelled.is_fatal());
        assert!(IngestError::Validation(ValidationError::NotAnObject).is_fatal());
        assert!(IngestError::Host(HostError::SessionFailed("gone".into())).is_fatal());
    }
}
