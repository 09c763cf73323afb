//! Error types used throughout the gateway

use std::time::Duration;

use bulwark_common::impl_error_classification;
use bulwark_common::{ErrorClassification, ErrorSeverity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    STATUS_BAD_GATEWAY, STATUS_GATEWAY_TIMEOUT, STATUS_INTERNAL_ERROR, STATUS_NOT_FOUND,
    STATUS_SERVICE_UNAVAILABLE,
};
use crate::types::RequestState;

/// Why an isolation boundary refused a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    CircuitOpen,
    PoolSaturated,
    BulkheadFull,
    AdmissionDenied,
}

crate::impl_domain_status_conversions!(RejectionReason {
    CircuitOpen => "circuit_open",
    PoolSaturated => "pool_saturated",
    BulkheadFull => "bulkhead_full",
    AdmissionDenied => "admission_denied",
});

/// Connection-level failure before a response was obtained
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Failure of one Command execution
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// The isolation boundary refused the call; never retried
    #[error("rejected by {pool_key}: {reason}")]
    Rejected { pool_key: String, reason: RejectionReason },

    #[error("no completion from {pool_key} within {timeout:?}")]
    TimedOut { pool_key: String, timeout: Duration },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Downstream answered with a status outside the acceptable set
    #[error("unacceptable downstream status {status}")]
    UnacceptableStatus { status: u16 },

    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        cause: Box<ExecutionError>,
    },

    #[error("endpoint for service {service} is not yet available")]
    EndpointUnavailable { service: String },

    #[error("no route for {service}/{api}")]
    UnknownRoute { service: String, api: String },

    #[error(transparent)]
    Persistence(#[from] MailboxError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Status code surfaced to the caller for this failure.
    ///
    /// Exhausted retries report the status of their final cause, so a run of
    /// timeouts still surfaces as a gateway timeout.
    pub fn fast_fail_status(&self) -> u16 {
        match self {
            Self::Rejected { .. } | Self::EndpointUnavailable { .. } | Self::Persistence(_) => {
                STATUS_SERVICE_UNAVAILABLE
            }
            Self::TimedOut { .. } => STATUS_GATEWAY_TIMEOUT,
            Self::Transport(_) => STATUS_BAD_GATEWAY,
            Self::UnacceptableStatus { status } => *status,
            Self::RetriesExhausted { cause, .. } => match cause.as_ref() {
                Self::TimedOut { .. } => STATUS_GATEWAY_TIMEOUT,
                _ => STATUS_BAD_GATEWAY,
            },
            Self::UnknownRoute { .. } => STATUS_NOT_FOUND,
            Self::Internal(_) => STATUS_INTERNAL_ERROR,
        }
    }

    /// Lifecycle state recorded for a mailbox entry that ended in this error
    pub fn terminal_state(&self) -> RequestState {
        match self {
            Self::Rejected { .. } => RequestState::Rejected,
            Self::TimedOut { .. } => RequestState::TimedOut,
            Self::RetriesExhausted { cause, .. } => cause.terminal_state(),
            _ => RequestState::Errored,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl_error_classification!(ExecutionError,
    ExecutionError::Rejected { .. } => { retryable: false, severity: ErrorSeverity::Warning },
    ExecutionError::TimedOut { .. } => { retryable: true, severity: ErrorSeverity::Warning },
    ExecutionError::Transport(_) => { retryable: true, severity: ErrorSeverity::Error },
    ExecutionError::UnacceptableStatus { .. } => { retryable: true, severity: ErrorSeverity::Info },
    ExecutionError::RetriesExhausted { .. } => { retryable: false, severity: ErrorSeverity::Error },
    ExecutionError::EndpointUnavailable { .. } => { retryable: false, severity: ErrorSeverity::Warning },
    ExecutionError::UnknownRoute { .. } => { retryable: false, severity: ErrorSeverity::Info },
    ExecutionError::Persistence(_) => { retryable: false, severity: ErrorSeverity::Error },
    ExecutionError::Internal(_) => { retryable: false, severity: ErrorSeverity::Critical },
);

/// Failure of a MailboxStore operation
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum MailboxError {
    #[error("mailbox store is full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },

    #[error("mailbox store unavailable: {0}")]
    Unavailable(String),

    #[error("request {request_id} already exists")]
    Duplicate { request_id: String },

    #[error("request {request_id} cannot move from {from} to {to}")]
    InvalidTransition { request_id: String, from: RequestState, to: RequestState },

    /// Only returned by mutations; queries answer not-found with `None`
    #[error("request {request_id} not found")]
    NotFound { request_id: String },

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ErrorClassification for MailboxError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidTransition { .. } | Self::Duplicate { .. } | Self::NotFound { .. } => {
                ErrorSeverity::Warning
            }
            Self::CapacityExceeded { .. } | Self::Unavailable(_) => ErrorSeverity::Error,
            Self::Serialization(_) => ErrorSeverity::Critical,
        }
    }
}

/// Malformed or missing configuration; fatal at load time
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum ConfigError {
    #[error("invalid configuration at {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },

    #[error("cannot parse {format} configuration: {message}")]
    Parse { format: String, message: String },

    #[error("no configuration file found (searched: {searched})")]
    NotFound { searched: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), message: message.into() }
    }
}

/// Top-level gateway error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ErrorClassification for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Execution(e) => e.is_retryable(),
            Self::Mailbox(e) => e.is_retryable(),
            Self::Config(_) | Self::InvalidInput(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Execution(e) => e.severity(),
            Self::Mailbox(e) => e.severity(),
            Self::Config(_) => ErrorSeverity::Critical,
            Self::InvalidInput(_) => ErrorSeverity::Info,
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected() -> ExecutionError {
        ExecutionError::Rejected {
            pool_key: "orders-create".into(),
            reason: RejectionReason::CircuitOpen,
        }
    }

    #[test]
    fn fast_fail_status_distinguishes_boundary_from_downstream() {
        assert_eq!(rejected().fast_fail_status(), 503);
        assert_eq!(
            ExecutionError::TimedOut { pool_key: "k".into(), timeout: Duration::from_secs(1) }
                .fast_fail_status(),
            504
        );
        assert_eq!(ExecutionError::UnacceptableStatus { status: 418 }.fast_fail_status(), 418);
        assert_eq!(
            ExecutionError::Transport(TransportError::Connection("refused".into()))
                .fast_fail_status(),
            502
        );
    }

    #[test]
    fn exhausted_retries_report_cause() {
        let timed_out = ExecutionError::RetriesExhausted {
            attempts: 3,
            cause: Box::new(ExecutionError::TimedOut {
                pool_key: "k".into(),
                timeout: Duration::from_millis(10),
            }),
        };
        assert_eq!(timed_out.fast_fail_status(), 504);
        assert_eq!(timed_out.terminal_state(), RequestState::TimedOut);

        let business = ExecutionError::RetriesExhausted {
            attempts: 3,
            cause: Box::new(ExecutionError::UnacceptableStatus { status: 503 }),
        };
        assert_eq!(business.fast_fail_status(), 502);
        assert_eq!(business.terminal_state(), RequestState::Errored);
    }

    #[test]
    fn classification_never_retries_rejections() {
        assert!(!rejected().is_retryable());
        assert_eq!(rejected().terminal_state(), RequestState::Rejected);
        assert!(ExecutionError::UnacceptableStatus { status: 500 }.is_retryable());
        assert!(ExecutionError::Internal("bug".into()).is_critical());
        assert!(MailboxError::Unavailable("down".into()).is_retryable());
    }

    #[test]
    fn rejection_reason_string_table() {
        assert_eq!(RejectionReason::BulkheadFull.to_string(), "bulkhead_full");
        assert_eq!("POOL_SATURATED".parse::<RejectionReason>(), Ok(RejectionReason::PoolSaturated));
    }
}
