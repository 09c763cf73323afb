//! Adapter error type
//!
//! Wraps the domain errors surfaced through adapters together with the
//! failures only infrastructure can produce: HTTP client setup, metric
//! registration and worker lifecycle.

use std::time::Duration;

use bulwark_common::error::{ErrorClassification, ErrorSeverity};
use bulwark_domain::{ConfigError, GatewayError, MailboxError};
use thiserror::Error;

use crate::scheduling::WorkerError;

pub type InfraResult<T> = Result<T, InfraError>;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metrics export failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("job timed out after {0:?}")]
    JobTimeout(Duration),
}

impl ErrorClassification for InfraError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Mailbox(MailboxError::Unavailable(_)) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::JobTimeout(_) => true,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Config(_) | Self::Gateway(GatewayError::Config(_)) => ErrorSeverity::Critical,
            Self::Mailbox(MailboxError::CapacityExceeded { .. }) => ErrorSeverity::Warning,
            Self::JobTimeout(_) => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}
