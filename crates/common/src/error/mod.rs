//! Error classification shared by every Bulwark error type.
//!
//! Each crate keeps its own `thiserror` enums; this module only defines the
//! vocabulary used to decide retry eligibility, alerting and log level.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Classification contract implemented by gateway error types.
///
/// The retry executor and the logging call sites consult this trait rather
/// than matching on concrete variants.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: transport failures, per-attempt
    /// timeouts, unacceptable downstream statuses. Isolation rejections are
    /// never retryable.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for monitoring, alerting, and logging decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when the error itself knows how long the
    /// caller should back off, `None` to defer to the configured backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Implement [`ErrorClassification`] from a variant table.
///
/// ```rust,ignore
/// impl_error_classification!(MyError,
///     MyError::Timeout { .. } => { retryable: true, severity: ErrorSeverity::Warning },
///     MyError::Corrupt(_) => { retryable: false, severity: ErrorSeverity::Critical },
/// );
/// ```
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty
        $(,
            $variant:pat => {
                retryable: $retryable:expr,
                severity: $severity:expr
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            fn is_retryable(&self) -> bool {
                match self {
                    $(
                        $variant => $retryable,
                    )*
                }
            }

            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    $(
                        $variant => $severity,
                    )*
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum Sample {
        Flaky,
        Broken(u8),
    }

    impl_error_classification!(Sample,
        Sample::Flaky => { retryable: true, severity: ErrorSeverity::Warning },
        Sample::Broken(_) => { retryable: false, severity: ErrorSeverity::Critical },
    );

    #[test]
    fn macro_generates_classification_table() {
        assert!(Sample::Flaky.is_retryable());
        assert!(!Sample::Flaky.is_critical());
        assert!(!Sample::Broken(1).is_retryable());
        assert!(Sample::Broken(1).is_critical());
        assert_eq!(Sample::Flaky.retry_after(), None);
    }

    #[test]
    fn severity_display_and_ordering() {
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
        assert!(ErrorSeverity::Info < ErrorSeverity::Critical);
    }
}
