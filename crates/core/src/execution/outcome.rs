//! Typed results of a strategy execution

use bulwark_domain::{ExecutionError, GatewayResponse, RequestState};

/// What a strategy produced for one command.
///
/// Isolation-boundary rejections and deadline overruns come back as
/// `Fallback`; other failures are returned as `Err(ExecutionError)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// The downstream answered; the status may still be a business error
    Completed(GatewayResponse),
    Fallback { response: GatewayResponse, cause: ExecutionError },
}

impl Execution {
    pub fn fallback(cause: ExecutionError) -> Self {
        Self::Fallback { response: GatewayResponse::fast_fail(&cause), cause }
    }

    pub fn response(&self) -> &GatewayResponse {
        match self {
            Self::Completed(response) | Self::Fallback { response, .. } => response,
        }
    }

    pub fn into_response(self) -> GatewayResponse {
        match self {
            Self::Completed(response) | Self::Fallback { response, .. } => response,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// State recorded in the mailbox for this result
    pub fn terminal_state(&self) -> RequestState {
        match self {
            Self::Completed(_) => RequestState::Responded,
            Self::Fallback { cause, .. } => cause.terminal_state(),
        }
    }
}

/// Whether `error` is answered by the fallback path rather than propagated
pub fn invokes_fallback(error: &ExecutionError) -> bool {
    match error {
        ExecutionError::Rejected { .. } | ExecutionError::TimedOut { .. } => true,
        ExecutionError::RetriesExhausted { cause, .. } => {
            matches!(cause.as_ref(), ExecutionError::TimedOut { .. })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bulwark_domain::RejectionReason;

    use super::*;

    #[test]
    fn rejections_and_timeouts_fall_back() {
        let rejected = ExecutionError::Rejected {
            pool_key: "k".into(),
            reason: RejectionReason::BulkheadFull,
        };
        assert!(invokes_fallback(&rejected));
        let execution = Execution::fallback(rejected);
        assert!(execution.is_fallback());
        assert_eq!(execution.response().status, 503);
        assert_eq!(execution.terminal_state(), RequestState::Rejected);

        let timed_out = ExecutionError::RetriesExhausted {
            attempts: 2,
            cause: Box::new(ExecutionError::TimedOut {
                pool_key: "k".into(),
                timeout: Duration::from_millis(5),
            }),
        };
        assert!(invokes_fallback(&timed_out));
        let execution = Execution::fallback(timed_out);
        assert_eq!(execution.response().status, 504);
        assert_eq!(execution.terminal_state(), RequestState::TimedOut);
    }

    #[test]
    fn exhausted_business_errors_propagate() {
        let exhausted = ExecutionError::RetriesExhausted {
            attempts: 3,
            cause: Box::new(ExecutionError::UnacceptableStatus { status: 503 }),
        };
        assert!(!invokes_fallback(&exhausted));
    }
}
