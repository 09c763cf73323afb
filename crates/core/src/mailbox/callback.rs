//! Callback delivery with its own bounded retry
//!
//! Independent of the downstream retry settings. A failed delivery is logged
//! and reported; it never changes the mailbox entry.

use std::sync::Arc;
use std::time::Duration;

use bulwark_common::resilience::{
    AlwaysRetry, BackoffStrategy, RetryConfig, RetryError, RetryExecutor,
};
use bulwark_domain::{CallbackTarget, GatewayResponse, RequestState};
use tracing::{debug, instrument, warn};

use super::ports::{CallbackDelivery, CallbackError, CallbackTransport};
use crate::config_holder::ConfigHolder;

/// Result of one delivery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: bool,
    pub attempts: u32,
    pub last_error: Option<CallbackError>,
}

pub struct CallbackDispatcher {
    transport: Arc<dyn CallbackTransport>,
    config: Arc<ConfigHolder>,
}

impl CallbackDispatcher {
    pub fn new(transport: Arc<dyn CallbackTransport>, config: Arc<ConfigHolder>) -> Self {
        Self { transport, config }
    }

    /// Deliver a terminal result to `target`
    #[instrument(skip(self, target, response), fields(url = %target.url))]
    pub async fn deliver(
        &self,
        request_id: &str,
        target: &CallbackTarget,
        state: RequestState,
        response: &GatewayResponse,
    ) -> DeliveryReport {
        let settings = self.config.current().config.callback.clone();
        let timeout = target.timeout.unwrap_or(Duration::from_millis(settings.timeout_ms));
        let retry = RetryConfig {
            max_attempts: settings.max_attempts.max(1),
            backoff: BackoffStrategy::Fixed { delay: Duration::from_millis(settings.backoff_ms) },
            max_total_time: None,
        };
        let executor = match RetryExecutor::new(retry, AlwaysRetry) {
            Ok(executor) => executor,
            Err(e) => {
                warn!(error = %e, "Invalid callback retry settings");
                return DeliveryReport {
                    delivered: false,
                    attempts: 0,
                    last_error: Some(CallbackError::Transport(e.to_string())),
                };
            }
        };

        let delivery = CallbackDelivery {
            request_id: request_id.to_string(),
            state,
            response: response.clone(),
        };
        let transport = &self.transport;
        let delivery = &delivery;
        let outcome = executor
            .execute_with_outcome(|| async move {
                match tokio::time::timeout(timeout, transport.deliver(target, delivery)).await {
                    Ok(result) => result,
                    Err(_) => Err(CallbackError::Timeout(timeout)),
                }
            })
            .await;

        let attempts = outcome.attempts;
        match outcome.result {
            Ok(()) => {
                debug!(attempts, "Callback delivered");
                DeliveryReport { delivered: true, attempts, last_error: None }
            }
            Err(error) => {
                let last_error = match error {
                    RetryError::AttemptsExhausted { last_error, .. }
                    | RetryError::TimeoutExceeded { last_error, .. } => last_error,
                    RetryError::NonRetryable { source } => source,
                };
                warn!(request_id, attempts, error = %last_error, "Callback delivery failed");
                DeliveryReport { delivered: false, attempts, last_error: Some(last_error) }
            }
        }
    }
}
