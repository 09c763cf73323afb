//! Downstream invocation with retry and per-attempt deadline
//!
//! Strategies wrap [`Invoker::invoke`] in their isolation boundary; the
//! invoker itself never rejects on capacity.

use std::sync::Arc;
use std::time::Instant;

use bulwark_common::resilience::{CallOutcome, RetryError};
use bulwark_domain::{Endpoint, EndpointResolution, ExecutionError, GatewayResponse};
use tracing::{debug, instrument};

use super::command::Command;
use super::gauges::RuntimeGauges;
use super::ports::{resolve_endpoint, DiscoveryResolver, Downstream};
use super::retry::{AttemptError, RetryerCache};

/// Calls the downstream for one command, retrying per its settings
pub struct Invoker {
    downstream: Arc<dyn Downstream>,
    discovery: Arc<dyn DiscoveryResolver>,
    retryers: RetryerCache,
    gauges: Arc<RuntimeGauges>,
}

impl Invoker {
    pub fn new(
        downstream: Arc<dyn Downstream>,
        discovery: Arc<dyn DiscoveryResolver>,
        gauges: Arc<RuntimeGauges>,
    ) -> Self {
        Self { downstream, discovery, retryers: RetryerCache::new(), gauges }
    }

    pub fn retryers(&self) -> &RetryerCache {
        &self.retryers
    }

    /// Run every attempt the command's retry settings allow.
    ///
    /// With a single attempt an unacceptable status is handed back as a normal
    /// response; after several attempts it surfaces as `RetriesExhausted`.
    #[instrument(
        skip(self, command),
        fields(request_id = %command.id, pool_key = %command.pool_key())
    )]
    pub async fn invoke(&self, command: &Command) -> Result<GatewayResponse, ExecutionError> {
        let endpoint = match resolve_endpoint(&command.resolved.endpoint, self.discovery.as_ref()) {
            EndpointResolution::Ready(endpoint) => endpoint,
            EndpointResolution::NotYetAvailable => {
                return Err(ExecutionError::EndpointUnavailable {
                    service: command.resolved.service.clone(),
                });
            }
        };

        let retryer =
            self.retryers.get(&command.resolved.service, &command.resolved.api, command.retry())?;
        let outcome = retryer.execute_with_outcome(|| self.attempt(&endpoint, command)).await;
        let attempts = outcome.attempts;

        match outcome.result {
            Ok(response) => Ok(response),
            Err(RetryError::NonRetryable { source }) => Err(source.into_cause()),
            Err(exhausted) => match exhausted.into_last_error() {
                AttemptError::Unacceptable(response) if attempts <= 1 => Ok(response),
                last if attempts <= 1 => Err(last.into_cause()),
                last => {
                    debug!(attempts, "Retries exhausted");
                    Err(ExecutionError::RetriesExhausted {
                        attempts,
                        cause: Box::new(last.into_cause()),
                    })
                }
            },
        }
    }

    async fn attempt(
        &self,
        endpoint: &Endpoint,
        command: &Command,
    ) -> Result<GatewayResponse, AttemptError> {
        let timeout = command.timeout();
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.downstream.call(endpoint, command)).await;
        self.gauges.record_latency(&command.resolved.service, &command.resolved.api, started.elapsed());

        match result {
            Err(_) => Err(AttemptError::Failed(ExecutionError::TimedOut {
                pool_key: command.pool_key().to_string(),
                timeout,
            })),
            Ok(Err(transport)) => Err(AttemptError::Failed(transport.into())),
            Ok(Ok(response)) if command.resolved.is_acceptable(response.status) => Ok(response),
            Ok(Ok(response)) => Err(AttemptError::Unacceptable(response)),
        }
    }
}

/// Circuit-health classification of one invocation result
pub fn circuit_outcome(
    result: &Result<GatewayResponse, ExecutionError>,
    command: &Command,
) -> CallOutcome {
    let business = if command.resolved.circuit.trip_on_business_error {
        CallOutcome::Failure
    } else {
        CallOutcome::Success
    };
    match result {
        Ok(response) if command.resolved.is_acceptable(response.status) => CallOutcome::Success,
        Ok(_) => business,
        Err(error) => match error {
            ExecutionError::RetriesExhausted { cause, .. } => match cause.as_ref() {
                ExecutionError::TimedOut { .. } => CallOutcome::Timeout,
                ExecutionError::UnacceptableStatus { .. } => business,
                _ => CallOutcome::Failure,
            },
            ExecutionError::TimedOut { .. } => CallOutcome::Timeout,
            ExecutionError::UnacceptableStatus { .. } => business,
            ExecutionError::Rejected { .. } => CallOutcome::Rejected,
            _ => CallOutcome::Failure,
        },
    }
}
