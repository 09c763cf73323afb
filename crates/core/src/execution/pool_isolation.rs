//! Worker pool plus circuit breaker per pool key

use std::sync::Arc;

use async_trait::async_trait;
use bulwark_common::resilience::{
    CallOutcome, CircuitBreaker, CircuitState, ResilienceError, WorkerPool, WorkerPoolConfig,
};
use bulwark_domain::{ExecutionError, RejectionReason, StrategyKind};
use dashmap::DashMap;
use tracing::{debug, instrument, warn};

use super::command::Command;
use super::invoker::circuit_outcome;
use super::outcome::Execution;
use super::strategy::{breaker_config, invalid_sizing, ResilienceStrategy, StrategyDeps};

struct Isolation {
    pool: Arc<WorkerPool>,
    breaker: CircuitBreaker,
}

/// Runs each call on a bounded pool owned by its pool key.
///
/// Saturation (no worker and no queue slot) is rejected immediately and
/// counted against the circuit.
pub struct PoolIsolationStrategy {
    deps: StrategyDeps,
    isolations: DashMap<String, Arc<Isolation>>,
}

impl PoolIsolationStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps, isolations: DashMap::new() }
    }

    /// Isolation for the command's key, resized to the command's limits
    fn isolation_for(&self, command: &Command) -> Result<Arc<Isolation>, ExecutionError> {
        let pool_key = command.pool_key();
        let pool_config = WorkerPoolConfig {
            core_size: command.limits.core_size,
            max_size: command.limits.max_size,
            queue_size: command.limits.queue_size,
            queue_timeout: Some(command.timeout()),
        };
        let circuit = breaker_config(&command.resolved.circuit);

        let existing = self.isolations.get(pool_key).map(|entry| Arc::clone(entry.value()));
        let isolation = match existing {
            Some(isolation) => {
                isolation.pool.reconfigure(pool_config).map_err(|e| invalid_sizing(pool_key, e))?;
                isolation.breaker.reconfigure(circuit).map_err(|e| invalid_sizing(pool_key, e))?;
                isolation
            }
            None => {
                let created = Arc::new(Isolation {
                    pool: Arc::new(
                        WorkerPool::new(pool_config).map_err(|e| invalid_sizing(pool_key, e))?,
                    ),
                    breaker: CircuitBreaker::new(circuit).map_err(|e| invalid_sizing(pool_key, e))?,
                });
                let entry = self.isolations.entry(pool_key.to_string()).or_insert(created);
                Arc::clone(entry.value())
            }
        };

        self.deps.gauges.register_pool(&command.resolved, &isolation.pool);
        Ok(isolation)
    }

    fn rejected(command: &Command, reason: RejectionReason) -> ExecutionError {
        ExecutionError::Rejected { pool_key: command.pool_key().to_string(), reason }
    }
}

#[async_trait]
impl ResilienceStrategy for PoolIsolationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PoolIsolation
    }

    #[instrument(
        skip(self, command),
        fields(request_id = %command.id, pool_key = %command.pool_key())
    )]
    async fn execute(&self, command: Arc<Command>) -> Result<Execution, ExecutionError> {
        let isolation = self.isolation_for(&command)?;

        if !isolation.breaker.try_acquire() {
            debug!("Circuit open, short-circuiting to fallback");
            return Ok(self.fallback(&command, Self::rejected(&command, RejectionReason::CircuitOpen)));
        }

        let invoker = Arc::clone(&self.deps.invoker);
        let job_command = Arc::clone(&command);
        let result =
            isolation.pool.execute(async move { invoker.invoke(&job_command).await }).await;

        match result {
            Ok(response) => {
                let result = Ok(response);
                isolation.breaker.record(circuit_outcome(&result, &command));
                self.conclude(&command, result)
            }
            Err(ResilienceError::OperationFailed { source }) => {
                let result = Err(source);
                isolation.breaker.record(circuit_outcome(&result, &command));
                self.conclude(&command, result)
            }
            Err(ResilienceError::PoolSaturated { max_size, queue_size }) => {
                debug!(max_size, queue_size, "Pool saturated");
                isolation.breaker.record(CallOutcome::Rejected);
                Ok(self.fallback(&command, Self::rejected(&command, RejectionReason::PoolSaturated)))
            }
            Err(ResilienceError::Timeout { timeout }) => {
                isolation.breaker.record(CallOutcome::Timeout);
                let cause =
                    ExecutionError::TimedOut { pool_key: command.pool_key().to_string(), timeout };
                Ok(self.fallback(&command, cause))
            }
            Err(other) => {
                warn!(error = %other, "Pool job ended without a result");
                isolation.breaker.record(CallOutcome::Failure);
                Err(ExecutionError::Internal(other.to_string()))
            }
        }
    }

    fn circuit_states(&self) -> Vec<(String, CircuitState)> {
        self.isolations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().breaker.get_state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bulwark_domain::{ApiConfig, GatewayConfig, HttpMethod, ServiceConfig, TransportError};

    use super::*;
    use crate::testing::{fixtures, ScriptedDownstream, Step};

    fn service() -> ServiceConfig {
        let mut service = ServiceConfig::new(fixtures::simple_endpoint())
            .with_api("list", ApiConfig::new(HttpMethod::Get, "/orders"));
        service.circuit.minimum_calls = 2;
        service.circuit.open_duration_ms = 60_000;
        service
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completed_call_returns_downstream_response() {
        let downstream = Arc::new(ScriptedDownstream::always(Step::status(200)));
        let harness = fixtures::Harness::new(GatewayConfig::default().with_service("orders", service()), &downstream);
        let strategy = PoolIsolationStrategy::new(harness.deps());

        let execution = strategy.execute(harness.command("orders", "list")).await.unwrap();
        assert_eq!(execution, Execution::Completed(bulwark_domain::GatewayResponse::new(200, "ok")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_circuit_skips_downstream() {
        let downstream = Arc::new(ScriptedDownstream::always(Step::Fail(
            TransportError::Connection("refused".into()),
        )));
        let harness = fixtures::Harness::new(GatewayConfig::default().with_service("orders", service()), &downstream);
        let strategy = PoolIsolationStrategy::new(harness.deps());

        for _ in 0..2 {
            let result = strategy.execute(harness.command("orders", "list")).await;
            assert!(matches!(result, Err(ExecutionError::Transport(_))));
        }
        assert_eq!(downstream.calls(), 2);
        assert_eq!(strategy.circuit_states(), vec![("orders-list".to_string(), CircuitState::Open)]);

        let execution = strategy.execute(harness.command("orders", "list")).await.unwrap();
        assert_eq!(execution.response().status, 503);
        assert!(matches!(
            execution,
            Execution::Fallback {
                cause: ExecutionError::Rejected { reason: RejectionReason::CircuitOpen, .. },
                ..
            }
        ));
        assert_eq!(downstream.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn saturated_pool_rejects_to_fallback() {
        let downstream =
            Arc::new(ScriptedDownstream::always(Step::delayed(Duration::from_millis(300), 200)));
        let mut service = service();
        service.pool.core_size = 1;
        service.pool.max_size = 1;
        service.pool.queue_size = 0;
        let harness = fixtures::Harness::new(GatewayConfig::default().with_service("orders", service), &downstream);
        let strategy = Arc::new(PoolIsolationStrategy::new(harness.deps()));

        let busy = {
            let strategy = Arc::clone(&strategy);
            let command = harness.command("orders", "list");
            tokio::spawn(async move { strategy.execute(command).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rejected = strategy.execute(harness.command("orders", "list")).await.unwrap();
        assert!(matches!(
            rejected,
            Execution::Fallback {
                cause: ExecutionError::Rejected { reason: RejectionReason::PoolSaturated, .. },
                ..
            }
        ));
        assert_eq!(busy.await.unwrap().unwrap().response().status, 200);
        assert_eq!(downstream.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn attempt_timeout_falls_back_with_gateway_timeout() {
        let downstream =
            Arc::new(ScriptedDownstream::always(Step::delayed(Duration::from_millis(300), 200)));
        let mut service = service();
        service.pool.timeout_ms = 20;
        let harness = fixtures::Harness::new(GatewayConfig::default().with_service("orders", service), &downstream);
        let strategy = PoolIsolationStrategy::new(harness.deps());

        let execution = strategy.execute(harness.command("orders", "list")).await.unwrap();
        assert!(execution.is_fallback());
        assert_eq!(execution.response().status, 504);
        assert_eq!(execution.terminal_state(), bulwark_domain::RequestState::TimedOut);
    }
}
