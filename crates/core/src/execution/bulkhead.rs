//! Semaphore bulkhead plus circuit breaker per pool key

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bulwark_common::resilience::{Bulkhead, BulkheadConfig, CircuitBreaker, CircuitState};
use bulwark_domain::{ExecutionError, RejectionReason, StrategyKind};
use dashmap::DashMap;
use tracing::{debug, instrument};

use super::command::Command;
use super::invoker::circuit_outcome;
use super::outcome::Execution;
use super::strategy::{breaker_config, invalid_sizing, ResilienceStrategy, StrategyDeps};

struct Isolation {
    bulkhead: Arc<Bulkhead>,
    breaker: CircuitBreaker,
}

/// Bounds concurrent in-flight calls per pool key on the caller's task.
///
/// A caller that cannot get a permit within `max_wait_ms` is rejected; the
/// rejection is not counted against the circuit.
pub struct BulkheadStrategy {
    deps: StrategyDeps,
    isolations: DashMap<String, Arc<Isolation>>,
}

impl BulkheadStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps, isolations: DashMap::new() }
    }

    fn isolation_for(&self, command: &Command) -> Result<Arc<Isolation>, ExecutionError> {
        let pool_key = command.pool_key();
        let sizing = BulkheadConfig::new(
            command.limits.max_concurrency,
            Duration::from_millis(command.limits.max_wait_ms),
        );
        let circuit = breaker_config(&command.resolved.circuit);

        let existing = self.isolations.get(pool_key).map(|entry| Arc::clone(entry.value()));
        let isolation = match existing {
            Some(isolation) => {
                isolation.bulkhead.reconfigure(sizing).map_err(|e| invalid_sizing(pool_key, e))?;
                isolation.breaker.reconfigure(circuit).map_err(|e| invalid_sizing(pool_key, e))?;
                isolation
            }
            None => {
                let created = Arc::new(Isolation {
                    bulkhead: Arc::new(
                        Bulkhead::new(sizing).map_err(|e| invalid_sizing(pool_key, e))?,
                    ),
                    breaker: CircuitBreaker::new(circuit).map_err(|e| invalid_sizing(pool_key, e))?,
                });
                let entry = self.isolations.entry(pool_key.to_string()).or_insert(created);
                Arc::clone(entry.value())
            }
        };

        self.deps.gauges.register_bulkhead(&command.resolved, &isolation.bulkhead);
        Ok(isolation)
    }
}

#[async_trait]
impl ResilienceStrategy for BulkheadStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Bulkhead
    }

    #[instrument(
        skip(self, command),
        fields(request_id = %command.id, pool_key = %command.pool_key())
    )]
    async fn execute(&self, command: Arc<Command>) -> Result<Execution, ExecutionError> {
        let isolation = self.isolation_for(&command)?;
        let rejected = |reason| ExecutionError::Rejected {
            pool_key: command.pool_key().to_string(),
            reason,
        };

        if !isolation.breaker.try_acquire() {
            debug!("Circuit open, short-circuiting to fallback");
            return Ok(self.fallback(&command, rejected(RejectionReason::CircuitOpen)));
        }

        let Some(_permit) = isolation.bulkhead.acquire().await else {
            isolation.breaker.release_unused();
            debug!(max_concurrency = command.limits.max_concurrency, "Bulkhead full");
            return Ok(self.fallback(&command, rejected(RejectionReason::BulkheadFull)));
        };

        let result = self.deps.invoker.invoke(&command).await;
        isolation.breaker.record(circuit_outcome(&result, &command));
        self.conclude(&command, result)
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
    use bulwark_domain::{ApiConfig, GatewayConfig, HttpMethod, ServiceConfig, TransportError};

    use super::*;
    use crate::testing::{fixtures, ScriptedDownstream, Step};

    fn config(max_concurrency: usize) -> GatewayConfig {
        let mut service = ServiceConfig::new(fixtures::simple_endpoint())
            .with_api("list", ApiConfig::new(HttpMethod::Get, "/orders"));
        service.strategy = StrategyKind::Bulkhead;
        service.pool.max_concurrency = max_concurrency;
        service.pool.max_wait_ms = 10;
        service.circuit.minimum_calls = 2;
        service.circuit.open_duration_ms = 60_000;
        GatewayConfig::default().with_service("orders", service)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_bulkhead_rejects_without_tripping_circuit() {
        let downstream =
            Arc::new(ScriptedDownstream::always(Step::delayed(Duration::from_millis(300), 200)));
        let harness = fixtures::Harness::new(config(1), &downstream);
        let strategy = Arc::new(BulkheadStrategy::new(harness.deps()));

        let busy = {
            let strategy = Arc::clone(&strategy);
            let command = harness.command("orders", "list");
            tokio::spawn(async move { strategy.execute(command).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        for _ in 0..3 {
            let execution = strategy.execute(harness.command("orders", "list")).await.unwrap();
            assert!(matches!(
                execution,
                Execution::Fallback {
                    cause: ExecutionError::Rejected { reason: RejectionReason::BulkheadFull, .. },
                    ..
                }
            ));
        }

        assert_eq!(busy.await.unwrap().unwrap().response().status, 200);
        assert_eq!(strategy.circuit_states(), vec![("orders-list".to_string(), CircuitState::Closed)]);
        assert_eq!(downstream.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transport_failures_open_circuit() {
        let downstream = Arc::new(ScriptedDownstream::always(Step::Fail(
            TransportError::Protocol("bad frame".into()),
        )));
        let harness = fixtures::Harness::new(config(4), &downstream);
        let strategy = BulkheadStrategy::new(harness.deps());

        for _ in 0..2 {
            assert!(strategy.execute(harness.command("orders", "list")).await.is_err());
        }
        let execution = strategy.execute(harness.command("orders", "list")).await.unwrap();
        assert!(execution.is_fallback());
        assert_eq!(downstream.calls(), 2);
    }
}
