//! Strategy contract and registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bulwark_common::resilience::{CircuitBreakerConfig, CircuitState};
use bulwark_domain::{CircuitSettings, ExecutionError, GatewayResponse, StrategyKind};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::task::JoinHandle;
use tracing::debug;

use super::admission::AdmissionControlStrategy;
use super::bulkhead::BulkheadStrategy;
use super::command::Command;
use super::gauges::RuntimeGauges;
use super::invoker::Invoker;
use super::outcome::{invokes_fallback, Execution};
use super::pool_isolation::PoolIsolationStrategy;

/// Isolation boundary around one downstream invocation
#[async_trait]
pub trait ResilienceStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Run `command` to completion on the caller's task.
    async fn execute(&self, command: Arc<Command>) -> Result<Execution, ExecutionError>;

    /// Response used when the boundary itself rejects or times out the call
    fn fallback(&self, command: &Command, cause: ExecutionError) -> Execution {
        debug!(
            request_id = %command.id,
            pool_key = %command.pool_key(),
            strategy = %self.kind(),
            cause = %cause,
            "Fallback"
        );
        Execution::fallback(cause)
    }

    /// Turn an invocation result into an execution, routing boundary
    /// failures through [`fallback`](Self::fallback).
    fn conclude(
        &self,
        command: &Command,
        result: Result<GatewayResponse, ExecutionError>,
    ) -> Result<Execution, ExecutionError> {
        match result {
            Ok(response) => Ok(Execution::Completed(response)),
            Err(error) if invokes_fallback(&error) => Ok(self.fallback(command, error)),
            Err(error) => Err(error),
        }
    }

    /// Circuit state per pool key, for strategies that keep circuits
    fn circuit_states(&self) -> Vec<(String, CircuitState)> {
        Vec::new()
    }
}

impl dyn ResilienceStrategy {
    /// Start `command` on its own task and return immediately.
    pub fn execute_async(
        self: Arc<Self>,
        command: Arc<Command>,
    ) -> JoinHandle<Result<Execution, ExecutionError>> {
        tokio::spawn(async move { self.execute(command).await })
    }

    /// Lazy stream yielding the single terminal result once polled.
    pub fn execute_stream(
        self: Arc<Self>,
        command: Arc<Command>,
    ) -> BoxStream<'static, Result<Execution, ExecutionError>> {
        stream::once(async move { self.execute(command).await }).boxed()
    }
}

/// What every standard strategy is built from
#[derive(Clone)]
pub struct StrategyDeps {
    pub invoker: Arc<Invoker>,
    pub gauges: Arc<RuntimeGauges>,
}

/// Static map from strategy kind to its instance
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<StrategyKind, Arc<dyn ResilienceStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the three built-in strategies
    pub fn standard(deps: &StrategyDeps) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PoolIsolationStrategy::new(deps.clone())));
        registry.register(Arc::new(BulkheadStrategy::new(deps.clone())));
        registry.register(Arc::new(AdmissionControlStrategy::new(deps.clone())));
        registry
    }

    /// Install `strategy` under its own kind, replacing any previous one
    pub fn register(&mut self, strategy: Arc<dyn ResilienceStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: StrategyKind) -> Result<Arc<dyn ResilienceStrategy>, ExecutionError> {
        self.strategies
            .get(&kind)
            .cloned()
            .ok_or_else(|| ExecutionError::Internal(format!("no strategy registered for {kind}")))
    }

    pub fn circuit_states(&self) -> Vec<(String, CircuitState)> {
        self.strategies.values().flat_map(|strategy| strategy.circuit_states()).collect()
    }
}

pub(crate) fn breaker_config(settings: &CircuitSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_rate_threshold: settings.failure_rate_threshold,
        minimum_calls: settings.minimum_calls,
        window: std::time::Duration::from_millis(settings.window_ms),
        open_duration: std::time::Duration::from_millis(settings.open_duration_ms),
        half_open_max_calls: settings.half_open_max_calls,
    }
}

pub(crate) fn invalid_sizing(pool_key: &str, error: impl std::fmt::Display) -> ExecutionError {
    ExecutionError::Internal(format!("invalid sizing for {pool_key}: {error}"))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use bulwark_domain::{ApiConfig, GatewayConfig, HttpMethod, ServiceConfig};
    use futures::StreamExt;

    use super::*;
    use crate::testing::{fixtures, ScriptedDownstream, Step};

    fn harness(step: Step) -> (fixtures::Harness, Arc<ScriptedDownstream>) {
        let downstream = Arc::new(ScriptedDownstream::always(step));
        let service = ServiceConfig::new(fixtures::simple_endpoint())
            .with_api("list", ApiConfig::new(HttpMethod::Get, "/orders"));
        let config = GatewayConfig::default().with_service("orders", service);
        (fixtures::Harness::new(config, &downstream), downstream)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn execute_async_returns_before_downstream_completes() {
        let (harness, downstream) = harness(Step::delayed(Duration::from_millis(300), 200));
        let registry = StrategyRegistry::standard(&harness.deps());
        let strategy = registry.get(StrategyKind::PoolIsolation).unwrap();

        let started = Instant::now();
        let handle = strategy.execute_async(harness.command("orders", "list"));
        assert!(started.elapsed() < Duration::from_millis(100), "caller was blocked");
        assert!(!handle.is_finished());

        let execution = handle.await.unwrap().unwrap();
        assert_eq!(execution.response().status, 200);
        assert_eq!(downstream.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn execute_stream_is_lazy_and_yields_once() {
        let (harness, downstream) = harness(Step::status(200));
        let strategy = StrategyRegistry::standard(&harness.deps()).get(StrategyKind::Bulkhead).unwrap();

        let mut stream = strategy.execute_stream(harness.command("orders", "list"));
        assert_eq!(downstream.calls(), 0);

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
        assert_eq!(downstream.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn standard_registry_holds_every_kind() {
        let (harness, _) = harness(Step::status(200));
        let registry = StrategyRegistry::standard(&harness.deps());
        for kind in [StrategyKind::PoolIsolation, StrategyKind::Bulkhead, StrategyKind::AdmissionControl] {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }
}
