//! Immutable execution unit

use std::time::Duration;

use bulwark_domain::{
    ExecutionError, GatewayRequest, PoolSettings, ResolvedApi, RetrySettings, StrategyKind,
};

use crate::config_holder::ConfigSnapshot;
use crate::degrade::{degrade_millis, degrade_size, DegradeRegistry};

/// One inbound call bound to the configuration generation it was built from.
///
/// `limits` already carries the degrade factor that was in force at build
/// time; a factor changed afterwards affects only later commands.
#[derive(Debug, Clone)]
pub struct Command {
    pub id: String,
    pub request: GatewayRequest,
    pub resolved: ResolvedApi,
    pub limits: PoolSettings,
    pub degrade_factor: f64,
}

impl Command {
    /// Resolve `request` against exactly one snapshot
    pub fn build(
        id: impl Into<String>,
        request: GatewayRequest,
        snapshot: &ConfigSnapshot,
        degrade: &DegradeRegistry,
    ) -> Result<Self, ExecutionError> {
        let resolved = snapshot.config.resolve(&request.service, &request.api, snapshot.generation)?;
        let degrade_factor = degrade.factor(&resolved.pool_key);
        let limits = degraded_limits(&resolved.pool, degrade_factor);

        Ok(Self { id: id.into(), request, resolved, limits, degrade_factor })
    }

    pub fn pool_key(&self) -> &str {
        &self.resolved.pool_key
    }

    pub fn strategy(&self) -> StrategyKind {
        self.resolved.strategy
    }

    pub fn retry(&self) -> Option<&RetrySettings> {
        self.resolved.retry.as_ref()
    }

    /// Deadline for one downstream attempt, after degrade
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.limits.timeout_ms)
    }

    pub fn generation(&self) -> u64 {
        self.resolved.generation
    }
}

fn degraded_limits(pool: &PoolSettings, factor: f64) -> PoolSettings {
    if factor >= 1.0 {
        return pool.clone();
    }
    let max_size = degrade_size(pool.max_size, factor);
    PoolSettings {
        core_size: ((pool.core_size as f64 * factor).floor() as usize).min(max_size),
        max_size,
        queue_size: pool.queue_size,
        timeout_ms: degrade_millis(pool.timeout_ms, factor),
        max_concurrency: degrade_size(pool.max_concurrency, factor),
        max_wait_ms: pool.max_wait_ms,
    }
}
