//! Periodic jobs driving the engine's feedback loop and housekeeping

use std::sync::Arc;

use async_trait::async_trait;
use bulwark_core::{Gateway, MetricsCollector, Optimizer};
use chrono::Utc;
use tracing::{debug, info};

use super::worker::PeriodicJob;
use crate::config::refresh::{ConfigRefresher, RefreshOutcome};
use crate::errors::InfraError;
use crate::mailbox::InMemoryMailboxStore;
use crate::observability::PrometheusExporter;

/// Scrapes runtime gauges into the metrics cache
pub struct CollectorJob {
    collector: Arc<MetricsCollector>,
}

impl CollectorJob {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }
}

#[async_trait]
impl PeriodicJob for CollectorJob {
    fn name(&self) -> &'static str {
        "metrics-collector"
    }

    async fn run(&self) -> Result<(), InfraError> {
        let report = self.collector.collect(Utc::now());
        debug!(readings = report.readings, samples = report.samples, "Collected gauges");
        Ok(())
    }
}

/// Tunes pool sizes and timeouts from the cached samples
pub struct OptimizerJob {
    optimizer: Arc<Optimizer>,
}

impl OptimizerJob {
    pub fn new(optimizer: Arc<Optimizer>) -> Self {
        Self { optimizer }
    }
}

#[async_trait]
impl PeriodicJob for OptimizerJob {
    fn name(&self) -> &'static str {
        "optimizer"
    }

    async fn run(&self) -> Result<(), InfraError> {
        let report = self.optimizer.run_once(Utc::now())?;
        if let Some(generation) = report.generation {
            info!(generation, adjustments = report.adjustments.len(), "Optimizer published");
        }
        Ok(())
    }
}

/// Re-reads the configuration source
pub struct ConfigRefreshJob {
    refresher: Arc<ConfigRefresher>,
}

impl ConfigRefreshJob {
    pub fn new(refresher: Arc<ConfigRefresher>) -> Self {
        Self { refresher }
    }
}

#[async_trait]
impl PeriodicJob for ConfigRefreshJob {
    fn name(&self) -> &'static str {
        "config-refresh"
    }

    async fn run(&self) -> Result<(), InfraError> {
        // Rejections are logged by the refresher and never stop the loop.
        if let RefreshOutcome::Published { generation } = self.refresher.refresh().await {
            debug!(generation, "Config refresh published");
        }
        Ok(())
    }
}

/// Drops expired mailbox entries
pub struct MailboxPurgeJob {
    store: Arc<InMemoryMailboxStore>,
}

impl MailboxPurgeJob {
    pub fn new(store: Arc<InMemoryMailboxStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PeriodicJob for MailboxPurgeJob {
    fn name(&self) -> &'static str {
        "mailbox-purge"
    }

    async fn run(&self) -> Result<(), InfraError> {
        self.store.purge_expired(Utc::now());
        Ok(())
    }
}

/// Publishes circuit breaker states to the Prometheus exporter
pub struct CircuitExportJob {
    gateway: Arc<Gateway>,
    exporter: Arc<PrometheusExporter>,
}

impl CircuitExportJob {
    pub fn new(gateway: Arc<Gateway>, exporter: Arc<PrometheusExporter>) -> Self {
        Self { gateway, exporter }
    }
}

#[async_trait]
impl PeriodicJob for CircuitExportJob {
    fn name(&self) -> &'static str {
        "circuit-export"
    }

    async fn run(&self) -> Result<(), InfraError> {
        self.exporter.record_circuits(&self.gateway.circuit_states());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bulwark_core::{ConfigHolder, MailboxStore, MetricsCache};
    use bulwark_domain::{GatewayConfig, GatewayRequest};

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn purge_job_removes_expired_entries() {
        let store = Arc::new(InMemoryMailboxStore::new(10, Duration::from_secs(3600)));
        store
            .save_request("r1", None, None, &GatewayRequest::new("orders", "list"), Some(Duration::ZERO))
            .await
            .unwrap();

        MailboxPurgeJob::new(Arc::clone(&store)).run().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disabled_optimizer_job_is_a_no_op() {
        let mut config = GatewayConfig::default();
        config.optimizer.enabled = false;
        let holder = Arc::new(ConfigHolder::new(config).unwrap());
        let cache = Arc::new(MetricsCache::new(Duration::from_secs(60)));
        let job = OptimizerJob::new(Arc::new(Optimizer::new(cache, Arc::clone(&holder))));

        job.run().await.unwrap();
        assert_eq!(holder.generation(), 1);
    }
}
