//! Runtime assembly
//!
//! Wires a [`Gateway`] to the infrastructure adapters and owns the
//! background workers that keep it tuned:
//!
//! 1. Collector: scrapes runtime gauges every `metrics.scrape_interval_secs`
//! 2. Optimizer: tunes pools and timeouts every `optimizer.interval_secs`
//! 3. Mailbox purge: drops expired entries
//! 4. Config refresh (optional): re-reads the configuration source
//! 5. Circuit export (optional): mirrors breaker states into Prometheus
//!
//! # Example
//!
//! ```rust,ignore
//! let config = bulwark_infra::config::load()?;
//! let mut runtime = GatewayRuntime::builder(config)
//!     .downstream(downstream)
//!     .config_source(Arc::new(FileConfigSource::new("bulwark.toml")))
//!     .with_prometheus()
//!     .build()?;
//! runtime.start()?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use bulwark_core::{
    ConfigHolder, DiscoveryResolver, Downstream, Gateway, GaugeSource, MailboxStore,
    MetricsCache, MetricsCollector, Optimizer,
};
use bulwark_domain::{ConfigError, GatewayConfig};
use tracing::{info, warn};

use crate::config::{ConfigRefresher, ConfigSource};
use crate::errors::InfraError;
use crate::http::HttpCallbackTransport;
use crate::mailbox::InMemoryMailboxStore;
use crate::observability::{MirroredGaugeSource, PrometheusExporter};
use crate::scheduling::{
    CircuitExportJob, CollectorJob, ConfigRefreshJob, IntervalWorker, MailboxPurgeJob,
    OptimizerJob, WorkerConfig,
};

const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub struct GatewayRuntimeBuilder {
    config: GatewayConfig,
    downstream: Option<Arc<dyn Downstream>>,
    discovery: Option<Arc<dyn DiscoveryResolver>>,
    config_source: Option<Arc<dyn ConfigSource>>,
    refresh_interval: Duration,
    purge_interval: Duration,
    prometheus: bool,
}

impl GatewayRuntimeBuilder {
    #[must_use]
    pub fn downstream(mut self, downstream: Arc<dyn Downstream>) -> Self {
        self.downstream = Some(downstream);
        self
    }

    #[must_use]
    pub fn discovery(mut self, discovery: Arc<dyn DiscoveryResolver>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Enable periodic refresh from `source`
    #[must_use]
    pub fn config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config_source = Some(source);
        self
    }

    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    #[must_use]
    pub fn purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Mirror gauges and circuit states into a Prometheus registry
    #[must_use]
    pub fn with_prometheus(mut self) -> Self {
        self.prometheus = true;
        self
    }

    /// # Errors
    /// Returns `InfraError` if the configuration is invalid, no downstream
    /// was supplied, or an adapter cannot be constructed.
    pub fn build(self) -> Result<GatewayRuntime, InfraError> {
        let holder = Arc::new(ConfigHolder::new(self.config)?);
        let snapshot = holder.current();
        let settings = &snapshot.config;

        let downstream = self
            .downstream
            .ok_or_else(|| ConfigError::invalid("downstream", "a downstream must be supplied"))?;

        let store = Arc::new(InMemoryMailboxStore::from_settings(&settings.mailbox));
        let transport = HttpCallbackTransport::builder()
            .default_timeout(Duration::from_millis(settings.callback.timeout_ms))
            .build()?;

        let mut gateway = Gateway::builder(Arc::clone(&holder))
            .downstream(downstream)
            .mailbox_store(Arc::clone(&store) as Arc<dyn MailboxStore>)
            .callback_transport(Arc::new(transport));
        if let Some(discovery) = self.discovery {
            gateway = gateway.discovery(discovery);
        }
        let gateway = Arc::new(gateway.build()?);

        let exporter = if self.prometheus { Some(Arc::new(PrometheusExporter::new()?)) } else { None };
        let gauges: Arc<dyn GaugeSource> = gateway.gauges().clone();
        let gauges: Arc<dyn GaugeSource> = match &exporter {
            Some(exporter) => Arc::new(MirroredGaugeSource::new(gauges, Arc::clone(exporter))),
            None => gauges,
        };

        let cache = Arc::new(MetricsCache::new(Duration::from_secs(settings.metrics.window_secs)));
        let collector = Arc::new(MetricsCollector::new(gauges, Arc::clone(&cache), Arc::clone(&holder)));
        let optimizer = Arc::new(Optimizer::new(cache, Arc::clone(&holder)));
        let scrape = WorkerConfig::every_secs(settings.metrics.scrape_interval_secs);

        let refresher = self
            .config_source
            .map(|source| Arc::new(ConfigRefresher::new(source, Arc::clone(&holder))));

        Ok(GatewayRuntime {
            collector: IntervalWorker::new(Arc::new(CollectorJob::new(collector)), scrape),
            optimizer: IntervalWorker::new(
                Arc::new(OptimizerJob::new(optimizer)),
                WorkerConfig::every_secs(settings.optimizer.interval_secs),
            ),
            purge: IntervalWorker::new(
                Arc::new(MailboxPurgeJob::new(Arc::clone(&store))),
                WorkerConfig::every(self.purge_interval),
            ),
            refresh: refresher.as_ref().map(|refresher| {
                IntervalWorker::new(
                    Arc::new(ConfigRefreshJob::new(Arc::clone(refresher))),
                    WorkerConfig::every(self.refresh_interval),
                )
            }),
            circuit_export: exporter.as_ref().map(|exporter| {
                IntervalWorker::new(
                    Arc::new(CircuitExportJob::new(Arc::clone(&gateway), Arc::clone(exporter))),
                    scrape,
                )
            }),
            gateway,
            holder,
            store,
            exporter,
            refresher,
        })
    }
}

/// A gateway plus the workers and adapters around it
pub struct GatewayRuntime {
    gateway: Arc<Gateway>,
    holder: Arc<ConfigHolder>,
    store: Arc<InMemoryMailboxStore>,
    exporter: Option<Arc<PrometheusExporter>>,
    refresher: Option<Arc<ConfigRefresher>>,
    collector: IntervalWorker<CollectorJob>,
    optimizer: IntervalWorker<OptimizerJob>,
    purge: IntervalWorker<MailboxPurgeJob>,
    refresh: Option<IntervalWorker<ConfigRefreshJob>>,
    circuit_export: Option<IntervalWorker<CircuitExportJob>>,
}

impl GatewayRuntime {
    pub fn builder(config: GatewayConfig) -> GatewayRuntimeBuilder {
        GatewayRuntimeBuilder {
            config,
            downstream: None,
            discovery: None,
            config_source: None,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            purge_interval: DEFAULT_PURGE_INTERVAL,
            prometheus: false,
        }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn config(&self) -> &Arc<ConfigHolder> {
        &self.holder
    }

    pub fn mailbox_store(&self) -> &Arc<InMemoryMailboxStore> {
        &self.store
    }

    pub fn exporter(&self) -> Option<&Arc<PrometheusExporter>> {
        self.exporter.as_ref()
    }

    pub fn refresher(&self) -> Option<&Arc<ConfigRefresher>> {
        self.refresher.as_ref()
    }

    /// Start every worker. Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns `WorkerError::AlreadyRunning` on a second start.
    pub fn start(&mut self) -> Result<(), InfraError> {
        self.collector.start()?;
        self.optimizer.start()?;
        self.purge.start()?;
        if let Some(refresh) = self.refresh.as_mut() {
            refresh.start()?;
        }
        if let Some(export) = self.circuit_export.as_mut() {
            export.start()?;
        }
        info!(generation = self.holder.generation(), "Gateway runtime started");
        Ok(())
    }

    /// Stop every worker, continuing past individual failures.
    ///
    /// # Errors
    /// Returns the first worker error encountered.
    pub async fn stop(&mut self) -> Result<(), InfraError> {
        let mut results = vec![
            self.collector.stop().await,
            self.optimizer.stop().await,
            self.purge.stop().await,
        ];
        if let Some(refresh) = self.refresh.as_mut() {
            results.push(refresh.stop().await);
        }
        if let Some(export) = self.circuit_export.as_mut() {
            results.push(export.stop().await);
        }

        let mut first = None;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "Worker failed to stop cleanly");
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e.into()),
            None => {
                info!("Gateway runtime stopped");
                Ok(())
            }
        }
    }
}
