//! Shared configuration and wiring for strategy tests

#![allow(clippy::missing_panics_doc, clippy::expect_used)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bulwark_domain::{EndpointSpec, GatewayConfig, GatewayRequest};

use super::mocks::ScriptedDownstream;
use crate::config_holder::ConfigHolder;
use crate::degrade::DegradeRegistry;
use crate::execution::{Command, Downstream, Invoker, NoDiscovery, RuntimeGauges, StrategyDeps};

pub fn simple_endpoint() -> EndpointSpec {
    EndpointSpec::Simple { scheme: "http".into(), host: "orders.local".into(), port: 8080 }
}

/// Config holder, degrade registry and strategy deps around one downstream
pub struct Harness {
    pub holder: Arc<ConfigHolder>,
    pub degrade: Arc<DegradeRegistry>,
    deps: StrategyDeps,
    next_id: AtomicU64,
}

impl Harness {
    pub fn new(config: GatewayConfig, downstream: &Arc<ScriptedDownstream>) -> Self {
        let holder = Arc::new(ConfigHolder::new(config).expect("valid test configuration"));
        let gauges = Arc::new(RuntimeGauges::new(Vec::new()));
        let invoker = Arc::new(Invoker::new(
            Arc::clone(downstream) as Arc<dyn Downstream>,
            Arc::new(NoDiscovery),
            Arc::clone(&gauges),
        ));
        Self {
            holder,
            degrade: Arc::new(DegradeRegistry::new()),
            deps: StrategyDeps { invoker, gauges },
            next_id: AtomicU64::new(1),
        }
    }

    pub fn deps(&self) -> StrategyDeps {
        self.deps.clone()
    }

    /// Command for `service/api` against the live snapshot
    pub fn command(&self, service: &str, api: &str) -> Arc<Command> {
        let id = format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let command = Command::build(
            id,
            GatewayRequest::new(service, api),
            &self.holder.current(),
            &self.degrade,
        )
        .expect("route exists in test configuration");
        Arc::new(command)
    }
}
