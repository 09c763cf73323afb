//! Admission-control strategy
//!
//! One gate per resource name; no circuit. The resource is the API-level rule's
//! resource, else the service-level rule's, else the API name.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bulwark_common::resilience::{AdmissionGate, AdmissionGrade, AdmissionRule, ControlBehavior};
use bulwark_domain::{
    AdmissionGradeKind, AdmissionSettings, ControlBehaviorKind, ExecutionError, RejectionReason,
    StrategyKind,
};
use dashmap::DashMap;
use tracing::{debug, instrument};

use super::command::Command;
use super::outcome::Execution;
use super::strategy::{ResilienceStrategy, StrategyDeps};

/// Translate configured settings into a gate rule
pub fn admission_rule(settings: &AdmissionSettings) -> AdmissionRule {
    let grade = match settings.grade {
        AdmissionGradeKind::Qps => AdmissionGrade::Qps,
        AdmissionGradeKind::Concurrency => AdmissionGrade::Concurrency,
    };
    let behavior = match settings.behavior {
        ControlBehaviorKind::Direct => ControlBehavior::Direct,
        ControlBehaviorKind::WarmUp => ControlBehavior::WarmUp {
            period: Duration::from_millis(settings.warm_up_period_ms),
            cold_factor: settings.cold_factor,
        },
        ControlBehaviorKind::RateLimiter => ControlBehavior::RateLimiter {
            max_queue_wait: Duration::from_millis(settings.max_queue_wait_ms),
        },
    };
    AdmissionRule { grade, threshold: settings.threshold, behavior }
}

pub struct AdmissionControlStrategy {
    deps: StrategyDeps,
    gates: DashMap<String, Arc<AdmissionGate>>,
}

impl AdmissionControlStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps, gates: DashMap::new() }
    }

    fn gate_for(&self, resource: &str) -> Arc<AdmissionGate> {
        if let Some(gate) = self.gates.get(resource) {
            return Arc::clone(gate.value());
        }
        let entry =
            self.gates.entry(resource.to_string()).or_insert_with(|| Arc::new(AdmissionGate::new()));
        Arc::clone(entry.value())
    }
}

#[async_trait]
impl ResilienceStrategy for AdmissionControlStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AdmissionControl
    }

    #[instrument(
        skip(self, command),
        fields(request_id = %command.id, resource = %command.resolved.admission_resource)
    )]
    async fn execute(&self, command: Arc<Command>) -> Result<Execution, ExecutionError> {
        let resource = &command.resolved.admission_resource;
        let settings = command.resolved.admission.as_ref().ok_or_else(|| {
            ExecutionError::Internal(format!("no admission rule for resource {resource}"))
        })?;
        let rule = admission_rule(settings);

        let Some(_ticket) = self.gate_for(resource).enter(&rule).await else {
            debug!(threshold = rule.threshold, "Admission denied");
            let cause = ExecutionError::Rejected {
                pool_key: resource.clone(),
                reason: RejectionReason::AdmissionDenied,
            };
            return Ok(self.fallback(&command, cause));
        };

        let result = self.deps.invoker.invoke(&command).await;
        self.conclude(&command, result)
    }
}
