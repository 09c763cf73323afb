//! Gateway entry point
//!
//! Resolves each inbound request into a [`Command`], dispatches it to the
//! configured strategy and, for mailbox modes, drives the request lifecycle
//! on a background task.

use std::sync::Arc;

use bulwark_common::resilience::CircuitState;
use bulwark_domain::constants::STATUS_ACCEPTED;
use bulwark_domain::{
    ConfigError, ExecutionError, ExecutionMode, GatewayError, GatewayRequest, GatewayResponse,
    RequestMetadata, RequestState,
};
use futures::stream::BoxStream;
use tracing::{debug, error, info, instrument};

use crate::config_holder::ConfigHolder;
use crate::degrade::DegradeRegistry;
use crate::execution::{
    Command, DiscoveryResolver, Downstream, Execution, Invoker, NoDiscovery, ResilienceStrategy,
    RuntimeGauges, StrategyDeps, StrategyRegistry,
};
use crate::mailbox::{CallbackDispatcher, CallbackTransport, MailboxService, MailboxStore};

/// Result of handing a request to the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Sync mode ran to completion
    Completed(Execution),
    /// Mailbox mode; the result is recorded under `request_id`
    Accepted { request_id: String, status: u16 },
}

impl Submission {
    pub fn into_response(self) -> GatewayResponse {
        match self {
            Self::Completed(execution) => execution.into_response(),
            Self::Accepted { request_id, .. } => GatewayResponse::accepted(&request_id),
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Completed(_) => None,
            Self::Accepted { request_id, .. } => Some(request_id),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct GatewayBuilder {
    config: Arc<ConfigHolder>,
    degrade: Option<Arc<DegradeRegistry>>,
    downstream: Option<Arc<dyn Downstream>>,
    discovery: Option<Arc<dyn DiscoveryResolver>>,
    mailbox_store: Option<Arc<dyn MailboxStore>>,
    callback_transport: Option<Arc<dyn CallbackTransport>>,
}

impl GatewayBuilder {
    pub fn downstream(mut self, downstream: Arc<dyn Downstream>) -> Self {
        self.downstream = Some(downstream);
        self
    }

    /// Defaults to [`NoDiscovery`]
    pub fn discovery(mut self, discovery: Arc<dyn DiscoveryResolver>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn mailbox_store(mut self, store: Arc<dyn MailboxStore>) -> Self {
        self.mailbox_store = Some(store);
        self
    }

    pub fn callback_transport(mut self, transport: Arc<dyn CallbackTransport>) -> Self {
        self.callback_transport = Some(transport);
        self
    }

    /// Share a degrade registry owned elsewhere
    pub fn degrade(mut self, degrade: Arc<DegradeRegistry>) -> Self {
        self.degrade = Some(degrade);
        self
    }

    pub fn build(self) -> Result<Gateway, GatewayError> {
        let missing = |part: &str| ConfigError::invalid("gateway", format!("{part} is required"));
        let downstream = self.downstream.ok_or_else(|| missing("downstream"))?;
        let mailbox_store = self.mailbox_store.ok_or_else(|| missing("mailbox store"))?;
        let callback_transport =
            self.callback_transport.ok_or_else(|| missing("callback transport"))?;
        let discovery = self.discovery.unwrap_or_else(|| Arc::new(NoDiscovery));

        let degrade = self.degrade.unwrap_or_default();
        let gauges = Arc::new(
            RuntimeGauges::from_settings(&self.config.current().config.metrics)?
                .with_degrade(Arc::clone(&degrade)),
        );
        let invoker = Arc::new(Invoker::new(downstream, discovery, Arc::clone(&gauges)));
        let registry = StrategyRegistry::standard(&StrategyDeps {
            invoker,
            gauges: Arc::clone(&gauges),
        });

        Ok(Gateway {
            mailbox: Arc::new(MailboxService::new(mailbox_store, Arc::clone(&self.config))),
            callbacks: Arc::new(CallbackDispatcher::new(
                callback_transport,
                Arc::clone(&self.config),
            )),
            config: self.config,
            degrade,
            gauges,
            registry,
        })
    }
}

// ============================================================================
// Gateway
// ============================================================================

pub struct Gateway {
    config: Arc<ConfigHolder>,
    degrade: Arc<DegradeRegistry>,
    gauges: Arc<RuntimeGauges>,
    registry: StrategyRegistry,
    mailbox: Arc<MailboxService>,
    callbacks: Arc<CallbackDispatcher>,
}

impl Gateway {
    pub fn builder(config: Arc<ConfigHolder>) -> GatewayBuilder {
        GatewayBuilder {
            config,
            degrade: None,
            downstream: None,
            discovery: None,
            mailbox_store: None,
            callback_transport: None,
        }
    }

    pub fn config(&self) -> &Arc<ConfigHolder> {
        &self.config
    }

    pub fn degrade(&self) -> &Arc<DegradeRegistry> {
        &self.degrade
    }

    /// Live gauges for the metrics collector
    pub fn gauges(&self) -> &Arc<RuntimeGauges> {
        &self.gauges
    }

    pub fn mailbox(&self) -> &Arc<MailboxService> {
        &self.mailbox
    }

    pub fn circuit_states(&self) -> Vec<(String, CircuitState)> {
        self.registry.circuit_states()
    }

    fn prepare(
        &self,
        id: String,
        request: GatewayRequest,
    ) -> Result<(Arc<dyn ResilienceStrategy>, Arc<Command>), GatewayError> {
        let snapshot = self.config.current();
        let command = Command::build(id, request, &snapshot, &self.degrade)?;
        let strategy = self.registry.get(command.strategy())?;
        Ok((strategy, Arc::new(command)))
    }

    /// Run `request` in the mode its metadata selects.
    ///
    /// Sync mode returns the execution or its failure. Mailbox modes store the
    /// request in `Received` first and return `Accepted`; a store failure at
    /// that point is returned to the caller.
    #[instrument(skip(self, request), fields(service = %request.service, api = %request.api))]
    pub async fn submit(&self, request: GatewayRequest) -> Result<Submission, GatewayError> {
        let metadata = RequestMetadata::from_request(&request)?;
        let (strategy, command) = self.prepare(metadata.request_id.clone(), request)?;

        if !metadata.mode.uses_mailbox() {
            let execution = strategy.execute(command).await?;
            return Ok(Submission::Completed(execution));
        }

        self.mailbox.receive(&metadata, &command.request).await?;
        let request_id = metadata.request_id.clone();
        self.spawn_completion(strategy, command, metadata);
        debug!(request_id = %request_id, "Request accepted into mailbox");
        Ok(Submission::Accepted { request_id, status: STATUS_ACCEPTED })
    }

    /// Execute `request` as a lazy stream that yields its single result.
    pub fn stream(
        &self,
        request: GatewayRequest,
    ) -> Result<BoxStream<'static, Result<Execution, ExecutionError>>, GatewayError> {
        let metadata = RequestMetadata::from_request(&request)?;
        let (strategy, command) = self.prepare(metadata.request_id, request)?;
        Ok(strategy.execute_stream(command))
    }

    fn spawn_completion(
        &self,
        strategy: Arc<dyn ResilienceStrategy>,
        command: Arc<Command>,
        metadata: RequestMetadata,
    ) {
        let mailbox = Arc::clone(&self.mailbox);
        let callbacks = Arc::clone(&self.callbacks);
        let execution = strategy.execute_async(command);

        tokio::spawn(async move {
            let request_id = metadata.request_id.as_str();
            let result = match execution.await {
                Ok(result) => result,
                Err(join) => Err(ExecutionError::Internal(format!("execution task failed: {join}"))),
            };

            let rejected_early = match &result {
                Ok(Execution::Fallback { cause, .. }) => cause.is_rejection(),
                Err(error) => error.is_rejection(),
                Ok(Execution::Completed(_)) => false,
            };
            if !rejected_early {
                if let Err(e) = mailbox.mark_executed(request_id).await {
                    error!(request_id, error = %e, "Failed to record execution");
                }
            }

            let (recorded, response) = match &result {
                Ok(execution) => {
                    (mailbox.complete(request_id, execution).await, execution.response().clone())
                }
                Err(failure) => {
                    (mailbox.fail(request_id, failure).await, GatewayResponse::fast_fail(failure))
                }
            };
            let state = match recorded {
                Ok(state) => state,
                Err(e) => {
                    error!(request_id, error = %e, "Failed to record completion");
                    return;
                }
            };

            match (&metadata.mode, &metadata.callback) {
                (ExecutionMode::Async, Some(target)) => {
                    let report = callbacks.deliver(request_id, target, state, &response).await;
                    debug!(request_id, delivered = report.delivered, "Callback finished");
                }
                _ => info!(request_id, state = %state, "Result stored for polling"),
            }
        });
    }

    // ========================================================================
    // Polling
    // ========================================================================

    pub async fn state(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<RequestState, GatewayError> {
        Ok(self.mailbox.state(request_id, scope).await?)
    }

    pub async fn response(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<Option<GatewayResponse>, GatewayError> {
        Ok(self.mailbox.response(request_id, scope).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bulwark_domain::constants::{HEADER_CALLBACK_URL, HEADER_EXECUTION_MODE, HEADER_MAILBOX_ID};
    use bulwark_domain::{ApiConfig, GatewayConfig, HttpMethod, ServiceConfig};
    use futures::StreamExt;

    use super::*;
    use crate::testing::{
        fixtures, MemoryMailboxStore, RecordingCallbackTransport, ScriptedDownstream, Step,
    };

    struct Fixture {
        gateway: Gateway,
        downstream: Arc<ScriptedDownstream>,
        callbacks: Arc<RecordingCallbackTransport>,
    }

    fn fixture(step: Step) -> Fixture {
        let config = GatewayConfig::default().with_service(
            "orders",
            ServiceConfig::new(fixtures::simple_endpoint())
                .with_api("list", ApiConfig::new(HttpMethod::Get, "/orders")),
        );
        let downstream = Arc::new(ScriptedDownstream::always(step));
        let callbacks = Arc::new(RecordingCallbackTransport::new());
        let gateway = Gateway::builder(Arc::new(ConfigHolder::new(config).unwrap()))
            .downstream(Arc::clone(&downstream) as Arc<dyn Downstream>)
            .mailbox_store(Arc::new(MemoryMailboxStore::new()))
            .callback_transport(Arc::clone(&callbacks) as Arc<dyn CallbackTransport>)
            .build()
            .unwrap();
        Fixture { gateway, downstream, callbacks }
    }

    async fn wait_for_terminal(gateway: &Gateway, request_id: &str, scope: Option<&str>) -> RequestState {
        for _ in 0..100 {
            let state = gateway.state(request_id, scope).await.unwrap();
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        gateway.state(request_id, scope).await.unwrap()
    }

    #[test]
    fn builder_requires_downstream() {
        let holder = Arc::new(ConfigHolder::new(GatewayConfig::default()).unwrap());
        assert!(matches!(Gateway::builder(holder).build(), Err(GatewayError::Config(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_route_is_an_error() {
        let f = fixture(Step::status(200));
        let error = f.gateway.submit(GatewayRequest::new("orders", "nope")).await.unwrap_err();
        assert!(matches!(error, GatewayError::Execution(ExecutionError::UnknownRoute { .. })));
        assert_eq!(f.downstream.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn callback_mode_delivers_result() {
        let f = fixture(Step::status(200));
        let request = GatewayRequest::new("orders", "list")
            .with_header(HEADER_CALLBACK_URL, "http://caller.local/cb");

        let submission = f.gateway.submit(request).await.unwrap();
        let request_id = submission.request_id().unwrap().to_owned();
        assert_eq!(wait_for_terminal(&f.gateway, &request_id, None).await, RequestState::Responded);

        for _ in 0..100 {
            if !f.callbacks.deliveries().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let deliveries = f.callbacks.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].request_id, request_id);
        assert_eq!(deliveries[0].response.status, 200);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn polling_mode_never_calls_back() {
        let f = fixture(Step::status(200));
        let request = GatewayRequest::new("orders", "list")
            .with_header(HEADER_EXECUTION_MODE, "polling")
            .with_header(HEADER_MAILBOX_ID, "M1")
            .with_header(HEADER_CALLBACK_URL, "http://caller.local/cb");

        let submission = f.gateway.submit(request).await.unwrap();
        let request_id = submission.request_id().unwrap().to_owned();
        assert_eq!(
            wait_for_terminal(&f.gateway, &request_id, Some("M1")).await,
            RequestState::Responded
        );
        assert_eq!(f.callbacks.attempts(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stream_yields_one_result() {
        let f = fixture(Step::status(200));
        let results: Vec<_> =
            f.gateway.stream(GatewayRequest::new("orders", "list")).unwrap().collect().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().response().status, 200);
    }

    #[test]
    fn accepted_submission_renders_202() {
        let response =
            Submission::Accepted { request_id: "r1".into(), status: STATUS_ACCEPTED }.into_response();
        assert_eq!(response.status, 202);
        assert!(response.body.contains("r1"));
    }
}
