//! Mailbox lifecycle service

use std::sync::Arc;
use std::time::Duration;

use bulwark_domain::{
    ExecutionError, GatewayRequest, GatewayResponse, MailboxEntry, MailboxError, RequestMetadata,
    RequestState,
};
use tracing::{debug, instrument};

use super::ports::{MailboxScope, MailboxStore};
use crate::config_holder::ConfigHolder;
use crate::execution::Execution;

/// Drives `Received -> Executed -> terminal` through a [`MailboxStore`]
pub struct MailboxService {
    store: Arc<dyn MailboxStore>,
    config: Arc<ConfigHolder>,
}

impl MailboxService {
    pub fn new(store: Arc<dyn MailboxStore>, config: Arc<ConfigHolder>) -> Self {
        Self { store, config }
    }

    fn ttl(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.current().config.mailbox.ttl_seconds))
    }

    /// Create the entry in `Received`; an id already stored is refused
    #[instrument(skip(self, metadata, request), fields(request_id = %metadata.request_id))]
    pub async fn receive(
        &self,
        metadata: &RequestMetadata,
        request: &GatewayRequest,
    ) -> Result<(), MailboxError> {
        if self.store.exists(&metadata.request_id).await? {
            return Err(MailboxError::Duplicate { request_id: metadata.request_id.clone() });
        }
        self.store
            .save_request(
                &metadata.request_id,
                metadata.mailbox_id.as_deref(),
                metadata.mailbox_auth_id.as_deref(),
                request,
                self.ttl(),
            )
            .await?;
        debug!("Mailbox entry received");
        Ok(())
    }

    pub async fn mark_executed(&self, request_id: &str) -> Result<(), MailboxError> {
        self.store.set_state(request_id, RequestState::Executed, self.ttl()).await
    }

    /// Record a finished execution; returns the terminal state written
    pub async fn complete(
        &self,
        request_id: &str,
        execution: &Execution,
    ) -> Result<RequestState, MailboxError> {
        self.finish(request_id, execution.terminal_state(), execution.response()).await
    }

    /// Record an execution that ended in an error
    pub async fn fail(
        &self,
        request_id: &str,
        error: &ExecutionError,
    ) -> Result<RequestState, MailboxError> {
        self.finish(request_id, error.terminal_state(), &GatewayResponse::fast_fail(error)).await
    }

    async fn finish(
        &self,
        request_id: &str,
        state: RequestState,
        response: &GatewayResponse,
    ) -> Result<RequestState, MailboxError> {
        let ttl = self.ttl();
        self.store.save_response(request_id, response, ttl).await?;
        self.store.set_state(request_id, state, ttl).await?;
        debug!(request_id, state = %state, "Mailbox entry completed");
        Ok(state)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn state(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<RequestState, MailboxError> {
        self.store.state(request_id, scope).await
    }

    pub async fn request(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<Option<GatewayRequest>, MailboxError> {
        self.store.request(request_id, scope).await
    }

    pub async fn response(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<Option<GatewayResponse>, MailboxError> {
        self.store.response(request_id, scope).await
    }

    /// Requests stored under `scope`, keyed by request id
    pub async fn requests_in(
        &self,
        scope: &MailboxScope,
    ) -> Result<Vec<(String, GatewayRequest)>, MailboxError> {
        Ok(self
            .store
            .list(scope)
            .await?
            .into_iter()
            .map(|entry| (entry.request_id, entry.request))
            .collect())
    }

    /// Responses stored under `scope`; entries without a response are skipped
    pub async fn responses_in(
        &self,
        scope: &MailboxScope,
    ) -> Result<Vec<(String, GatewayResponse)>, MailboxError> {
        Ok(self
            .store
            .list(scope)
            .await?
            .into_iter()
            .filter_map(|entry: MailboxEntry| entry.response.map(|r| (entry.request_id, r)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use bulwark_domain::constants::{HEADER_MAILBOX_ID, HEADER_REQUEST_ID};
    use bulwark_domain::{GatewayConfig, RejectionReason};

    use super::*;
    use crate::testing::MemoryMailboxStore;

    fn service() -> (MailboxService, Arc<MemoryMailboxStore>) {
        let store = Arc::new(MemoryMailboxStore::new());
        let config = Arc::new(ConfigHolder::new(GatewayConfig::default()).unwrap());
        (MailboxService::new(Arc::clone(&store) as Arc<dyn MailboxStore>, config), store)
    }

    fn metadata(request_id: &str, mailbox: &str) -> (RequestMetadata, GatewayRequest) {
        let request = GatewayRequest::new("orders", "create")
            .with_header(HEADER_REQUEST_ID, request_id)
            .with_header(HEADER_MAILBOX_ID, mailbox);
        (RequestMetadata::from_request(&request).unwrap(), request)
    }

    #[tokio::test]
    async fn lifecycle_reaches_responded() {
        let (service, _) = service();
        let (metadata, request) = metadata("r1", "M1");

        service.receive(&metadata, &request).await.unwrap();
        assert_eq!(service.state("r1", Some("M1")).await.unwrap(), RequestState::Received);

        service.mark_executed("r1").await.unwrap();
        let execution = Execution::Completed(GatewayResponse::new(200, "done"));
        assert_eq!(service.complete("r1", &execution).await.unwrap(), RequestState::Responded);

        assert_eq!(service.state("r1", Some("M1")).await.unwrap(), RequestState::Responded);
        assert_eq!(service.response("r1", Some("M1")).await.unwrap().unwrap().body, "done");
        assert_eq!(service.response("r1", Some("OTHER")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn terminal_state_is_final() {
        let (service, _) = service();
        let (metadata, request) = metadata("r2", "M1");
        service.receive(&metadata, &request).await.unwrap();

        let rejected = ExecutionError::Rejected {
            pool_key: "orders-create".into(),
            reason: RejectionReason::BulkheadFull,
        };
        assert_eq!(service.fail("r2", &rejected).await.unwrap(), RequestState::Rejected);

        let error = service.mark_executed("r2").await.unwrap_err();
        assert!(matches!(error, MailboxError::InvalidTransition { .. }));
        assert_eq!(service.state("r2", Some("M1")).await.unwrap(), RequestState::Rejected);
    }

    #[tokio::test]
    async fn unknown_id_reads_as_unknown() {
        let (service, _) = service();
        assert_eq!(service.state("missing", None).await.unwrap(), RequestState::Unknown);
        assert_eq!(service.request("missing", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_request_id_is_refused() {
        let (service, _) = service();
        let (metadata, request) = metadata("r3", "M1");
        service.receive(&metadata, &request).await.unwrap();
        assert!(matches!(
            service.receive(&metadata, &request).await,
            Err(MailboxError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn store_failure_surfaces() {
        let (service, store) = service();
        store.fail_writes(true);
        let (metadata, request) = metadata("r4", "M1");
        assert!(matches!(
            service.receive(&metadata, &request).await,
            Err(MailboxError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn bulk_lookup_by_mailbox() {
        let (service, _) = service();
        for id in ["a", "b"] {
            let (metadata, request) = metadata(id, "M1");
            service.receive(&metadata, &request).await.unwrap();
        }
        let (metadata, request) = metadata("c", "M2");
        service.receive(&metadata, &request).await.unwrap();
        service.mark_executed("a").await.unwrap();
        service
            .complete("a", &Execution::Completed(GatewayResponse::new(200, "")))
            .await
            .unwrap();

        let scope = MailboxScope::MailboxId("M1".into());
        let mut requests: Vec<String> =
            service.requests_in(&scope).await.unwrap().into_iter().map(|(id, _)| id).collect();
        requests.sort();
        assert_eq!(requests, vec!["a", "b"]);
        assert_eq!(service.responses_in(&scope).await.unwrap().len(), 1);
    }
}
