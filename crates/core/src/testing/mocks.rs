//! Port fakes

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bulwark_domain::{
    CallbackTarget, Endpoint, GatewayRequest, GatewayResponse, MailboxEntry, MailboxError,
    RequestState, TransportError,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::execution::{Command, DiscoveryResolver, Downstream};
use crate::mailbox::{CallbackDelivery, CallbackError, CallbackTransport, MailboxScope, MailboxStore};

// ============================================================================
// Downstream
// ============================================================================

/// One scripted downstream reaction
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Answer `status` with body `ok` after `delay`
    Status { status: u16, delay: Duration },
    Fail(TransportError),
}

impl Step {
    pub fn status(status: u16) -> Self {
        Self::Status { status, delay: Duration::ZERO }
    }

    pub fn delayed(delay: Duration, status: u16) -> Self {
        Self::Status { status, delay }
    }
}

/// Downstream that replays a script, then repeats a final step forever
#[derive(Debug)]
pub struct ScriptedDownstream {
    script: Mutex<VecDeque<Step>>,
    then: Step,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedDownstream {
    pub fn always(step: Step) -> Self {
        Self::sequence(Vec::new(), step)
    }

    pub fn sequence(steps: Vec<Step>, then: Step) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            then,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Calls that reached the downstream
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Target URL of every call, in order
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Downstream for ScriptedDownstream {
    async fn call(
        &self,
        endpoint: &Endpoint,
        command: &Command,
    ) -> Result<GatewayResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(endpoint.url_for(&command.resolved.path));
        let step = self.script.lock().pop_front().unwrap_or_else(|| self.then.clone());

        match step {
            Step::Status { status, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(GatewayResponse::new(status, "ok"))
            }
            Step::Fail(error) => Err(error),
        }
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Registry whose instances can be registered while the gateway runs
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    endpoints: RwLock<HashMap<String, Endpoint>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service_id: impl Into<String>, endpoint: Endpoint) {
        self.endpoints.write().insert(service_id.into(), endpoint);
    }
}

impl DiscoveryResolver for StaticDiscovery {
    fn lookup(&self, service_id: &str) -> Option<Endpoint> {
        self.endpoints.read().get(service_id).cloned()
    }
}

// ============================================================================
// Mailbox store
// ============================================================================

/// Unbounded map-backed mailbox store without expiry
#[derive(Debug, Default)]
pub struct MemoryMailboxStore {
    entries: Mutex<HashMap<String, MailboxEntry>>,
    fail_writes: AtomicBool,
}

impl MemoryMailboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every mutation fail with `Unavailable` while set
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<(), MailboxError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MailboxError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    fn visible<T>(
        &self,
        request_id: &str,
        scope: Option<&str>,
        read: impl FnOnce(&MailboxEntry) -> T,
    ) -> Option<T> {
        let entries = self.entries.lock();
        entries.get(request_id).filter(|entry| entry.visible_to(scope)).map(read)
    }
}

#[async_trait]
impl MailboxStore for MemoryMailboxStore {
    async fn exists(&self, request_id: &str) -> Result<bool, MailboxError> {
        Ok(self.entries.lock().contains_key(request_id))
    }

    async fn save_request(
        &self,
        request_id: &str,
        mailbox_id: Option<&str>,
        mailbox_auth_id: Option<&str>,
        request: &GatewayRequest,
        ttl: Option<Duration>,
    ) -> Result<(), MailboxError> {
        self.check_writable()?;
        let mut entries = self.entries.lock();
        if entries.contains_key(request_id) {
            return Err(MailboxError::Duplicate { request_id: request_id.to_owned() });
        }
        entries.insert(
            request_id.to_owned(),
            MailboxEntry::received(
                request_id,
                mailbox_id.map(str::to_owned),
                mailbox_auth_id.map(str::to_owned),
                request.clone(),
                ttl.map_or(u64::MAX, |ttl| ttl.as_secs()),
                Utc::now(),
            ),
        );
        Ok(())
    }

    async fn set_state(
        &self,
        request_id: &str,
        state: RequestState,
        _ttl: Option<Duration>,
    ) -> Result<(), MailboxError> {
        self.check_writable()?;
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(request_id)
            .ok_or_else(|| MailboxError::NotFound { request_id: request_id.to_owned() })?;
        if !entry.state.can_transition_to(state) {
            return Err(MailboxError::InvalidTransition {
                request_id: request_id.to_owned(),
                from: entry.state,
                to: state,
            });
        }
        entry.state = state;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn save_response(
        &self,
        request_id: &str,
        response: &GatewayResponse,
        _ttl: Option<Duration>,
    ) -> Result<(), MailboxError> {
        self.check_writable()?;
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(request_id)
            .ok_or_else(|| MailboxError::NotFound { request_id: request_id.to_owned() })?;
        entry.response = Some(response.clone());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn state(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<RequestState, MailboxError> {
        Ok(self.visible(request_id, scope, |entry| entry.state).unwrap_or(RequestState::Unknown))
    }

    async fn request(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<Option<GatewayRequest>, MailboxError> {
        Ok(self.visible(request_id, scope, |entry| entry.request.clone()))
    }

    async fn response(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<Option<GatewayResponse>, MailboxError> {
        Ok(self.visible(request_id, scope, |entry| entry.response.clone()).flatten())
    }

    async fn list(&self, scope: &MailboxScope) -> Result<Vec<MailboxEntry>, MailboxError> {
        Ok(self.entries.lock().values().filter(|entry| scope.contains(entry)).cloned().collect())
    }
}

// ============================================================================
// Callback transport
// ============================================================================

/// Records every delivery; optionally fails each attempt with a fixed error
#[derive(Debug, Default)]
pub struct RecordingCallbackTransport {
    failure: Option<CallbackError>,
    deliveries: Mutex<Vec<CallbackDelivery>>,
    attempts: AtomicUsize,
}

impl RecordingCallbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: CallbackError) -> Self {
        Self { failure: Some(error), ..Self::default() }
    }

    /// Successful deliveries
    pub fn deliveries(&self) -> Vec<CallbackDelivery> {
        self.deliveries.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallbackTransport for RecordingCallbackTransport {
    async fn deliver(
        &self,
        _target: &CallbackTarget,
        delivery: &CallbackDelivery,
    ) -> Result<(), CallbackError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.deliveries.lock().push(delivery.clone());
        Ok(())
    }
}
