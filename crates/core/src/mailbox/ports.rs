//! Port interfaces for mailbox persistence and callback delivery
//!
//! The engine owns the lifecycle; storage and delivery are provided by
//! adapters.

use std::time::Duration;

use async_trait::async_trait;
use bulwark_domain::{
    CallbackTarget, GatewayRequest, GatewayResponse, MailboxEntry, MailboxError, RequestState,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grouping used by bulk lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxScope {
    MailboxId(String),
    AuthId(String),
}

impl MailboxScope {
    /// Whether `entry` belongs to this scope
    pub fn contains(&self, entry: &MailboxEntry) -> bool {
        match self {
            Self::MailboxId(id) => {
                entry.mailbox_id.as_deref() == Some(id.as_str())
                    && entry.visible_to(Some(id.as_str()))
            }
            Self::AuthId(auth) => entry.mailbox_auth_id.as_deref() == Some(auth.as_str()),
        }
    }
}

/// Persistence contract for mailbox entries.
///
/// Mutations fail loudly. Lookups treat a missing id and a scope mismatch the
/// same way: `RequestState::Unknown` or `None`. Providers serialize writes
/// per request id and refuse transitions that move backwards.
#[async_trait]
pub trait MailboxStore: Send + Sync {
    async fn exists(&self, request_id: &str) -> Result<bool, MailboxError>;

    /// Store a new entry in `Received`
    async fn save_request(
        &self,
        request_id: &str,
        mailbox_id: Option<&str>,
        mailbox_auth_id: Option<&str>,
        request: &GatewayRequest,
        ttl: Option<Duration>,
    ) -> Result<(), MailboxError>;

    async fn set_state(
        &self,
        request_id: &str,
        state: RequestState,
        ttl: Option<Duration>,
    ) -> Result<(), MailboxError>;

    async fn save_response(
        &self,
        request_id: &str,
        response: &GatewayResponse,
        ttl: Option<Duration>,
    ) -> Result<(), MailboxError>;

    async fn state(&self, request_id: &str, scope: Option<&str>)
        -> Result<RequestState, MailboxError>;

    async fn request(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<Option<GatewayRequest>, MailboxError>;

    async fn response(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<Option<GatewayResponse>, MailboxError>;

    /// Every visible entry in `scope`
    async fn list(&self, scope: &MailboxScope) -> Result<Vec<MailboxEntry>, MailboxError>;
}

/// Body posted to a callback address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackDelivery {
    pub request_id: String,
    pub state: RequestState,
    pub response: GatewayResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("callback timed out after {0:?}")]
    Timeout(Duration),

    #[error("callback transport failed: {0}")]
    Transport(String),

    #[error("callback endpoint answered {status}")]
    Rejected { status: u16 },
}

/// Performs one callback delivery attempt
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    async fn deliver(
        &self,
        target: &CallbackTarget,
        delivery: &CallbackDelivery,
    ) -> Result<(), CallbackError>;
}
