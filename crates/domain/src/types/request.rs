//! Inbound requests, downstream responses and per-call metadata

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::*;
use crate::errors::{ExecutionError, GatewayError};

// ============================================================================
// HTTP method
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

crate::impl_domain_status_conversions!(HttpMethod {
    Get => "GET",
    Head => "HEAD",
    Options => "OPTIONS",
    Post => "POST",
    Put => "PUT",
    Patch => "PATCH",
    Delete => "DELETE",
});

impl HttpMethod {
    /// Read methods that get the smaller timeout buffer
    pub fn is_idempotent_read(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }
}

// ============================================================================
// Request / response snapshots
// ============================================================================

/// An inbound call mapped to a service/API pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub service: String,
    pub api: String,
    /// Header names are stored lower-case
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl GatewayRequest {
    pub fn new(service: impl Into<String>, api: impl Into<String>) -> Self {
        Self { service: service.into(), api: api.into(), headers: BTreeMap::new(), body: String::new() }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// A response returned to the caller, either from downstream or produced by
/// the gateway itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl GatewayResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, headers: BTreeMap::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Gateway-generated response for a failed execution
    pub fn fast_fail(error: &ExecutionError) -> Self {
        let body = serde_json::json!({
            "status": error.fast_fail_status(),
            "error": error.to_string(),
        });
        Self::new(error.fast_fail_status(), body.to_string())
            .with_header(HEADER_CONTENT_TYPE, DEFAULT_MEDIA_TYPE)
    }

    /// Acknowledgement for a request accepted into a mailbox
    pub fn accepted(request_id: &str) -> Self {
        let body = serde_json::json!({ "requestId": request_id });
        Self::new(STATUS_ACCEPTED, body.to_string())
            .with_header(HEADER_REQUEST_ID, request_id)
            .with_header(HEADER_CONTENT_TYPE, DEFAULT_MEDIA_TYPE)
    }
}

// ============================================================================
// Execution mode and metadata
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Execute inline, no mailbox entry
    Sync,
    /// Mailbox entry plus callback delivery when a callback address exists
    Async,
    /// Mailbox entry, retrieved by the caller later
    Polling,
}

crate::impl_domain_status_conversions!(ExecutionMode {
    Sync => "sync",
    Async => "async",
    Polling => "polling",
});

impl ExecutionMode {
    pub fn uses_mailbox(self) -> bool {
        !matches!(self, Self::Sync)
    }
}

/// Where and how to deliver an asynchronous result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackTarget {
    pub url: String,
    pub method: HttpMethod,
    /// Falls back to the global callback timeout when absent
    pub timeout: Option<Duration>,
}

/// Header-equivalent fields carried with every inbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    pub request_id: String,
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    pub accept: String,
    pub content_type: String,
    pub mode: ExecutionMode,
    pub mailbox_id: Option<String>,
    pub mailbox_auth_id: Option<String>,
    pub callback: Option<CallbackTarget>,
}

impl RequestMetadata {
    /// Extract metadata from a request's headers, filling defaults.
    ///
    /// A callback address selects `Async` unless the mode header asks for
    /// `Polling`; an explicit `sync` is promoted so the callback is not lost.
    /// Without either, the call runs `Sync`.
    pub fn from_request(request: &GatewayRequest) -> Result<Self, GatewayError> {
        let non_empty = |name: &str| request.header(name).map(str::trim).filter(|v| !v.is_empty());

        let request_id = non_empty(HEADER_REQUEST_ID)
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let transaction_id =
            non_empty(HEADER_TRANSACTION_ID).map(str::to_owned).unwrap_or_else(|| request_id.clone());

        let timestamp = match non_empty(HEADER_TIMESTAMP) {
            Some(raw) => parse_timestamp(raw)?,
            None => Utc::now(),
        };

        let callback = match non_empty(HEADER_CALLBACK_URL) {
            Some(url) => {
                let method = match non_empty(HEADER_CALLBACK_METHOD) {
                    Some(raw) => raw.parse::<HttpMethod>().map_err(GatewayError::InvalidInput)?,
                    None => HttpMethod::Post,
                };
                let timeout = non_empty(HEADER_CALLBACK_TIMEOUT)
                    .map(|raw| {
                        raw.parse::<u64>().map(Duration::from_millis).map_err(|_| {
                            GatewayError::InvalidInput(format!("invalid callback timeout: {raw}"))
                        })
                    })
                    .transpose()?;
                Some(CallbackTarget { url: url.to_owned(), method, timeout })
            }
            None => None,
        };

        let requested = non_empty(HEADER_EXECUTION_MODE)
            .map(|raw| raw.parse::<ExecutionMode>().map_err(GatewayError::InvalidInput))
            .transpose()?;
        let mode = match (requested, &callback) {
            (Some(ExecutionMode::Sync) | None, Some(_)) => ExecutionMode::Async,
            (Some(mode), _) => mode,
            (None, None) => ExecutionMode::Sync,
        };

        Ok(Self {
            request_id,
            transaction_id,
            timestamp,
            accept: non_empty(HEADER_ACCEPT).unwrap_or(DEFAULT_MEDIA_TYPE).to_owned(),
            content_type: non_empty(HEADER_CONTENT_TYPE).unwrap_or(DEFAULT_MEDIA_TYPE).to_owned(),
            mode,
            mailbox_id: non_empty(HEADER_MAILBOX_ID).map(str::to_owned),
            mailbox_auth_id: non_empty(HEADER_MAILBOX_AUTH_ID).map(str::to_owned),
            callback,
        })
    }
}

/// RFC 3339 or epoch milliseconds
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, GatewayError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .ok_or_else(|| GatewayError::InvalidInput(format!("invalid timestamp: {raw}")))
}
