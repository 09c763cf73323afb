//! In-process mailbox storage with TTL and capacity
//!
//! Entries expire a fixed time after creation. Expired entries read as
//! absent immediately and are physically removed by `purge_expired`, which
//! a `MailboxPurgeJob` runs on an interval. Writes to one request id are
//! serialized by the map shard lock held for the whole read-modify-write.

use std::time::Duration;

use async_trait::async_trait;
use bulwark_core::{MailboxScope, MailboxStore};
use bulwark_domain::{
    GatewayRequest, GatewayResponse, MailboxEntry, MailboxError, MailboxSettings, RequestState,
};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

pub struct InMemoryMailboxStore {
    entries: DashMap<String, MailboxEntry>,
    capacity: usize,
    default_ttl: Duration,
}

impl InMemoryMailboxStore {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self { entries: DashMap::new(), capacity, default_ttl }
    }

    pub fn from_settings(settings: &MailboxSettings) -> Self {
        Self::new(settings.max_entries, Duration::from_secs(settings.ttl_seconds))
    }

    /// Stored entries, expired ones included until the next purge
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry whose TTL elapsed at `now`; returns how many
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, remaining = self.entries.len(), "Purged expired mailbox entries");
        }
        purged
    }

    fn live<T>(
        &self,
        request_id: &str,
        scope: Option<&str>,
        read: impl FnOnce(&MailboxEntry) -> T,
    ) -> Option<T> {
        let now = Utc::now();
        self.entries
            .get(request_id)
            .filter(|entry| !entry.is_expired(now) && entry.visible_to(scope))
            .map(|entry| read(entry.value()))
    }

    /// Apply `edit` to a live entry under its shard lock
    fn modify(
        &self,
        request_id: &str,
        ttl: Option<Duration>,
        edit: impl FnOnce(&mut MailboxEntry) -> Result<(), MailboxError>,
    ) -> Result<(), MailboxError> {
        let now = Utc::now();
        let not_found = || MailboxError::NotFound { request_id: request_id.to_owned() };

        let mut entry = self.entries.get_mut(request_id).ok_or_else(not_found)?;
        if entry.is_expired(now) {
            return Err(not_found());
        }
        edit(entry.value_mut())?;
        if let Some(ttl) = ttl {
            entry.ttl_seconds = ttl.as_secs();
        }
        entry.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl MailboxStore for InMemoryMailboxStore {
    async fn exists(&self, request_id: &str) -> Result<bool, MailboxError> {
        let now = Utc::now();
        Ok(self.entries.get(request_id).is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn save_request(
        &self,
        request_id: &str,
        mailbox_id: Option<&str>,
        mailbox_auth_id: Option<&str>,
        request: &GatewayRequest,
        ttl: Option<Duration>,
    ) -> Result<(), MailboxError> {
        let now = Utc::now();
        if self.entries.len() >= self.capacity && self.purge_expired(now) == 0 {
            warn!(capacity = self.capacity, request_id, "Mailbox is full");
            return Err(MailboxError::CapacityExceeded { capacity: self.capacity });
        }

        let ttl_seconds = ttl.unwrap_or(self.default_ttl).as_secs();
        let entry = MailboxEntry::received(
            request_id,
            mailbox_id.map(str::to_owned),
            mailbox_auth_id.map(str::to_owned),
            request.clone(),
            ttl_seconds,
            now,
        );

        match self.entries.entry(request_id.to_owned()) {
            Entry::Occupied(mut occupied) => {
                // An expired id may be reused.
                if !occupied.get().is_expired(now) {
                    return Err(MailboxError::Duplicate { request_id: request_id.to_owned() });
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        Ok(())
    }

    async fn set_state(
        &self,
        request_id: &str,
        state: RequestState,
        ttl: Option<Duration>,
    ) -> Result<(), MailboxError> {
        self.modify(request_id, ttl, |entry| {
            if !entry.state.can_transition_to(state) {
                return Err(MailboxError::InvalidTransition {
                    request_id: request_id.to_owned(),
                    from: entry.state,
                    to: state,
                });
            }
            entry.state = state;
            Ok(())
        })
    }

    async fn save_response(
        &self,
        request_id: &str,
        response: &GatewayResponse,
        ttl: Option<Duration>,
    ) -> Result<(), MailboxError> {
        self.modify(request_id, ttl, |entry| {
            entry.response = Some(response.clone());
            Ok(())
        })
    }

    async fn state(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<RequestState, MailboxError> {
        Ok(self.live(request_id, scope, |entry| entry.state).unwrap_or(RequestState::Unknown))
    }

    async fn request(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<Option<GatewayRequest>, MailboxError> {
        Ok(self.live(request_id, scope, |entry| entry.request.clone()))
    }

    async fn response(
        &self,
        request_id: &str,
        scope: Option<&str>,
    ) -> Result<Option<GatewayResponse>, MailboxError> {
        Ok(self.live(request_id, scope, |entry| entry.response.clone()).flatten())
    }

    async fn list(&self, scope: &MailboxScope) -> Result<Vec<MailboxEntry>, MailboxError> {
        let now = Utc::now();
        let mut entries: Vec<MailboxEntry> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now) && scope.contains(entry))
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> InMemoryMailboxStore {
        InMemoryMailboxStore::new(capacity, Duration::from_secs(3600))
    }

    fn request() -> GatewayRequest {
        GatewayRequest::new("orders", "list")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_store_refuses_new_requests() {
        let store = store(2);
        store.save_request("a", Some("M1"), None, &request(), None).await.unwrap();
        store.save_request("b", Some("M1"), None, &request(), None).await.unwrap();

        let err = store.save_request("c", Some("M1"), None, &request(), None).await.unwrap_err();
        assert_eq!(err, MailboxError::CapacityExceeded { capacity: 2 });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_entries_make_room() {
        let store = store(1);
        store
            .save_request("old", None, None, &request(), Some(Duration::ZERO))
            .await
            .unwrap();

        store.save_request("new", None, None, &request(), None).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.exists("new").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_entries_read_as_unknown_and_purge() {
        let store = store(10);
        store
            .save_request("gone", Some("M1"), None, &request(), Some(Duration::ZERO))
            .await
            .unwrap();
        store.save_request("kept", Some("M1"), None, &request(), None).await.unwrap();

        assert_eq!(store.state("gone", Some("M1")).await.unwrap(), RequestState::Unknown);
        assert!(matches!(
            store.set_state("gone", RequestState::Executed, None).await,
            Err(MailboxError::NotFound { .. })
        ));

        assert_eq!(store.purge_expired(Utc::now()), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.state("kept", Some("M1")).await.unwrap(), RequestState::Received);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lifecycle_is_forward_only() {
        let store = store(10);
        store.save_request("r1", None, None, &request(), None).await.unwrap();
        store.set_state("r1", RequestState::Executed, None).await.unwrap();
        store.save_response("r1", &GatewayResponse::new(200, "ok"), None).await.unwrap();
        store.set_state("r1", RequestState::Responded, None).await.unwrap();

        let err = store.set_state("r1", RequestState::Received, None).await.unwrap_err();
        assert!(matches!(err, MailboxError::InvalidTransition { .. }));
        assert_eq!(store.response("r1", None).await.unwrap().map(|r| r.status), Some(200));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn live_duplicate_is_refused() {
        let store = store(10);
        store.save_request("r1", None, None, &request(), None).await.unwrap();
        let err = store.save_request("r1", None, None, &request(), None).await.unwrap_err();
        assert!(matches!(err, MailboxError::Duplicate { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scope_hides_other_mailboxes() {
        let store = store(10);
        store.save_request("r1", Some("M1"), None, &request(), None).await.unwrap();
        store.save_request("r2", Some("M2"), Some("A1"), &request(), None).await.unwrap();
        store.save_request("r3", Some("M1"), Some("A1"), &request(), None).await.unwrap();

        assert_eq!(store.request("r1", Some("M2")).await.unwrap(), None);
        assert_eq!(store.request("r3", Some("M1")).await.unwrap(), None);
        let by_mailbox = store.list(&MailboxScope::MailboxId("M1".into())).await.unwrap();
        assert_eq!(by_mailbox.len(), 1);
        let by_auth = store.list(&MailboxScope::AuthId("A1".into())).await.unwrap();
        assert_eq!(by_auth.len(), 2);
    }
}
