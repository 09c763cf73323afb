//! Request lifecycle and persisted mailbox entries

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::request::{GatewayRequest, GatewayResponse};

/// Lifecycle of a request executed through a mailbox
///
/// `Received` and `Executed` are the only non-terminal states. `Unknown` is
/// never stored; it is the answer for an id with no visible entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Unknown,
    Received,
    Executed,
    Responded,
    Errored,
    Rejected,
    TimedOut,
}

crate::impl_domain_status_conversions!(RequestState {
    Unknown => "UNKNOWN",
    Received => "RECEIVED",
    Executed => "EXECUTED",
    Responded => "RESPONDED",
    Errored => "ERRORED",
    Rejected => "REJECTED",
    TimedOut => "TIMED_OUT",
});

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Responded | Self::Errored | Self::Rejected | Self::TimedOut)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Received => 1,
            Self::Executed => 2,
            Self::Responded | Self::Errored | Self::Rejected | Self::TimedOut => 3,
        }
    }

    /// Whether a stored entry in `self` may move to `next`.
    ///
    /// Moves are strictly forward; a call rejected before execution may skip
    /// `Executed`. Nothing leaves a terminal state.
    pub fn can_transition_to(self, next: Self) -> bool {
        !self.is_terminal() && next != Self::Unknown && next.rank() > self.rank()
    }
}

/// Persisted record of one asynchronously executed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxEntry {
    pub request_id: String,
    pub mailbox_id: Option<String>,
    pub mailbox_auth_id: Option<String>,
    pub request: GatewayRequest,
    pub response: Option<GatewayResponse>,
    pub state: RequestState,
    pub ttl_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailboxEntry {
    pub fn received(
        request_id: impl Into<String>,
        mailbox_id: Option<String>,
        mailbox_auth_id: Option<String>,
        request: GatewayRequest,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            mailbox_id,
            mailbox_auth_id,
            request,
            response: None,
            state: RequestState::Received,
            ttl_seconds,
            created_at: now,
            updated_at: now,
        }
    }

    /// Expiry counted from creation, not from the last update
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        self.created_at
            .checked_add_signed(ChronoDuration::try_seconds(ttl).unwrap_or(ChronoDuration::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Scope check for lookups.
    ///
    /// An entry saved with an auth id is visible only to that auth id. An
    /// entry without one is visible unscoped, or to its own mailbox id.
    /// A mismatch reads as absent rather than forbidden.
    pub fn visible_to(&self, scope: Option<&str>) -> bool {
        match (self.mailbox_auth_id.as_deref(), scope) {
            (Some(auth), Some(scope)) => auth == scope,
            (Some(_), None) => false,
            (None, None) => true,
            (None, Some(scope)) => self.mailbox_id.as_deref() == Some(scope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mailbox_id: Option<&str>, auth_id: Option<&str>) -> MailboxEntry {
        MailboxEntry::received(
            "req-1",
            mailbox_id.map(str::to_owned),
            auth_id.map(str::to_owned),
            GatewayRequest::new("orders", "create"),
            60,
            Utc::now(),
        )
    }

    #[test]
    fn transitions_only_move_forward() {
        use RequestState::*;

        assert!(Received.can_transition_to(Executed));
        assert!(Executed.can_transition_to(Responded));
        assert!(Received.can_transition_to(Rejected));
        assert!(!Executed.can_transition_to(Received));
        assert!(!Received.can_transition_to(Received));
        assert!(!Received.can_transition_to(Unknown));

        for terminal in [Responded, Errored, Rejected, TimedOut] {
            assert!(terminal.is_terminal());
            for next in [Received, Executed, Responded, Errored, Rejected, TimedOut] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn scope_by_mailbox_id_without_auth() {
        let entry = entry(Some("M1"), None);
        assert!(entry.visible_to(None));
        assert!(entry.visible_to(Some("M1")));
        assert!(!entry.visible_to(Some("OTHER_MAILBOX")));
    }

    #[test]
    fn auth_id_is_required_when_present() {
        let entry = entry(Some("M1"), Some("secret"));
        assert!(entry.visible_to(Some("secret")));
        assert!(!entry.visible_to(None));
        assert!(!entry.visible_to(Some("M1")));
    }

    #[test]
    fn expiry_counts_from_creation() {
        let mut entry = entry(None, None);
        let created = entry.created_at;
        entry.updated_at = created + ChronoDuration::seconds(59);

        assert!(!entry.is_expired(created + ChronoDuration::seconds(59)));
        assert!(entry.is_expired(created + ChronoDuration::seconds(60)));
    }

    #[test]
    fn state_wire_format() {
        assert_eq!(serde_json::to_string(&RequestState::TimedOut).unwrap(), "\"TIMED_OUT\"");
        assert_eq!("timed_out".parse::<RequestState>(), Ok(RequestState::TimedOut));
    }
}
