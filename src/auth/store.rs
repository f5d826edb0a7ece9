//! Per-session credential storage.
//!
//! The store is the single authority on which tokens a session holds. It is
//! an injected object rather than a global so that the in-memory map can be
//! swapped for another backend without touching the orchestrator.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::tokens::{AccessToken, RefreshToken};

/// Opaque identifier correlating the tool calls of one connected client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The tokens a session currently holds.
///
/// A record only comes into existence through [`CredentialStore::set`],
/// which the orchestrator calls after a successful login or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    access_token: AccessToken,
    refresh_token: Option<RefreshToken>,
    expires_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Returns the access token.
    #[must_use]
    pub const fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    /// Returns the refresh token, if one was issued.
    #[must_use]
    pub const fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    /// Returns the access token expiry, if known.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the access token is within `skew` of expiring at `now`.
    ///
    /// Unknown expiry is never near expiry.
    #[must_use]
    pub fn is_near_expiry_at(&self, skew: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now + skew >= expires_at)
    }
}

/// Authoritative holder of one [`CredentialRecord`] per session.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the session's record, if any.
    async fn get(&self, session: &SessionId) -> Option<CredentialRecord>;

    /// Replaces the session's record with a new one.
    async fn set(
        &self,
        session: &SessionId,
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        expires_at: Option<DateTime<Utc>>,
    );

    /// Removes the session's record. A no-op when none exists.
    async fn clear(&self, session: &SessionId);

    /// Near-expiry check against an explicit clock reading.
    async fn is_near_expiry_at(
        &self,
        session: &SessionId,
        skew: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.get(session)
            .await
            .is_some_and(|record| record.is_near_expiry_at(skew, now))
    }

    /// Near-expiry check against the wall clock.
    async fn is_near_expiry(&self, session: &SessionId, skew: Duration) -> bool {
        self.is_near_expiry_at(session, skew, Utc::now()).await
    }
}

/// Process-memory credential store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<HashMap<SessionId, CredentialRecord>>,
}

impl InMemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently holding a record.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` when no session holds a record.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, session: &SessionId) -> Option<CredentialRecord> {
        self.records.read().await.get(session).cloned()
    }

    async fn set(
        &self,
        session: &SessionId,
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        let record = CredentialRecord {
            access_token,
            refresh_token,
            expires_at,
        };
        debug!(
            session = %session,
            has_refresh_token = record.refresh_token.is_some(),
            expires_at = ?record.expires_at,
            "Storing credential record"
        );
        self.records.write().await.insert(session.clone(), record);
    }

    async fn clear(&self, session: &SessionId) {
        if self.records.write().await.remove(session).is_some() {
            debug!(session = %session, "Cleared credential record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn get_on_unknown_session_is_absent() {
        let store = InMemoryCredentialStore::new();
        assert!(store.get(&SessionId::new("s1")).await.is_none());
    }

    #[tokio::test]
    async fn clear_without_record_is_noop() {
        let store = InMemoryCredentialStore::new();
        let session = SessionId::new("s1");
        store.clear(&session).await;
        store.clear(&session).await;
        assert!(store.get(&session).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn clear_removes_every_field() {
        let store = InMemoryCredentialStore::new();
        let session = SessionId::new("s1");
        store
            .set(
                &session,
                AccessToken::new("A"),
                Some(RefreshToken::new("RA")),
                Some(t0()),
            )
            .await;
        store.clear(&session).await;
        assert!(store.get(&session).await.is_none());

        // A later login without a refresh token must not resurrect the old one
        store.set(&session, AccessToken::new("B"), None, None).await;
        let record = store.get(&session).await.unwrap();
        assert_eq!(record.access_token(), &AccessToken::new("B"));
        assert!(record.refresh_token().is_none());
    }

    #[tokio::test]
    async fn set_replaces_whole_record() {
        let store = InMemoryCredentialStore::new();
        let session = SessionId::new("s1");
        let e1 = t0();
        let e2 = t0() + Duration::hours(1);

        store
            .set(&session, AccessToken::new("a1"), Some(RefreshToken::new("r1")), Some(e1))
            .await;
        store
            .set(&session, AccessToken::new("a2"), Some(RefreshToken::new("r2")), Some(e2))
            .await;

        let record = store.get(&session).await.unwrap();
        assert_eq!(record.access_token(), &AccessToken::new("a2"));
        assert_eq!(record.refresh_token(), Some(&RefreshToken::new("r2")));
        assert_eq!(record.expires_at(), Some(e2));

        store.set(&session, AccessToken::new("a3"), None, None).await;
        let record = store.get(&session).await.unwrap();
        assert!(record.refresh_token().is_none());
        assert!(record.expires_at().is_none());
    }

    #[tokio::test]
    async fn set_is_idempotent() {
        let store = InMemoryCredentialStore::new();
        let session = SessionId::new("s1");
        for _ in 0..3 {
            store
                .set(&session, AccessToken::new("a"), Some(RefreshToken::new("r")), Some(t0()))
                .await;
        }
        assert_eq!(store.len().await, 1);
        let record = store.get(&session).await.unwrap();
        assert_eq!(record.access_token(), &AccessToken::new("a"));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = InMemoryCredentialStore::new();
        let s1 = SessionId::new("s1");
        let s2 = SessionId::new("s2");
        store.set(&s1, AccessToken::new("one"), None, None).await;
        store.set(&s2, AccessToken::new("two"), None, None).await;
        store.clear(&s1).await;

        assert!(store.get(&s1).await.is_none());
        assert_eq!(
            store.get(&s2).await.unwrap().access_token(),
            &AccessToken::new("two")
        );
    }

    #[tokio::test]
    async fn near_expiry_scenario() {
        let store = InMemoryCredentialStore::new();
        let session = SessionId::new("s1");
        let now = t0();
        store
            .set(
                &session,
                AccessToken::new("A"),
                Some(RefreshToken::new("RA")),
                Some(now + Duration::seconds(3600)),
            )
            .await;

        let skew = Duration::seconds(60);
        assert!(!store.is_near_expiry_at(&session, skew, now).await);
        assert!(
            store
                .is_near_expiry_at(&session, skew, now + Duration::seconds(3601))
                .await
        );
    }

    #[tokio::test]
    async fn near_expiry_boundary_is_inclusive() {
        let store = InMemoryCredentialStore::new();
        let session = SessionId::new("s1");
        let expires = t0();
        store.set(&session, AccessToken::new("A"), None, Some(expires)).await;

        let skew = Duration::seconds(30);
        assert!(!store.is_near_expiry_at(&session, skew, expires - Duration::seconds(31)).await);
        assert!(store.is_near_expiry_at(&session, skew, expires - Duration::seconds(30)).await);
    }

    #[tokio::test]
    async fn unknown_expiry_or_missing_record_is_not_near_expiry() {
        let store = InMemoryCredentialStore::new();
        let session = SessionId::new("s1");
        assert!(!store.is_near_expiry(&session, Duration::seconds(60)).await);

        store.set(&session, AccessToken::new("A"), None, None).await;
        assert!(
            !store
                .is_near_expiry_at(&session, Duration::days(365), t0())
                .await
        );
    }

    #[test]
    fn near_expiry_never_un_expires() {
        let now = t0();
        let record = CredentialRecord {
            access_token: AccessToken::new("A"),
            refresh_token: None,
            expires_at: Some(now + Duration::seconds(600)),
        };
        let skew = Duration::seconds(60);

        let mut seen_expired = false;
        for step in 0..120 {
            let at = now + Duration::seconds(step * 10);
            let near = record.is_near_expiry_at(skew, at);
            if seen_expired {
                assert!(near, "expiry flipped back at step {step}");
            }
            seen_expired |= near;
        }
        assert!(seen_expired);
    }

    #[test]
    fn generated_session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
