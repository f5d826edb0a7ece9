//! Token lifecycle around every outbound Library API call.
//!
//! Each call walks a small state machine:
//!
//! ```text
//! PREPARE ──▶ EXECUTE ──▶ DONE
//!                │ 401 + refresh token
//!                ▼
//!          REFRESH_RETRY ──▶ EXECUTE2 ──▶ DONE
//!                │ failed        │ 401
//!                ▼               ▼
//!              FAIL            FAIL
//! ```
//!
//! Refreshes are serialised per session: callers that need a refresh while
//! one is in flight for the same session await the same shared outcome.
//! A refresh that completes after the session was logged in again, logged
//! out or ended never writes its grant back.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::credentials::Credentials;
use super::store::{CredentialRecord, CredentialStore, SessionId};
use super::tokens::AccessToken;
use crate::api::{Access, LibraryApi, RequestSpec, UpstreamResponse};
use crate::error::{CallError, RefreshFailed};

/// Default proactive refresh margin.
pub const DEFAULT_REFRESH_SKEW_SECS: u64 = 30;

/// Largest accepted proactive refresh margin.
pub const MAX_REFRESH_SKEW_SECS: u64 = 86_400;

const REFRESH_FAILED_REASON: &str =
    "authorization failed and refresh could not be completed; please login again";
const STILL_UNAUTHORIZED_REASON: &str =
    "authorization failed after refreshing the access token; please login again";
const NO_TOKEN_REASON: &str = "the Library API rejected the request; run the login tool first";

type PendingRefresh = Shared<BoxFuture<'static, Result<CredentialRecord, RefreshFailed>>>;

/// Login generation of each session.
///
/// Every login, logout and session end moves the session to a new
/// generation. A refresh only writes back if the generation it started
/// under is still current.
#[derive(Debug, Default)]
struct Generations {
    last: u64,
    current: HashMap<SessionId, u64>,
}

impl Generations {
    fn of(&self, session: &SessionId) -> u64 {
        self.current.get(session).copied().unwrap_or(0)
    }

    fn advance(&mut self, session: &SessionId) {
        self.last += 1;
        self.current.insert(session.clone(), self.last);
    }
}

/// The bearer credential resolved for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Bearer {
    /// No credential (public endpoint, or nothing cached).
    Anonymous,
    /// Per-call override supplied by the caller. Never refreshed.
    Explicit(String),
    /// The session's stored access token.
    Session {
        /// Token sent with the request.
        token: AccessToken,
        /// Whether the record held a refresh token when resolved.
        refreshable: bool,
    },
}

impl Bearer {
    fn as_header_token(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Explicit(token) => Some(token),
            Self::Session { token, .. } => Some(token.as_str()),
        }
    }
}

/// Per-call states.
#[derive(Debug)]
enum Phase {
    Prepare,
    Execute(Bearer),
    RefreshRetry(AccessToken),
    ExecuteRetry(AccessToken),
}

/// Summary of a successful login, safe to return to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSummary {
    /// Whether a refresh token was cached.
    pub has_refresh_token: bool,
    /// Access token expiry, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Makes every call behave as if it carried a valid bearer token.
pub struct Orchestrator {
    store: Arc<dyn CredentialStore>,
    api: Arc<dyn LibraryApi>,
    refresh_skew: Duration,
    in_flight: Mutex<HashMap<SessionId, PendingRefresh>>,
    generations: Arc<Mutex<Generations>>,
}

impl Orchestrator {
    /// Creates an orchestrator over an injected store and API.
    ///
    /// The refresh skew is capped at one day.
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        api: Arc<dyn LibraryApi>,
        refresh_skew_secs: u64,
    ) -> Self {
        let skew_secs = i64::try_from(refresh_skew_secs.min(MAX_REFRESH_SKEW_SECS)).unwrap_or(0);
        Self {
            store,
            api,
            refresh_skew: Duration::seconds(skew_secs),
            in_flight: Mutex::new(HashMap::new()),
            generations: Arc::new(Mutex::new(Generations::default())),
        }
    }

    /// Logs in and caches the resulting tokens for `session`.
    ///
    /// Bypasses token attachment entirely; the password is used for this
    /// request only.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Upstream`] when the login request fails.
    #[instrument(skip_all, fields(session = %session))]
    pub async fn login(
        &self,
        session: &SessionId,
        credentials: &Credentials,
    ) -> Result<LoginSummary, CallError> {
        let grant = self.api.login(credentials).await?;
        let summary = LoginSummary {
            has_refresh_token: grant.refresh_token.is_some(),
            expires_at: grant.expires_at,
        };
        {
            let mut generations = self.generations.lock().await;
            generations.advance(session);
            self.store
                .set(session, grant.access_token, grant.refresh_token, grant.expires_at)
                .await;
            self.in_flight.lock().await.remove(session);
        }
        info!(
            has_refresh_token = summary.has_refresh_token,
            "Login succeeded, tokens cached"
        );
        Ok(summary)
    }

    /// Forgets the session's tokens. A refresh still in flight is
    /// discarded when it completes.
    pub async fn logout(&self, session: &SessionId) {
        let mut generations = self.generations.lock().await;
        generations.advance(session);
        self.store.clear(session).await;
        self.in_flight.lock().await.remove(session);
        info!(session = %session, "Session credentials cleared");
    }

    /// Tears down everything held for a session that has ended.
    pub async fn end_session(&self, session: &SessionId) {
        let mut generations = self.generations.lock().await;
        self.store.clear(session).await;
        self.in_flight.lock().await.remove(session);
        generations.current.remove(session);
        debug!(session = %session, "Session ended");
    }

    /// Performs one tool call with the token lifecycle applied.
    ///
    /// # Errors
    ///
    /// - [`CallError::AuthenticationRequired`] when the upstream rejects the
    ///   credential and no refresh-and-retry recovers it.
    /// - [`CallError::Upstream`] for every other failure, unchanged.
    #[instrument(skip_all, fields(session = %session, request = %request.label()))]
    pub async fn perform_call(
        &self,
        session: &SessionId,
        explicit_token: Option<&str>,
        request: &RequestSpec,
    ) -> Result<Value, CallError> {
        let generation = self.generations.lock().await.of(session);
        let mut phase = Phase::Prepare;
        loop {
            phase = match phase {
                Phase::Prepare => Phase::Execute(self.prepare(session, explicit_token, request).await),

                Phase::Execute(bearer) => {
                    let response = self.execute(request, &bearer).await?;
                    if !response.is_unauthorized() {
                        return Ok(response.into_result()?);
                    }
                    match bearer {
                        Bearer::Session {
                            token,
                            refreshable: true,
                        } => Phase::RefreshRetry(token),
                        Bearer::Anonymous if request.access == Access::Public => {
                            return Ok(response.into_result()?);
                        }
                        _ => {
                            debug!("Unauthorized with no refresh path");
                            return Err(CallError::AuthenticationRequired {
                                reason: NO_TOKEN_REASON,
                            });
                        }
                    }
                }

                Phase::RefreshRetry(rejected) => {
                    match self.refresh_session(session, &rejected).await {
                        Ok(record) => Phase::ExecuteRetry(record.access_token().clone()),
                        Err(e) => {
                            warn!(error = %e, "Refresh after 401 failed, clearing session");
                            self.clear_if_unchanged(session, generation, &rejected).await;
                            return Err(CallError::AuthenticationRequired {
                                reason: REFRESH_FAILED_REASON,
                            });
                        }
                    }
                }

                Phase::ExecuteRetry(token) => {
                    let bearer = Bearer::Session {
                        token,
                        refreshable: false,
                    };
                    let response = self.execute(request, &bearer).await?;
                    if response.is_unauthorized() {
                        return Err(CallError::AuthenticationRequired {
                            reason: STILL_UNAUTHORIZED_REASON,
                        });
                    }
                    return Ok(response.into_result()?);
                }
            };
        }
    }

    /// Resolves the bearer for the first attempt, refreshing proactively
    /// when the stored token is near expiry.
    async fn prepare(
        &self,
        session: &SessionId,
        explicit_token: Option<&str>,
        request: &RequestSpec,
    ) -> Bearer {
        if request.access == Access::Public {
            return Bearer::Anonymous;
        }
        if let Some(token) = explicit_token.filter(|t| !t.is_empty()) {
            return Bearer::Explicit(token.to_string());
        }
        let Some(record) = self.store.get(session).await else {
            return Bearer::Anonymous;
        };

        let near_expiry = record.is_near_expiry_at(self.refresh_skew, Utc::now());
        if near_expiry && record.refresh_token().is_some() {
            debug!("Access token near expiry, refreshing proactively");
            match self.refresh_session(session, record.access_token()).await {
                Ok(fresh) => return Self::session_bearer(&fresh),
                Err(e) => warn!(error = %e, "Proactive refresh failed, using existing token"),
            }
        }
        Self::session_bearer(&record)
    }

    /// Clears the session unless it was logged in, out or refreshed since
    /// `generation` and `rejected` were observed.
    async fn clear_if_unchanged(&self, session: &SessionId, generation: u64, rejected: &AccessToken) {
        let generations = self.generations.lock().await;
        let still_rejected = self
            .store
            .get(session)
            .await
            .is_some_and(|record| record.access_token() == rejected);
        if generations.of(session) == generation && still_rejected {
            self.store.clear(session).await;
        } else {
            debug!("Session changed during refresh, keeping it");
        }
    }

    fn session_bearer(record: &CredentialRecord) -> Bearer {
        Bearer::Session {
            token: record.access_token().clone(),
            refreshable: record.refresh_token().is_some(),
        }
    }

    async fn execute(
        &self,
        request: &RequestSpec,
        bearer: &Bearer,
    ) -> Result<UpstreamResponse, CallError> {
        Ok(self.api.issue(request, bearer.as_header_token()).await?)
    }

    /// Refreshes the session's tokens, at most once at a time per session.
    ///
    /// `observed` is the access token the caller saw. If the stored token has
    /// already moved on, that record is returned without another round trip.
    async fn refresh_session(
        &self,
        session: &SessionId,
        observed: &AccessToken,
    ) -> Result<CredentialRecord, RefreshFailed> {
        let generation = self.generations.lock().await.of(session);
        let pending = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(pending) = in_flight.get(session) {
                debug!("Joining in-flight refresh");
                pending.clone()
            } else {
                let current = self.store.get(session).await.ok_or(RefreshFailed::NoCredentials)?;
                if current.access_token() != observed {
                    debug!("Token already refreshed by a sibling call");
                    return Ok(current);
                }
                let pending = Self::run_refresh(
                    Arc::clone(&self.store),
                    Arc::clone(&self.api),
                    Arc::clone(&self.generations),
                    session.clone(),
                    current,
                    generation,
                )
                .boxed()
                .shared();
                in_flight.insert(session.clone(), pending.clone());
                pending
            }
        };

        let outcome = pending.clone().await;

        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(session)
            .is_some_and(|current| current.ptr_eq(&pending))
        {
            in_flight.remove(session);
        }
        outcome
    }

    /// Exchanges `record`'s refresh token and stores the grant, unless the
    /// session moved past `generation` or `record` meanwhile. In that case
    /// the grant is dropped and the session's current record is returned.
    async fn run_refresh(
        store: Arc<dyn CredentialStore>,
        api: Arc<dyn LibraryApi>,
        generations: Arc<Mutex<Generations>>,
        session: SessionId,
        record: CredentialRecord,
        generation: u64,
    ) -> Result<CredentialRecord, RefreshFailed> {
        let refresh_token = record
            .refresh_token()
            .cloned()
            .ok_or(RefreshFailed::NoRefreshToken)?;

        info!(session = %session, "Refreshing access token");
        let grant = api
            .refresh(&refresh_token)
            .await
            .map_err(|e| RefreshFailed::Rejected(e.to_string()))?;

        let generations = generations.lock().await;
        let current = store.get(&session).await;
        let unchanged = generations.of(&session) == generation
            && current
                .as_ref()
                .is_some_and(|c| c.access_token() == record.access_token());
        if !unchanged {
            debug!(session = %session, "Session changed during refresh, discarding grant");
            return current.ok_or(RefreshFailed::NoCredentials);
        }

        store
            .set(&session, grant.access_token, grant.refresh_token, grant.expires_at)
            .await;
        store.get(&session).await.ok_or(RefreshFailed::NoCredentials)
    }
}
