//! HTTP collaborator for the Library Management System REST API.
//!
//! The session core only sees the [`LibraryApi`] trait: issue one request
//! with an optional bearer token, exchange a refresh token, or log in.
//! [`LibraryClient`] is the reqwest-backed implementation.

mod client;
mod grant;
mod request;

pub use client::LibraryClient;
pub use grant::{parse_grant, TokenGrant};
pub use request::{Access, FileUpload, RequestBody, RequestSpec, UpstreamResponse};

use async_trait::async_trait;

use crate::auth::{Credentials, RefreshToken};
use crate::error::ApiError;

/// Outbound capabilities the session core depends on.
#[async_trait]
pub trait LibraryApi: Send + Sync {
    /// Sends one request, attaching `bearer` as the Authorization credential.
    ///
    /// Any HTTP status is returned as a response; only transport failures
    /// are errors.
    async fn issue(
        &self,
        request: &RequestSpec,
        bearer: Option<&str>,
    ) -> Result<UpstreamResponse, ApiError>;

    /// Exchanges a refresh token for a new grant.
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenGrant, ApiError>;

    /// Authenticates with email and password.
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, ApiError>;
}
