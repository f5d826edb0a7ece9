//! reqwest-backed Library API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument};
use url::Url;

use super::grant::{parse_grant, TokenGrant};
use super::request::{Access, RequestBody, RequestSpec, UpstreamResponse};
use super::LibraryApi;
use crate::auth::{Credentials, RefreshToken};
use crate::config::ApiConfig;
use crate::error::ApiError;

/// Cookie carrying the refresh token on the refresh endpoint.
const REFRESH_COOKIE: &str = "refreshToken";

/// Client for the Library API.
/// Clone is cheap - `reqwest::Client` uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct LibraryClient {
    client: Client,
    base_url: Url,
    default_token: Option<String>,
}

impl LibraryClient {
    /// Creates a client from the API configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::InvalidResponse(format!("invalid base URL: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("library-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            default_token: config.access_token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// Returns the API base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Joins path segments onto the base URL, percent-encoding each one.
    #[must_use]
    pub fn endpoint<I, S>(&self, segments: I) -> Url
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn bearer_header(token: &str) -> Result<HeaderValue, ApiError> {
        HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ApiError::InvalidResponse("token contains invalid header characters".to_string()))
    }

    async fn build_body(
        builder: reqwest::RequestBuilder,
        body: &RequestBody,
    ) -> Result<reqwest::RequestBuilder, ApiError> {
        Ok(match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart { fields, file } => {
                let data = file.read().await?;
                let part = Part::bytes(data)
                    .file_name(file.file_name())
                    .mime_str(file.mime_type())?;
                let form = fields
                    .iter()
                    .fold(Form::new(), |form, (k, v)| form.text(k.clone(), v.clone()))
                    .part(file.field.clone(), part);
                builder.multipart(form)
            }
        })
    }

    /// Reads status and body; a non-JSON body becomes a JSON string.
    async fn decode(response: reqwest::Response) -> Result<UpstreamResponse, ApiError> {
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        debug!(status, "Library API responded");
        Ok(UpstreamResponse::new(status, body))
    }

    fn refresh_cookie(response: &reqwest::Response) -> Option<String> {
        response
            .cookies()
            .find(|c| c.name() == REFRESH_COOKIE)
            .map(|c| c.value().to_string())
    }
}

#[async_trait]
impl LibraryApi for LibraryClient {
    #[instrument(skip_all, fields(request = %request.label()))]
    async fn issue(
        &self,
        request: &RequestSpec,
        bearer: Option<&str>,
    ) -> Result<UpstreamResponse, ApiError> {
        let url = self.endpoint(&request.segments);
        let bearer = match request.access {
            Access::Public => None,
            Access::Session => bearer.or(self.default_token.as_deref()),
        };
        debug!(authenticated = bearer.is_some(), "Sending Library API request");

        let mut builder = self.client.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, Self::bearer_header(token)?);
        }
        let builder = Self::build_body(builder, &request.body).await?;

        let response = builder.send().await?;
        Self::decode(response).await
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenGrant, ApiError> {
        let cookie = HeaderValue::from_str(&format!("{REFRESH_COOKIE}={}", refresh_token.as_str()))
            .map_err(|_| {
                ApiError::InvalidResponse("refresh token contains invalid header characters".to_string())
            })?;

        let response = self
            .client
            .post(self.endpoint(["auth", "refresh-token"]))
            .header(header::COOKIE, cookie)
            .send()
            .await?;

        let cookie_refresh = Self::refresh_cookie(&response);
        let body = Self::decode(response).await?.into_result()?;
        parse_grant(&body, cookie_refresh, Some(refresh_token))
    }

    #[instrument(skip_all, fields(email = %credentials.email()))]
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, ApiError> {
        let response = self
            .client
            .post(self.endpoint(["auth", "login"]))
            .json(&json!({
                "email": credentials.email(),
                "password": credentials.password(),
            }))
            .send()
            .await?;

        let cookie_refresh = Self::refresh_cookie(&response);
        let body = Self::decode(response).await?.into_result()?;
        parse_grant(&body, cookie_refresh, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> LibraryClient {
        LibraryClient::new(&ApiConfig {
            base_url: base_url.to_string(),
            ..ApiConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn endpoint_appends_segments() {
        let client = client("https://library.example.com/api");
        assert_eq!(
            client.endpoint(["books", "genres"]).as_str(),
            "https://library.example.com/api/books/genres"
        );
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let client = client("https://library.example.com/api/");
        assert_eq!(
            client.endpoint(["health"]).as_str(),
            "https://library.example.com/api/health"
        );
    }

    #[test]
    fn endpoint_encodes_identifiers() {
        let client = client("https://library.example.com/api");
        assert_eq!(
            client.endpoint(["books", "a/b c"]).as_str(),
            "https://library.example.com/api/books/a%2Fb%20c"
        );
    }

    #[test]
    fn empty_default_token_is_ignored() {
        let client = LibraryClient::new(&ApiConfig {
            access_token: Some(String::new()),
            ..ApiConfig::default()
        })
        .unwrap();
        assert!(client.default_token.is_none());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = LibraryClient::new(&ApiConfig {
            base_url: "not a url".to_string(),
            ..ApiConfig::default()
        });
        assert!(result.is_err());
    }
}
