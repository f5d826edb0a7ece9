//! Token grants returned by the login and refresh endpoints.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::auth::{AccessToken, RefreshToken};
use crate::error::ApiError;

/// Tokens issued by a successful login or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// New access token.
    pub access_token: AccessToken,
    /// Refresh token, if one was issued or carried over.
    pub refresh_token: Option<RefreshToken>,
    /// Access token expiry, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Extracts a grant from a login/refresh response.
///
/// The payload's `data` object is used when present. The refresh token falls
/// back to the `refreshToken` cookie, then to `fallback_refresh`.
///
/// # Errors
///
/// Returns [`ApiError::InvalidResponse`] when no access token is present.
pub fn parse_grant(
    payload: &Value,
    cookie_refresh: Option<String>,
    fallback_refresh: Option<&RefreshToken>,
) -> Result<TokenGrant, ApiError> {
    let data = payload
        .get("data")
        .filter(|d| d.is_object())
        .unwrap_or(payload);

    let field = |camel: &str, snake: &str| -> Option<&Value> {
        data.get(camel)
            .filter(|v| !v.is_null())
            .or_else(|| data.get(snake).filter(|v| !v.is_null()))
    };

    let access_token = field("accessToken", "access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(AccessToken::new)
        .ok_or_else(|| ApiError::InvalidResponse("access token missing in response".to_string()))?;

    let refresh_token = field("refreshToken", "refresh_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(RefreshToken::new)
        .or_else(|| cookie_refresh.filter(|c| !c.is_empty()).map(RefreshToken::new))
        .or_else(|| fallback_refresh.cloned());

    let expires_at = field("expiresAt", "expires_at")
        .and_then(parse_expiry)
        .or_else(|| jwt_expiry(access_token.as_str()));

    Ok(TokenGrant {
        access_token,
        refresh_token,
        expires_at,
    })
}

/// Accepts RFC 3339 strings and epoch seconds.
fn parse_expiry(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            #[allow(clippy::cast_possible_truncation)] // fractional seconds are dropped
            let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp(secs, 0)
        }
        _ => None,
    }
}

/// Reads the `exp` claim of an unverified JWT. Only used for local expiry checks.
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp").filter(|v| v.is_number())?;
    parse_expiry(exp)
}
