//! Error types for library-mcp.
//!
//! # Security Note
//!
//! Error messages are carefully crafted to NEVER include credentials.
//! Token values and passwords are never interpolated into any variant.

use std::path::PathBuf;

use thiserror::Error;

/// Maximum length of an upstream error body quoted in an error message.
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors produced by the Library API HTTP collaborator.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The API answered 401.
    #[error("Library API error (401): {message}")]
    Unauthorized {
        /// Message extracted from the response body.
        message: String,
    },

    /// The API answered with a non-success status other than 401.
    #[error("Library API error ({status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The request never produced a response.
    #[error("Library API request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The response could not be interpreted.
    #[error("Library API returned an invalid response: {0}")]
    InvalidResponse(String),

    /// A local file referenced by the request could not be read.
    #[error("failed to read upload file: {path}")]
    File {
        /// Path of the file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    /// Builds an error from a non-success status and its decoded body.
    ///
    /// The message is the body's `message` field, else its `error` field,
    /// else the raw body text.
    #[must_use]
    pub fn from_status(status: u16, body: &serde_json::Value) -> Self {
        let message = body
            .get("message")
            .and_then(serde_json::Value::as_str)
            .or_else(|| body.get("error").and_then(serde_json::Value::as_str))
            .map_or_else(
                || match body {
                    serde_json::Value::String(text) => truncate_body(text),
                    other => truncate_body(&other.to_string()),
                },
                str::to_string,
            );

        if status == 401 {
            Self::Unauthorized { message }
        } else {
            Self::Status { status, message }
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// The outcome of a failed tool call, as seen by the tool layer.
#[derive(Error, Debug)]
pub enum CallError {
    /// No usable token, and no refresh succeeded.
    #[error("Authentication required: {reason}")]
    AuthenticationRequired {
        /// Human-readable hint for the end user.
        reason: &'static str,
    },

    /// Any non-authorization failure, propagated unchanged.
    #[error(transparent)]
    Upstream(#[from] ApiError),
}

impl CallError {
    /// Returns `true` for [`CallError::AuthenticationRequired`].
    #[must_use]
    pub const fn is_authentication_required(&self) -> bool {
        matches!(self, Self::AuthenticationRequired { .. })
    }
}

/// Why a token refresh did not produce a new credential record.
///
/// Cloneable because one outcome is shared by every caller waiting on the
/// same in-flight refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailed {
    /// The session has no credential record.
    #[error("no cached session; run the login tool first")]
    NoCredentials,

    /// The session's record carries no refresh token.
    #[error("no refresh token cached; login again")]
    NoRefreshToken,

    /// The refresh endpoint rejected the request or could not be reached.
    #[error("token refresh rejected: {0}")]
    Rejected(String),
}

/// Why a tool call failed, rendered as the `isError` result text.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool name is not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A required argument is absent, null, or empty.
    #[error("Missing required parameter: {0}")]
    MissingArgument(&'static str),

    /// An argument has the wrong type.
    #[error("Invalid parameter '{name}': expected {expected}")]
    InvalidArgument {
        /// Argument name.
        name: &'static str,
        /// Expected type.
        expected: &'static str,
    },

    /// A local path is outside the configured allowed directories.
    #[error("{0}")]
    PathDenied(String),

    /// The call itself failed.
    #[error(transparent)]
    Call(#[from] CallError),
}
