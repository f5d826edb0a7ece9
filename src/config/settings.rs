//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;

use serde::Deserialize;
use url::Url;

use crate::auth::{DEFAULT_REFRESH_SKEW_SECS, MAX_REFRESH_SKEW_SECS};
use crate::error::ConfigError;

/// Default Library API base URL.
pub const DEFAULT_BASE_URL: &str = "https://librarymanagementsystem-be.vercel.app/api";

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Library API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Token lifecycle settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Directories from which cover images may be uploaded.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.api.base_url).map_err(|e| ConfigError::ValidationError {
            message: format!("Invalid api.base_url '{}': {e}", self.api.base_url),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid api.base_url scheme '{}'. Must be http or https",
                    url.scheme()
                ),
            });
        }

        if self.api.timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "api.timeout_secs must be greater than zero".to_string(),
            });
        }

        if self.auth.refresh_skew_secs > MAX_REFRESH_SKEW_SECS {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "auth.refresh_skew_secs must be at most {MAX_REFRESH_SKEW_SECS} (one day)"
                ),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ),
            });
        }
        Ok(())
    }

    /// Applies environment overrides through `lookup`.
    ///
    /// Recognised variables: `LIBRARY_API_BASE_URL`, `LIBRARY_API_ACCESS_TOKEN`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup("LIBRARY_API_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.api.base_url = base_url.trim().trim_end_matches('/').to_string();
        }
        if let Some(token) = lookup("LIBRARY_API_ACCESS_TOKEN").filter(|v| !v.is_empty()) {
            self.api.access_token = Some(token);
        }
    }
}

/// Library API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// Base URL of the REST API, including the `/api` prefix.
    #[serde(default = "default_base_url", deserialize_with = "trimmed_url")]
    pub base_url: String,

    /// Fallback bearer token used when no session or per-call token resolves.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

fn trimmed_url<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().trim_end_matches('/').to_string())
}

/// Token lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Refresh the access token this many seconds before it expires.
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_skew_secs: default_refresh_skew_secs(),
        }
    }
}

const fn default_refresh_skew_secs() -> u64 {
    DEFAULT_REFRESH_SKEW_SECS
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.auth.refresh_skew_secs, 30);
        assert!(config.allowed_paths.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "api": {
                "base_url": "http://localhost:5000/api/",
                "access_token": "service-token",
                "timeout_secs": 10
            },
            "auth": {
                "refresh_skew_secs": 120
            },
            "allowed_paths": ["/srv/covers"],
            "logging": {
                "level": "debug"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.base_url, "http://localhost:5000/api");
        assert_eq!(config.api.access_token.as_deref(), Some("service-token"));
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.auth.refresh_skew_secs, 120);
        assert_eq!(config.allowed_paths, vec![PathBuf::from("/srv/covers")]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_non_http_base_url() {
        let json = r#"{"api": {"base_url": "ftp://example.com/api"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unparseable_base_url() {
        let json = r#"{"api": {"base_url": "library api"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_zero_timeout() {
        let json = r#"{"api": {"timeout_secs": 0}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_excessive_skew() {
        let json = r#"{"auth": {"refresh_skew_secs": 90000}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_invalid_log_level() {
        let json = r#"{"logging": {"level": "loud"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_base_url_and_token() {
        let env: HashMap<&str, &str> = [
            ("LIBRARY_API_BASE_URL", "http://127.0.0.1:9000/api/"),
            ("LIBRARY_API_ACCESS_TOKEN", "env-token"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.api.base_url, "http://127.0.0.1:9000/api");
        assert_eq!(config.api.access_token.as_deref(), Some("env-token"));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert!(config.api.access_token.is_none());
    }
}
