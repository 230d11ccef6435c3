//! Client settings loaded from configuration files and the environment
//!
//! [`ClientSettings`] is the serializable description of an
//! [`HttpClient`](crate::http::HttpClient). Files may be YAML (`.yaml`,
//! `.yml`) or JSON; environment variables override file values.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http::auth::{AuthenticationInterceptor, Token, DEFAULT_MAX_UNAUTHORIZED_ATTEMPTS};
use crate::http::rate_limit::RateLimit;
use crate::http::retry::RetryPolicy;
use crate::http::token_store::DEFAULT_TOKEN_KEY;
use crate::http::transport::TimeoutConfig;

/// Overrides the base URL
pub const ENV_BASE_URL: &str = "COURIER_BASE_URL";
/// Overrides the flat attempt count
pub const ENV_MAX_ATTEMPTS: &str = "COURIER_MAX_ATTEMPTS";
/// Overrides the rate limit permit count
pub const ENV_RATE_LIMIT_REQUESTS: &str = "COURIER_RATE_LIMIT_REQUESTS";
/// Overrides the rate limit window, in milliseconds
pub const ENV_RATE_LIMIT_INTERVAL_MS: &str = "COURIER_RATE_LIMIT_INTERVAL_MS";

/// Serializable client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Base URL routes are resolved against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Flat attempt count, used when no retry policy is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,

    /// Retry policy (preset name or explicit fields)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    /// Client-wide rate limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,

    /// Static headers; values may use `${ENV:NAME}`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Authentication interceptor settings
    pub auth: AuthSettings,

    /// Transport timeouts
    pub timeouts: TimeoutConfig,
}

/// Settings for the authentication interceptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Consecutive 401s that may trigger a refresh-and-retry
    pub max_unauthorized_attempts: usize,

    /// Wait before each 401-triggered refresh
    #[serde(
        rename = "refresh_backoff_ms",
        skip_serializing_if = "Option::is_none",
        with = "crate::util::option_duration_ms"
    )]
    pub refresh_backoff: Option<Duration>,

    /// Only authenticate paths starting with this prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    /// Durable store key the token lives under
    pub token_key: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            max_unauthorized_attempts: DEFAULT_MAX_UNAUTHORIZED_ATTEMPTS,
            refresh_backoff: None,
            path_prefix: None,
            token_key: DEFAULT_TOKEN_KEY.to_string(),
        }
    }
}

impl AuthSettings {
    /// Apply these settings to an interceptor
    pub fn configure<T: Token>(
        &self,
        interceptor: AuthenticationInterceptor<T>,
    ) -> AuthenticationInterceptor<T> {
        let mut interceptor =
            interceptor.with_max_unauthorized_attempts(self.max_unauthorized_attempts);
        if let Some(delay) = self.refresh_backoff {
            interceptor = interceptor.with_refresh_backoff(delay);
        }
        if let Some(prefix) = &self.path_prefix {
            interceptor = interceptor.with_path_prefix(prefix.clone());
        }
        interceptor
    }
}

impl ClientSettings {
    /// Parse settings from YAML
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Configuration {
            message: "Failed to parse YAML settings".to_string(),
            source: Some(e.into()),
        })
    }

    /// Parse settings from JSON
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Configuration {
            message: "Failed to parse JSON settings".to_string(),
            source: Some(e.into()),
        })
    }

    /// Load settings from a file, picking the format from its extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            message: format!("Failed to read config file {}", path.display()),
            source: e,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    /// Apply `COURIER_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = Some(base_url);
        }

        if let Some(value) = lookup(ENV_MAX_ATTEMPTS) {
            self.max_attempts = Some(parse_number(ENV_MAX_ATTEMPTS, &value)?);
        }

        let requests = lookup(ENV_RATE_LIMIT_REQUESTS)
            .map(|value| parse_number(ENV_RATE_LIMIT_REQUESTS, &value))
            .transpose()?;
        let interval = lookup(ENV_RATE_LIMIT_INTERVAL_MS)
            .map(|value| parse_number(ENV_RATE_LIMIT_INTERVAL_MS, &value))
            .transpose()?
            .map(|ms| Duration::from_millis(ms as u64));

        match (self.rate_limit.as_mut(), requests, interval) {
            (_, None, None) => {}
            (Some(limit), requests, interval) => {
                if let Some(requests) = requests {
                    limit.requests = requests;
                }
                if let Some(interval) = interval {
                    limit.interval = interval;
                }
            }
            (None, Some(requests), interval) => {
                self.rate_limit = Some(RateLimit::new(
                    requests,
                    interval.unwrap_or(Duration::from_secs(1)),
                ));
            }
            (None, None, Some(_)) => {
                return Err(Error::configuration(format!(
                    "{} requires {} or a rate_limit section",
                    ENV_RATE_LIMIT_INTERVAL_MS, ENV_RATE_LIMIT_REQUESTS
                )));
            }
        }

        Ok(())
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| Error::configuration("base_url is required"))?;
        url::Url::parse(base_url).map_err(|e| Error::Configuration {
            message: format!("Invalid base URL: {}", base_url),
            source: Some(e.into()),
        })?;

        if self.max_attempts == Some(0) {
            return Err(Error::configuration("max_attempts must be at least 1"));
        }

        if let Some(limit) = &self.rate_limit {
            limit.validate().map_err(Error::configuration)?;
        }

        self.timeouts.validate().map_err(Error::configuration)?;

        if self.auth.token_key.is_empty() {
            return Err(Error::configuration("auth.token_key cannot be empty"));
        }

        Ok(())
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Configuration {
            message: "Failed to serialize settings".to_string(),
            source: Some(e.into()),
        })
    }
}

fn parse_number(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::configuration(format!("{} must be a number, got '{}'", name, value)))
}
