//! Client configuration

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::DEFAULT_BASE_URL;
use crate::error::{ApiError, Result};
use crate::retry::RetryPolicy;

pub const API_KEY_ENV: &str = "HEALTHCHECKS_API_KEY";
pub const BASE_URL_ENV: &str = "HEALTHCHECKS_BASE_URL";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Project API key, sent as `X-Api-Key`. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Settings for a `HealthchecksClient`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api_key: ApiKey,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Upper bound on a single attempt, connect through body. `null` turns
    /// the bound off.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Emit a `warn` event for every retried attempt. Off by default so the
    /// client stays quiet unless asked.
    #[serde(default)]
    pub log_retries: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> Option<Duration> {
    Some(DEFAULT_REQUEST_TIMEOUT)
}

fn default_user_agent() -> String {
    format!("healthchecks-rs/{}", env!("CARGO_PKG_VERSION"))
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: ApiKey::new(api_key),
            base_url: default_base_url(),
            retry: RetryPolicy::default(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            log_retries: false,
        }
    }

    /// Read `HEALTHCHECKS_API_KEY` and, if set, `HEALTHCHECKS_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup(API_KEY_ENV)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::Config(format!("{API_KEY_ENV} is not set")))?;
        let mut config = Self::new(api_key);
        if let Some(base_url) = lookup(BASE_URL_ENV).filter(|v| !v.is_empty()) {
            config.base_url = base_url;
        }
        tracing::debug!("Loaded client configuration for {}", config.base_url);
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_log_retries(mut self, enabled: bool) -> Self {
        self.log_retries = enabled;
        self
    }
}
