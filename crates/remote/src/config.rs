use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RemoteClientError, Result};

pub const ENV_REMOTE_URL: &str = "REMINDLY_REMOTE_URL";
pub const ENV_REMOTE_API_KEY: &str = "REMINDLY_REMOTE_API_KEY";
pub const ENV_REMOTE_TOKEN: &str = "REMINDLY_REMOTE_TOKEN";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Connection settings for the hosted REST backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// Project URL, e.g. `https://example.supabase.co`.
    pub base_url: String,
    /// Public API key sent as the `apikey` header.
    pub api_key: String,
    /// User session token; the API key is used as bearer when absent.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            access_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    /// Reads `REMINDLY_REMOTE_URL`, `REMINDLY_REMOTE_API_KEY` and the optional
    /// `REMINDLY_REMOTE_TOKEN`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| RemoteClientError::invalid_request(format!("{} is not set", key)))
        };
        let mut config = Self::new(required(ENV_REMOTE_URL)?, required(ENV_REMOTE_API_KEY)?);
        config.access_token = lookup(ENV_REMOTE_TOKEN).filter(|token| !token.trim().is_empty());
        Ok(config)
    }
}
