//! Client configuration.
//!
//! # Environment Variables
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `TRADEWIRE_BASE_URL` | `base_url` | `http://localhost:8000/api` |
//! | `TRADEWIRE_API_VERSION` | `api_version` | `v1` |
//! | `TRADEWIRE_TIMEOUT_MS` | `timeout` | 30000 |
//! | `TRADEWIRE_MAX_RETRIES` | `retry.max_retries` | 2 |
//! | `TRADEWIRE_CREDENTIALS_PATH` | `credentials_path` | unset |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub const ENV_BASE_URL: &str = "TRADEWIRE_BASE_URL";
pub const ENV_API_VERSION: &str = "TRADEWIRE_API_VERSION";
pub const ENV_TIMEOUT_MS: &str = "TRADEWIRE_TIMEOUT_MS";
pub const ENV_MAX_RETRIES: &str = "TRADEWIRE_MAX_RETRIES";
pub const ENV_CREDENTIALS_PATH: &str = "TRADEWIRE_CREDENTIALS_PATH";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Sent as `X-API-Version` on every request.
    pub api_version: String,
    /// Per-attempt deadline.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
    /// Where the credential blob is persisted, if anywhere.
    pub credentials_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("http://localhost:8000/api"),
            api_version: String::from("v1"),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            user_agent: concat!("tradewire/", env!("CARGO_PKG_VERSION")).to_owned(),
            credentials_path: None,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `TRADEWIRE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(api_version) = lookup(ENV_API_VERSION) {
            config.api_version = api_version;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_MS) {
            let millis = parse_number::<u64>(ENV_TIMEOUT_MS, &value)?;
            config.timeout = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            config.retry.max_retries = parse_number(ENV_MAX_RETRIES, &value)?;
        }
        if let Some(path) = lookup(ENV_CREDENTIALS_PATH).filter(|path| !path.trim().is_empty()) {
            config.credentials_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.base_url.trim();
        let authority = base_url
            .strip_prefix("https://")
            .or_else(|| base_url.strip_prefix("http://"));
        if authority.map_or(true, |rest| rest.trim_matches('/').is_empty()) {
            return Err(ConfigError::InvalidBaseUrl {
                value: self.base_url.clone(),
            });
        }

        if self.api_version.trim().is_empty() {
            return Err(ConfigError::EmptyApiVersion);
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: ENV_TIMEOUT_MS,
                value: String::from("0"),
            });
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
        })
}
