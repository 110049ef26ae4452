use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure taxonomy shared by every call made through the client core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    ClientError,
    AuthError,
    RateLimited,
    ServerError,
    Unknown,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::ClientError => "client_error",
            Self::AuthError => "auth_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a failure of this kind is worth another attempt.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::ServerError
        )
    }

    /// Kinds expected to clear up on their own and granted the larger retry budget.
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized failure surfaced to callers in place of raw transport errors.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    retryable: bool,
    http_status: Option<u16>,
    code: Option<String>,
    message: String,
    raw_response: Option<Value>,
    retry_after: Option<Duration>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            http_status: None,
            code: None,
            message: message.into(),
            raw_response: None,
            retry_after: None,
        }
    }

    /// The caller's cancellation signal fired. Never retried.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Timeout, "request was cancelled")
            .with_code("cancelled")
            .with_retryable(false)
    }

    /// The response arrived but its body could not be decoded.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message).with_code("decode_error")
    }

    /// The request body could not be serialized.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message).with_code("encode_error")
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_raw_response(mut self, raw: Value) -> Self {
        self.raw_response = Some(raw);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn raw_response(&self) -> Option<&Value> {
        self.raw_response.as_ref()
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Timeout && self.code() == Some("cancelled")
    }
}

/// Failures of the persistent credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential blob is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Invalid client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("base url must start with http:// or https://: '{value}'")]
    InvalidBaseUrl { value: String },

    #[error("api version cannot be empty")]
    EmptyApiVersion,

    #[error(transparent)]
    CredentialStore(#[from] StoreError),
}
