//! Maps the outcome of one transport attempt onto the [`ErrorKind`] taxonomy.
//!
//! Rules are checked in order:
//!
//! | Outcome | Kind | Retryable |
//! |---------|------|-----------|
//! | transport error, no response | `Network` (or `Timeout` for deadline errors) | yes |
//! | timeout signal | `Timeout` | yes |
//! | 401, 403 | `AuthError` | no |
//! | 429 | `RateLimited` | yes |
//! | 408 | `Timeout` | yes |
//! | other 4xx | `ClientError` | no |
//! | 5xx | `ServerError` | yes |
//! | anything else | `Unknown` | no |

use std::time::Duration;

use serde_json::Value;

use crate::error::{ClassifiedError, ErrorKind};
use crate::http_client::{HttpResponse, TransportError, TransportErrorKind};

/// What a single attempt produced when it did not succeed.
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome<'a> {
    Transport(&'a TransportError),
    TimedOut(Duration),
    Response(&'a HttpResponse),
}

pub fn classify(outcome: AttemptOutcome<'_>) -> ClassifiedError {
    match outcome {
        AttemptOutcome::Transport(error) => match error.kind() {
            TransportErrorKind::Timeout => {
                ClassifiedError::new(ErrorKind::Timeout, error.message()).with_code("timeout")
            }
            _ => ClassifiedError::new(ErrorKind::Network, error.message()).with_code("network"),
        },
        AttemptOutcome::TimedOut(deadline) => ClassifiedError::new(
            ErrorKind::Timeout,
            format!("no response within {} ms", deadline.as_millis()),
        )
        .with_code("timeout"),
        AttemptOutcome::Response(response) => classify_response(response),
    }
}

/// Kind assigned to a bare status code.
pub const fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::AuthError,
        429 => ErrorKind::RateLimited,
        408 => ErrorKind::Timeout,
        400..=499 => ErrorKind::ClientError,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::Unknown,
    }
}

fn classify_response(response: &HttpResponse) -> ClassifiedError {
    let kind = kind_for_status(response.status);
    let details = ErrorBody::parse(&response.body);

    let message = details
        .message
        .unwrap_or_else(|| status_line(response.status));
    let mut error = ClassifiedError::new(kind, message).with_status(response.status);

    if let Some(code) = details.code {
        error = error.with_code(code);
    }
    if let Some(raw) = details.raw {
        error = error.with_raw_response(raw);
    }
    if matches!(response.status, 429 | 503) {
        if let Some(retry_after) = retry_after(response) {
            error = error.with_retry_after(retry_after);
        }
    }

    error
}

/// `HTTP 503 Service Unavailable`, or `HTTP 599` when the code has no reason phrase.
pub fn status_line(status: u16) -> String {
    match reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
    {
        Some(reason) => format!("HTTP {status} {reason}"),
        None => format!("HTTP {status}"),
    }
}

fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Best-effort extraction of `code`/`message` from the error bodies the backend emits.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub raw: Option<Value>,
}

impl ErrorBody {
    pub(crate) fn parse(body: &[u8]) -> Self {
        let Ok(raw) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        let Some(object) = raw.as_object() else {
            return Self {
                raw: Some(raw),
                ..Self::default()
            };
        };

        let mut parsed = Self::default();

        match object.get("error") {
            // {error: {code, message}}
            Some(Value::Object(inner)) => {
                parsed.code = string_field(inner.get("code"));
                parsed.message = string_field(inner.get("message"));
            }
            // {error: "..."}
            Some(Value::String(message)) => parsed.message = Some(message.clone()),
            _ => {}
        }

        if parsed.code.is_none() {
            parsed.code = string_field(object.get("code"));
        }
        if parsed.message.is_none() {
            parsed.message = string_field(object.get("message"))
                .or_else(|| detail_message(object.get("detail")));
        }

        // {detail: {code?, message | error}}
        if let Some(Value::Object(inner)) = object.get("detail") {
            if parsed.code.is_none() {
                parsed.code = string_field(inner.get("code"));
            }
            if parsed.message.is_none() {
                parsed.message = string_field(inner.get("message"))
                    .or_else(|| string_field(inner.get("error")));
            }
        }

        parsed.raw = Some(raw);
        parsed
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

// Validation failures arrive as `detail: [{loc, msg, type}, ...]`.
fn detail_message(detail: Option<&Value>) -> Option<String> {
    match detail? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        _ => None,
    }
}
