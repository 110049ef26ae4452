//! Request-tracing identifiers and rate-limit counters observed from prior responses.
//!
//! The context is advisory telemetry: each response carrying correlation
//! headers overwrites the fields it carries, last write wins.

use std::collections::BTreeMap;
use std::sync::RwLock;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::http_client::HttpResponse;

pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_TRACE_ID: &str = "x-trace-id";
pub const HEADER_SPAN_ID: &str = "x-span-id";
pub const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    pub reset_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationSnapshot {
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub rate_limit: RateLimitSnapshot,
}

/// Shared, last-write-wins correlation state.
#[derive(Debug, Default)]
pub struct CorrelationContext {
    inner: RwLock<CorrelationSnapshot>,
}

impl CorrelationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CorrelationSnapshot {
        self.inner
            .read()
            .expect("correlation context lock should not be poisoned")
            .clone()
    }

    /// Trace id for a new logical call: the last one the server reported, or a fresh one.
    pub fn trace_id_for_call(&self) -> String {
        self.inner
            .read()
            .expect("correlation context lock should not be poisoned")
            .trace_id
            .clone()
            .unwrap_or_else(generate_trace_id)
    }

    /// Writes `X-Request-ID` (echo of the last known id) and `X-Trace-ID`.
    pub fn apply(&self, headers: &mut BTreeMap<String, String>, trace_id: &str) {
        if let Some(request_id) = self.snapshot().request_id {
            headers.insert(String::from(HEADER_REQUEST_ID), request_id);
        }
        headers.insert(String::from(HEADER_TRACE_ID), trace_id.to_owned());
    }

    /// Overwrites every field the response carries. Returns whether anything changed.
    pub fn record_response(&self, response: &HttpResponse) -> bool {
        let request_id = non_empty(response.header(HEADER_REQUEST_ID));
        let trace_id = non_empty(response.header(HEADER_TRACE_ID));
        let span_id = non_empty(response.header(HEADER_SPAN_ID));
        let remaining = parse_counter(response.header(HEADER_RATE_LIMIT_REMAINING));
        let limit = parse_counter(response.header(HEADER_RATE_LIMIT_LIMIT));
        let reset_at = response
            .header(HEADER_RATE_LIMIT_RESET)
            .and_then(parse_reset);

        let carries_any = request_id.is_some()
            || trace_id.is_some()
            || span_id.is_some()
            || remaining.is_some()
            || limit.is_some()
            || reset_at.is_some();
        if !carries_any {
            return false;
        }

        let mut inner = self
            .inner
            .write()
            .expect("correlation context lock should not be poisoned");
        if request_id.is_some() {
            inner.request_id = request_id;
        }
        if trace_id.is_some() {
            inner.trace_id = trace_id;
        }
        if span_id.is_some() {
            inner.span_id = span_id;
        }
        if remaining.is_some() {
            inner.rate_limit.remaining = remaining;
        }
        if limit.is_some() {
            inner.rate_limit.limit = limit;
        }
        if reset_at.is_some() {
            inner.rate_limit.reset_at = reset_at;
        }
        true
    }

    /// Records a request id found in an error body when the header was absent.
    pub fn record_request_id(&self, request_id: impl Into<String>) {
        self.inner
            .write()
            .expect("correlation context lock should not be poisoned")
            .request_id = Some(request_id.into());
    }
}

/// 32 lowercase hex characters, W3C trace-context style.
pub fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

// The backend reports "unlimited" for exempt callers.
fn parse_counter(value: Option<&str>) -> Option<u64> {
    value.and_then(|value| value.trim().parse().ok())
}

fn parse_reset(value: &str) -> Option<OffsetDateTime> {
    let seconds = value.trim().parse::<i64>().ok()?;
    OffsetDateTime::from_unix_timestamp(seconds).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_identifiers_and_rate_limits() {
        let context = CorrelationContext::new();
        let response = HttpResponse::ok_json("{}")
            .with_header("X-Request-ID", "req-1")
            .with_header("X-Trace-ID", "0123456789abcdef0123456789abcdef")
            .with_header("X-Span-ID", "span-9")
            .with_header("X-RateLimit-Remaining", "42")
            .with_header("X-RateLimit-Limit", "100")
            .with_header("X-RateLimit-Reset", "1700000000");

        assert!(context.record_response(&response));

        let snapshot = context.snapshot();
        assert_eq!(snapshot.request_id.as_deref(), Some("req-1"));
        assert_eq!(
            snapshot.trace_id.as_deref(),
            Some("0123456789abcdef0123456789abcdef")
        );
        assert_eq!(snapshot.span_id.as_deref(), Some("span-9"));
        assert_eq!(snapshot.rate_limit.remaining, Some(42));
        assert_eq!(snapshot.rate_limit.limit, Some(100));
        assert_eq!(
            snapshot.rate_limit.reset_at.map(OffsetDateTime::unix_timestamp),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn later_response_overwrites_earlier_values() {
        let context = CorrelationContext::new();
        context.record_response(&HttpResponse::ok_json("{}").with_header("x-request-id", "a"));
        context.record_response(&HttpResponse::ok_json("{}").with_header("x-request-id", "b"));

        assert_eq!(context.snapshot().request_id.as_deref(), Some("b"));
    }

    #[test]
    fn unlimited_counters_are_ignored() {
        let context = CorrelationContext::new();
        let response = HttpResponse::ok_json("{}")
            .with_header("x-ratelimit-remaining", "unlimited")
            .with_header("x-ratelimit-limit", "unlimited");

        assert!(!context.record_response(&response));
        assert_eq!(context.snapshot(), CorrelationSnapshot::default());
    }

    #[test]
    fn apply_echoes_last_request_id() {
        let context = CorrelationContext::new();
        let mut headers = BTreeMap::new();
        context.apply(&mut headers, "trace");
        assert!(!headers.contains_key(HEADER_REQUEST_ID));
        assert_eq!(headers.get(HEADER_TRACE_ID).map(String::as_str), Some("trace"));

        context.record_request_id("req-7");
        context.apply(&mut headers, "trace");
        assert_eq!(headers.get(HEADER_REQUEST_ID).map(String::as_str), Some("req-7"));
    }

    #[test]
    fn generated_trace_ids_are_hex() {
        let context = CorrelationContext::new();
        let trace_id = context.trace_id_for_call();

        assert_eq!(trace_id.len(), 32);
        assert!(trace_id.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
