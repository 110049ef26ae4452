//! Request descriptors and deduplication fingerprints.
//!
//! A [`RequestDescriptor`] is everything a call site knows about one logical
//! call. Its fingerprint is the method plus the full URL as an exact string, so
//! reordered query parameters produce distinct fingerprints.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::cancel::CancelSignal;
use crate::error::ClassifiedError;
use crate::http_client::HttpMethod;

/// One logical call as described by its call site.
///
/// Built with consuming `with_*` methods and immutable afterwards. Reads
/// (`GET`, `HEAD`) opt into deduplication by default; mutating methods can
/// never be deduplicated.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: HttpMethod,
    path: String,
    query: Vec<(String, String)>,
    headers: BTreeMap<String, String>,
    body: Option<String>,
    cancel: Option<CancelSignal>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    dedupe: bool,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
            cancel: None,
            timeout: None,
            max_retries: None,
            dedupe: method.is_read(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Head, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Appends a query parameter. Order is preserved and significant for dedup.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, ClassifiedError> {
        let encoded = serde_json::to_string(body)
            .map_err(|error| ClassifiedError::encode(format!("failed to encode request body: {error}")))?;
        Ok(self.with_body(encoded))
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Per-attempt deadline, overriding the client default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry budget for this call, replacing the per-kind policy budgets.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Ignored for mutating methods.
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe && self.method.is_read();
        self
    }

    pub(crate) fn without_cancel(&self) -> Self {
        Self {
            cancel: None,
            ..self.clone()
        }
    }

    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn cancel(&self) -> Option<&CancelSignal> {
        self.cancel.as_ref()
    }

    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub const fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub const fn dedupe(&self) -> bool {
        self.dedupe
    }

    /// Fully-qualified URL. Absolute paths are used as-is.
    pub fn url(&self, base_url: &str) -> String {
        let mut url = if self.path.starts_with("http://") || self.path.starts_with("https://") {
            self.path.clone()
        } else {
            let base = base_url.trim_end_matches('/');
            let path = self.path.trim_start_matches('/');
            format!("{base}/{path}")
        };

        for (index, (name, value)) in self.query.iter().enumerate() {
            let separator = if index == 0 && !url.contains('?') { '?' } else { '&' };
            url.push(separator);
            url.push_str(&urlencoding::encode(name));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }

        url
    }

    /// Dedup key: `METHOD:url`, compared as an exact string.
    pub fn fingerprint(&self, base_url: &str) -> String {
        format!("{}:{}", self.method.as_str(), self.url(base_url))
    }
}
