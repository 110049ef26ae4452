use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

/// HTTP methods the trading backend exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Side-effect-free methods that may be coalesced by the dedup registry.
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single wire-level request handed to an [`HttpTransport`].
///
/// Header names are stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: 30_000,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
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

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Completed HTTP exchange as seen by the client core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::json(200, body)
    }

    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, body.into().into_bytes()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Failure class reported by the transport when no response was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection refused, DNS failure, TLS handshake failure.
    Connect,
    /// The transport's own deadline elapsed.
    Timeout,
    /// Headers arrived but the body could not be read.
    Body,
    Other,
}

/// Transport-level failure: the request never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;

/// The "perform HTTP request" primitive supplied by the host environment.
///
/// Implementations own connection management; the client core only sees one
/// request in, one response (or transport error) out.
pub trait HttpTransport: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> TransportFuture<'a>;
}

/// Production transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Arc<reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(user_agent)
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    /// Wrap an already configured reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(concat!("tradewire/", env!("CARGO_PKG_VERSION")))
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute<'a>(&'a self, request: HttpRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Head => reqwest::Method::HEAD,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };

            let mut builder = self
                .client
                .request(method, &request.url)
                .timeout(Duration::from_millis(request.timeout_ms));

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::timeout(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    TransportError::connect(format!("connection failed: {e}"))
                } else {
                    TransportError::new(TransportErrorKind::Other, format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_ascii_lowercase(), value.to_owned()))
                })
                .collect();
            let body = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::timeout(format!("response body timeout: {e}"))
                } else {
                    TransportError::new(
                        TransportErrorKind::Body,
                        format!("failed to read response body: {e}"),
                    )
                }
            })?;

            Ok(HttpResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        })
    }
}

type ScriptStep = Result<HttpResponse, TransportError>;

/// Deterministic transport that replays a queue of canned outcomes.
///
/// Once the queue is drained the last step is repeated. Every request is
/// recorded so tests can inspect the headers the client attached.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<ScriptStep>>,
    last: Mutex<Option<ScriptStep>>,
    latency: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Answer every request with the given statuses in order, empty JSON bodies.
    pub fn with_statuses(statuses: &[u16]) -> Self {
        Self::new(
            statuses
                .iter()
                .map(|status| Ok(HttpResponse::json(*status, "{}"))),
        )
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("scripted transport request log should not be poisoned")
            .clone()
    }

    fn next_step(&self) -> ScriptStep {
        let next = self
            .steps
            .lock()
            .expect("scripted transport queue should not be poisoned")
            .pop_front();
        let mut last = self
            .last
            .lock()
            .expect("scripted transport queue should not be poisoned");

        match next {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().unwrap_or_else(|| {
                Err(TransportError::new(
                    TransportErrorKind::Other,
                    "scripted transport has no steps",
                ))
            }),
        }
    }
}

impl HttpTransport for ScriptedTransport {
    fn execute<'a>(&'a self, request: HttpRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .expect("scripted transport request log should not be poisoned")
                .push(request);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            self.next_step()
        })
    }
}
