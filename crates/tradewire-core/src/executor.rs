//! Orchestration of one logical call.
//!
//! ```text
//! Pending ──▶ Attempting ──▶ Succeeded
//!                 │  ▲
//!                 │  └── Retrying (after backoff delay)
//!                 ▼
//!               Failed
//! ```
//!
//! Per attempt: attach credentials, attach correlation headers, perform the
//! transport call bounded by the per-attempt deadline and the caller's
//! cancellation signal, then either normalize the body or classify the
//! failure. Suspension happens only while waiting on the transport and while
//! sleeping out a backoff delay.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

use crate::cancel::CancelSignal;
use crate::classify::{classify, AttemptOutcome};
use crate::config::ClientConfig;
use crate::correlation::{CorrelationContext, HEADER_REQUEST_ID};
use crate::envelope::{normalize, Payload};
use crate::error::{ClassifiedError, ErrorKind};
use crate::http_client::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::request::RequestDescriptor;
use crate::retry::RetryState;
use crate::session::AuthSession;

pub const HEADER_API_VERSION: &str = "x-api-version";
pub const HEADER_CONTENT_TYPE: &str = "content-type";

/// Lifecycle of one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Attempting,
    Retrying,
    Succeeded,
    Failed,
}

impl CallState {
    fn advance(self, next: Self, attempt: u32) -> Self {
        debug!(from = ?self, to = ?next, attempt, "call state");
        next
    }
}

enum AttemptResult {
    Cancelled,
    TimedOut(Duration),
    Transport(TransportError),
    Response(HttpResponse),
}

pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    session: Arc<AuthSession>,
    correlation: Arc<CorrelationContext>,
    config: ClientConfig,
}

impl RequestExecutor {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        session: Arc<AuthSession>,
        correlation: Arc<CorrelationContext>,
    ) -> Self {
        Self {
            transport,
            session,
            correlation,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs the call to completion: success, budget exhaustion, a non-retryable
    /// failure, or cancellation.
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<Payload, ClassifiedError> {
        let url = request.url(&self.config.base_url);
        let span = info_span!("api_call", method = %request.method(), url = %url);
        self.run(request, url).instrument(span).await
    }

    async fn run(&self, request: &RequestDescriptor, url: String) -> Result<Payload, ClassifiedError> {
        let started = Instant::now();
        let trace_id = self.correlation.trace_id_for_call();
        let deadline = request.timeout().unwrap_or(self.config.timeout);
        let mut retry = RetryState::new();
        let mut state = CallState::Pending;

        loop {
            state = state.advance(CallState::Attempting, retry.attempt());
            let (http_request, epoch) = self.prepare(request, &url, &trace_id, deadline);

            let error = match self.attempt(http_request, request.cancel(), deadline).await {
                AttemptResult::Cancelled => {
                    state.advance(CallState::Failed, retry.attempt());
                    return Err(ClassifiedError::cancelled());
                }
                AttemptResult::Response(response) if response.is_success() => {
                    self.correlation.record_response(&response);
                    let payload = normalize(&response.body, response.content_type());
                    let next = if payload.is_ok() {
                        CallState::Succeeded
                    } else {
                        CallState::Failed
                    };
                    state.advance(next, retry.attempt());
                    debug!(
                        status = response.status,
                        elapsed_ms = elapsed_ms(started),
                        "call settled"
                    );
                    return payload;
                }
                AttemptResult::Response(response) => {
                    let error = classify(AttemptOutcome::Response(&response));
                    self.record_failed_response(&response, &error);
                    error
                }
                AttemptResult::Transport(transport_error) => {
                    classify(AttemptOutcome::Transport(&transport_error))
                }
                AttemptResult::TimedOut(after) => classify(AttemptOutcome::TimedOut(after)),
            };

            if error.kind() == ErrorKind::AuthError {
                self.session.invalidate_epoch(epoch);
            }

            let budget = match request.max_retries() {
                Some(max_retries) if error.retryable() => max_retries,
                Some(_) => 0,
                None => self.config.retry.budget_for(&error),
            };
            if !retry.can_retry(budget) {
                state.advance(CallState::Failed, retry.attempt());
                debug!(
                    kind = %error.kind(),
                    status = ?error.http_status(),
                    attempts = retry.attempt() + 1,
                    elapsed_ms = elapsed_ms(started),
                    "call failed"
                );
                return Err(error);
            }

            let delay = self.config.retry.delay_for(retry.attempt(), &error);
            state = state.advance(CallState::Retrying, retry.attempt());
            warn!(
                kind = %error.kind(),
                status = ?error.http_status(),
                retry = retry.attempt() + 1,
                budget,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "attempt failed; backing off"
            );

            if !sleep_unless_cancelled(delay, request.cancel()).await {
                state.advance(CallState::Failed, retry.attempt());
                return Err(ClassifiedError::cancelled());
            }
            retry.record_retry(delay);
        }
    }

    /// Builds the wire request and reports the session epoch its credential came from.
    fn prepare(
        &self,
        request: &RequestDescriptor,
        url: &str,
        trace_id: &str,
        deadline: Duration,
    ) -> (HttpRequest, u64) {
        let mut http_request = HttpRequest::new(request.method(), url)
            .with_timeout_ms(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX));

        for (name, value) in request.headers() {
            http_request.headers.insert(name.clone(), value.clone());
        }
        if let Some(body) = request.body() {
            http_request
                .headers
                .entry(String::from(HEADER_CONTENT_TYPE))
                .or_insert_with(|| String::from("application/json"));
            http_request.body = Some(body.to_owned());
        }
        http_request.headers.insert(
            String::from(HEADER_API_VERSION),
            self.config.api_version.clone(),
        );

        let epoch = self.session.attach(&mut http_request.headers);
        self.correlation.apply(&mut http_request.headers, trace_id);
        (http_request, epoch)
    }

    async fn attempt(
        &self,
        request: HttpRequest,
        cancel: Option<&CancelSignal>,
        deadline: Duration,
    ) -> AttemptResult {
        if cancel.is_some_and(CancelSignal::is_cancelled) {
            return AttemptResult::Cancelled;
        }

        let call = tokio::time::timeout(deadline, self.transport.execute(request));
        let outcome = match cancel {
            Some(signal) => tokio::select! {
                biased;
                () = signal.cancelled() => return AttemptResult::Cancelled,
                outcome = call => outcome,
            },
            None => call.await,
        };

        match outcome {
            Err(_) => AttemptResult::TimedOut(deadline),
            Ok(Err(error)) => AttemptResult::Transport(error),
            Ok(Ok(response)) => AttemptResult::Response(response),
        }
    }

    fn record_failed_response(&self, response: &HttpResponse, error: &ClassifiedError) {
        self.correlation.record_response(response);

        if response.header(HEADER_REQUEST_ID).is_none() {
            let body_request_id = error
                .raw_response()
                .and_then(|raw| raw.get("request_id"))
                .and_then(Value::as_str);
            if let Some(request_id) = body_request_id {
                self.correlation.record_request_id(request_id);
            }
        }
    }
}

async fn sleep_unless_cancelled(delay: Duration, cancel: Option<&CancelSignal>) -> bool {
    match cancel {
        Some(signal) => tokio::select! {
            biased;
            () = signal.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        },
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
