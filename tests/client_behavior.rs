//! Behavior-driven tests for the client core
//!
//! These tests describe what a dashboard call site observes when it talks to
//! the backend through a `ClientContext`: how many round-trips happen, what
//! comes back, and which headers travel with each request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::json;
use tradewire_core::{
    BackoffConfig, ClientConfig, ClientContext, Credential, ErrorKind, HttpResponse, Payload,
    RequestDescriptor, RetryPolicy, ScriptedTransport, TransportError,
};

fn client_with(transport: Arc<ScriptedTransport>, retry: RetryPolicy) -> ClientContext {
    let config = ClientConfig::new("https://trade.example.test/api").with_retry(retry);
    ClientContext::with_transport(config, transport).expect("valid client config")
}

fn fast_retry(max_retries: u32, initial_ms: u64) -> RetryPolicy {
    RetryPolicy::uniform(
        max_retries,
        BackoffConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        },
    )
}

// =============================================================================
// Deduplication
// =============================================================================

#[tokio::test]
async fn concurrent_identical_reads_share_one_round_trip() {
    // Given: A backend that takes 100ms to answer an account lookup
    let transport = Arc::new(
        ScriptedTransport::new([Ok(HttpResponse::ok_json(
            r#"{"data":{"id":42,"equity":1000.5}}"#,
        ))])
        .with_latency(Duration::from_millis(100)),
    );
    let client = client_with(transport.clone(), fast_retry(2, 10));
    let started = Instant::now();

    // When: Two widgets request the same account within 5ms of each other
    let first = tokio::spawn({
        let client = client.clone();
        async move { client.get("/accounts/42").await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.get("/accounts/42").await }
    });

    let first = first.await.expect("task").expect("first call succeeds");
    let second = second.await.expect("task").expect("second call succeeds");

    // Then: Exactly one network call was made and both see the same body
    assert_eq!(transport.calls(), 1, "identical reads should be coalesced");
    assert_eq!(first, second);
    assert_eq!(first, Payload::Json(json!({"id": 42, "equity": 1000.5})));
    assert!(started.elapsed() >= Duration::from_millis(100));

    // And: Nothing is left registered once the call settled
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn many_concurrent_waiters_observe_the_same_failure() {
    // Given: A backend that rejects the request with a validation error
    let transport = Arc::new(
        ScriptedTransport::new([Ok(HttpResponse::json(
            422,
            r#"{"detail":[{"loc":["query","symbol"],"msg":"unknown symbol"}]}"#,
        ))])
        .with_latency(Duration::from_millis(30)),
    );
    let client = client_with(transport.clone(), fast_retry(2, 10));

    // When: Five concurrent callers issue the same read
    let calls: Vec<_> = (0..5)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get("/markets/XYZ/ticker").await })
        })
        .collect();

    let mut errors = Vec::new();
    for call in calls {
        errors.push(call.await.expect("task").expect_err("422 should fail"));
    }

    // Then: One round-trip, five identical errors
    assert_eq!(transport.calls(), 1);
    assert!(errors.iter().all(|error| *error == errors[0]));
    assert_eq!(errors[0].kind(), ErrorKind::ClientError);
    assert_eq!(errors[0].message(), "unknown symbol");
}

#[tokio::test]
async fn reordered_query_parameters_are_distinct_calls() {
    // Given: Two reads that differ only in query parameter order
    let transport = Arc::new(
        ScriptedTransport::with_statuses(&[200]).with_latency(Duration::from_millis(20)),
    );
    let client = client_with(transport.clone(), fast_retry(0, 10));

    let a = RequestDescriptor::get("/orders")
        .with_query("status", "open")
        .with_query("side", "buy");
    let b = RequestDescriptor::get("/orders")
        .with_query("side", "buy")
        .with_query("status", "open");

    // When: They are issued concurrently
    let (a, b) = tokio::join!(client.send(a), client.send(b));

    // Then: Each reaches the network on its own
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.calls(), 2);
}

// =============================================================================
// Retry and classification
// =============================================================================

#[tokio::test]
async fn transient_server_errors_are_retried_until_success() {
    // Given: A backend that fails twice with 503 before answering
    let transport = Arc::new(ScriptedTransport::new([
        Ok(HttpResponse::json(503, "{}")),
        Ok(HttpResponse::json(503, "{}")),
        Ok(HttpResponse::ok_json(r#"{"data":{"status":"ok"}}"#)),
    ]));
    let client = client_with(transport.clone(), fast_retry(2, 10));
    let started = Instant::now();

    // When: The dashboard polls system status
    let payload = client.get("/system/status").await.expect("third attempt succeeds");

    // Then: The call succeeded on the third attempt after 10ms + 20ms of backoff
    assert_eq!(payload, Payload::Json(json!({"status": "ok"})));
    assert_eq!(transport.calls(), 3);
    assert!(
        started.elapsed() >= Duration::from_millis(30),
        "backoff should wait at least 10ms + 20ms, waited {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn validation_errors_are_not_retried() {
    // Given: A backend that rejects an order as unprocessable
    let transport = Arc::new(ScriptedTransport::new([Ok(HttpResponse::json(
        422,
        r#"{"success":false,"error":{"code":"VALIDATION_ERROR","message":"qty must be positive","status_code":422}}"#,
    ))]));
    let client = client_with(transport.clone(), fast_retry(3, 1));

    // When: The user submits the order
    let error = client
        .post_json::<_, serde_json::Value>("/orders", &json!({"symbol": "BTC/USDT", "qty": -1}))
        .await
        .expect_err("422 should surface");

    // Then: Exactly one attempt was made and the backend's message is preserved
    assert_eq!(transport.calls(), 1);
    assert_eq!(error.kind(), ErrorKind::ClientError);
    assert!(!error.retryable());
    assert_eq!(error.http_status(), Some(422));
    assert_eq!(error.code(), Some("VALIDATION_ERROR"));
    assert_eq!(error.message(), "qty must be positive");
}

#[tokio::test]
async fn persistent_server_error_exhausts_the_retry_budget() {
    // Given: A backend that keeps failing with 500 and a budget of 2 retries
    let transport = Arc::new(ScriptedTransport::with_statuses(&[500]));
    let client = client_with(transport.clone(), fast_retry(2, 1));

    // When: The dashboard requests the portfolio
    let error = client.get("/portfolio").await.expect_err("should fail");

    // Then: 1 initial attempt + 2 retries were made before surfacing ServerError
    assert_eq!(transport.calls(), 3);
    assert_eq!(error.kind(), ErrorKind::ServerError);
    assert_eq!(error.message(), "HTTP 500 Internal Server Error");
}

#[tokio::test]
async fn network_failures_surface_as_classified_errors() {
    // Given: A backend that cannot be reached at all
    let transport = Arc::new(ScriptedTransport::new([Err(TransportError::connect(
        "connection refused",
    ))]));
    let client = client_with(transport.clone(), fast_retry(1, 1));

    // When: A read is attempted
    let error = client.get("/bots").await.expect_err("unreachable");

    // Then: The caller receives a Network error, never a raw transport error
    assert_eq!(error.kind(), ErrorKind::Network);
    assert!(error.retryable());
    assert_eq!(error.http_status(), None);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn rate_limit_waits_for_retry_after() {
    // Given: A rate limiter asking the client to wait one second
    let transport = Arc::new(ScriptedTransport::new([
        Ok(HttpResponse::json(429, r#"{"error":{"code":"RATE_LIMITED","message":"slow down"}}"#)
            .with_header("Retry-After", "1")),
        Ok(HttpResponse::ok_json(r#"{"data":[]}"#)),
    ]));
    let client = client_with(transport.clone(), fast_retry(1, 1));
    let started = Instant::now();

    // When: The dashboard lists trades
    let payload = client.get("/trades").await.expect("retry succeeds");

    // Then: The retry honored Retry-After instead of the 1ms backoff
    assert_eq!(payload, Payload::Json(json!([])));
    assert!(started.elapsed() >= Duration::from_secs(1));
}

// =============================================================================
// Envelope normalization
// =============================================================================

#[tokio::test]
async fn every_envelope_version_yields_the_bare_payload() {
    // Given: Three endpoints answering with v2, v1, and raw bodies
    let transport = Arc::new(ScriptedTransport::new([
        Ok(HttpResponse::ok_json(r#"{"data":{"x":1},"meta":{"page":1,"total":1}}"#)),
        Ok(HttpResponse::ok_json(r#"{"data":{"x":1}}"#)),
        Ok(HttpResponse::ok_json(r#"{"x":1}"#)),
    ]));
    let client = client_with(transport, fast_retry(0, 1));

    // When: Each is read
    let v2 = client.get("/v2").await.expect("v2");
    let v1 = client.get("/v1").await.expect("v1");
    let raw = client.get("/raw").await.expect("raw");

    // Then: The caller receives {x: 1} every time
    for payload in [v2, v1, raw] {
        assert_eq!(payload, Payload::Json(json!({"x": 1})));
    }
}

#[tokio::test]
async fn typed_payloads_decode_into_caller_structs() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Bot {
        id: u32,
        name: String,
        running: bool,
    }

    // Given: A v2 envelope listing trading bots
    let transport = Arc::new(ScriptedTransport::new([Ok(HttpResponse::ok_json(
        r#"{"data":[{"id":1,"name":"grid-btc","running":true}],"meta":{"count":1}}"#,
    ))]));
    let client = client_with(transport, fast_retry(0, 1));

    // When: The bots page loads
    let bots: Vec<Bot> = client.get_json("/bots").await.expect("typed payload");

    // Then: It receives typed records
    assert_eq!(
        bots,
        vec![Bot {
            id: 1,
            name: String::from("grid-btc"),
            running: true,
        }]
    );
}

#[tokio::test]
async fn malformed_json_is_a_non_retryable_decode_error() {
    // Given: A backend that claims JSON but sends garbage
    let transport = Arc::new(ScriptedTransport::new([Ok(HttpResponse::ok_json("{truncated"))]));
    let client = client_with(transport.clone(), fast_retry(3, 1));

    // When: The payload is read
    let error = client.get("/portfolio").await.expect_err("decode failure");

    // Then: The caller gets a decode error and no retry happened
    assert_eq!(error.kind(), ErrorKind::Unknown);
    assert_eq!(error.code(), Some("decode_error"));
    assert_eq!(transport.calls(), 1);
}

// =============================================================================
// Headers and correlation
// =============================================================================

#[tokio::test]
async fn outgoing_requests_carry_auth_version_and_correlation_headers() {
    // Given: A signed-in session and a backend that reports correlation ids
    let transport = Arc::new(ScriptedTransport::new([Ok(HttpResponse::ok_json("{}")
        .with_header("X-Request-ID", "req-1")
        .with_header("X-Trace-ID", "trace-abc")
        .with_header("X-Span-ID", "span-9")
        .with_header("X-RateLimit-Remaining", "57")
        .with_header("X-RateLimit-Limit", "60")
        .with_header("X-RateLimit-Reset", "1700000000"))]));
    let client = client_with(transport.clone(), fast_retry(0, 1));
    client.login(Credential::new("secret-token")).expect("login");

    // When: Two calls are made in sequence
    client.get("/portfolio").await.expect("first");
    client
        .send(RequestDescriptor::put("/settings").with_body(r#"{"theme":"dark"}"#))
        .await
        .expect("second");

    // Then: The first call had auth and version headers and a fresh trace id
    let requests = transport.requests();
    assert_eq!(requests[0].header("authorization"), Some("Bearer secret-token"));
    assert_eq!(requests[0].header("x-api-version"), Some("v1"));
    assert_eq!(requests[0].header("x-request-id"), None);
    assert_eq!(requests[0].header("content-type"), None);
    let generated = requests[0].header("x-trace-id").expect("trace id");
    assert_eq!(generated.len(), 32);
    assert!(generated.chars().all(|c| c.is_ascii_hexdigit()));

    // And: The second call echoed the ids the server reported and declared its body
    assert_eq!(requests[1].header("x-request-id"), Some("req-1"));
    assert_eq!(requests[1].header("x-trace-id"), Some("trace-abc"));
    assert_eq!(requests[1].header("content-type"), Some("application/json"));

    // And: The correlation snapshot reflects the latest response
    let snapshot = client.correlation();
    assert_eq!(snapshot.span_id.as_deref(), Some("span-9"));
    assert_eq!(snapshot.rate_limit.remaining, Some(57));
    assert_eq!(snapshot.rate_limit.limit, Some(60));
    assert_eq!(
        snapshot.rate_limit.reset_at.map(|at| at.unix_timestamp()),
        Some(1_700_000_000)
    );
}
