use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use fetchx::prelude::*;
use futures_util::future::BoxFuture;
use http::header::HeaderName;
use http::{HeaderMap, StatusCode};
use serde_json::json;

#[derive(Clone, Debug)]
struct MockResponse {
    status: u16,
    body: Vec<u8>,
    delay: Duration,
}

impl MockResponse {
    fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    fn json(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    calls: AtomicUsize,
}

impl MockTransport {
    fn new(responses: Vec<MockResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'static, Result<TransportResponse, TransportFailure>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().expect("lock responses").pop_front();
        let cancel = request.cancel.clone();
        Box::pin(async move {
            let Some(mock) = next else {
                cancel.cancelled().await;
                return Err(TransportFailure::Aborted);
            };
            if !mock.delay.is_zero() {
                tokio::time::sleep(mock.delay).await;
            }
            let mut headers = HeaderMap::new();
            if !mock.body.is_empty() {
                headers.append(
                    "content-type".parse::<HeaderName>().expect("header name"),
                    "application/json".parse().expect("header value"),
                );
            }
            Ok(TransportResponse::from_bytes(
                StatusCode::from_u16(mock.status).expect("mock status"),
                headers,
                Bytes::from(mock.body),
            ))
        })
    }
}

fn client_with(transport: Arc<MockTransport>) -> Client {
    Client::builder("https://api.test")
        .transport(transport)
        .try_build()
        .expect("build client")
}

#[tokio::test]
async fn retries_run_until_budget_is_exhausted() {
    let transport = MockTransport::new(vec![
        MockResponse::status(500),
        MockResponse::status(500),
        MockResponse::status(500),
    ]);
    let client = client_with(transport.clone());
    client.set_throw_on_http_error(false);

    let response = client
        .get(
            "/flaky",
            RequestOptions::new()
                .retries(3)
                .retry_codes([500])
                .retry_after(Duration::ZERO),
        )
        .await
        .expect("result mode should resolve with the failure");

    assert_eq!(transport.calls(), 3);
    assert!(!response.ok());
    assert_eq!(response.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(
        response.error().map(|reason| reason.kind),
        Some(FailureKind::HttpStatus)
    );
    assert_eq!(client.metrics_snapshot().retries, 2);
}

#[tokio::test]
async fn exhausted_retries_reject_in_throw_mode() {
    let transport = MockTransport::new(vec![
        MockResponse::status(500),
        MockResponse::status(500),
        MockResponse::status(500),
    ]);
    let client = client_with(transport.clone());

    let error = client
        .get(
            "/flaky",
            RequestOptions::new()
                .retries(3)
                .retry_codes([500])
                .retry_after(Duration::ZERO),
        )
        .await
        .expect_err("throw mode should reject after the final attempt");

    assert_eq!(transport.calls(), 3);
    match error {
        Error::HttpStatus { status, .. } => assert_eq!(status, 500),
        other => panic!("unexpected error variant: {other}"),
    }
}

#[tokio::test]
async fn retry_stops_as_soon_as_an_attempt_succeeds() {
    let transport = MockTransport::new(vec![
        MockResponse::status(503),
        MockResponse::json(200, "{\"ok\":true}"),
    ]);
    let client = client_with(transport.clone());

    let response = client
        .get(
            "/recovering",
            RequestOptions::new().retries(3).retry_after(Duration::ZERO),
        )
        .await
        .expect("second attempt should succeed");

    assert_eq!(transport.calls(), 2);
    assert!(response.ok());
    assert_eq!(response.data().as_json(), Some(&json!({ "ok": true })));
}

#[tokio::test]
async fn statuses_outside_the_retryable_set_are_not_retried() {
    let transport = MockTransport::new(vec![MockResponse::status(500)]);
    let client = client_with(transport.clone());
    client.set_throw_on_http_error(false);

    let response = client
        .get(
            "/fatal",
            RequestOptions::new()
                .retries(3)
                .retry_codes([502])
                .retry_after(Duration::ZERO),
        )
        .await
        .expect("result mode should resolve");

    assert_eq!(transport.calls(), 1);
    assert_eq!(response.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
}

#[tokio::test]
async fn client_retry_codes_accumulate_onto_the_per_call_list_between_attempts() {
    let transport = MockTransport::new(vec![
        MockResponse::status(500),
        MockResponse::status(502),
        MockResponse::json(200, "{\"ok\":true}"),
    ]);
    let client = client_with(transport.clone());

    // First attempt only retries on 500; the client's global list (which
    // includes 502) is concatenated before the second attempt runs.
    let response = client
        .get(
            "/escalating",
            RequestOptions::new()
                .retries(3)
                .retry_codes([500])
                .retry_after(Duration::ZERO),
        )
        .await
        .expect("third attempt should succeed");

    assert_eq!(transport.calls(), 3);
    assert!(response.ok());
}

#[tokio::test]
async fn request_interceptors_rerun_on_every_attempt() {
    let transport = MockTransport::new(vec![
        MockResponse::status(500),
        MockResponse::status(500),
    ]);
    let client = client_with(transport);
    client.set_throw_on_http_error(false);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    client.request_interceptor(move |request: RequestDescriptor| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(InterceptedRequest::proceed(request))
        }
    });

    client
        .get(
            "/flaky",
            RequestOptions::new()
                .retries(2)
                .retry_codes([500])
                .retry_after(Duration::ZERO),
        )
        .await
        .expect("result mode should resolve");

    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn aborting_request_interceptor_prevents_any_transport_call() {
    let transport = MockTransport::new(vec![MockResponse::status(200)]);
    let client = client_with(transport.clone());
    client.set_throw_on_http_error(false);
    client.request_interceptor(|request: RequestDescriptor| async move {
        Ok(InterceptedRequest::abort(request))
    });

    let response = client
        .get("/guarded", RequestOptions::new())
        .await
        .expect("result mode should resolve with the abort");

    assert_eq!(transport.calls(), 0);
    assert_eq!(response.status(), None);
    assert_eq!(
        response.error().map(|reason| reason.kind),
        Some(FailureKind::Abort)
    );
}

#[tokio::test]
async fn abort_flag_is_owned_by_the_last_interceptor_to_run() {
    let transport = MockTransport::new(vec![MockResponse::status(200)]);
    let client = client_with(transport.clone());
    client
        .request_interceptor(|request: RequestDescriptor| async move {
            Ok(InterceptedRequest::abort(request))
        })
        .request_interceptor(|request: RequestDescriptor| async move {
            Ok(InterceptedRequest::proceed(request))
        });

    let response = client
        .get("/overruled", RequestOptions::new())
        .await
        .expect("the later interceptor clears the abort vote");

    assert!(response.ok());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn aborting_request_interceptor_rejects_in_throw_mode() {
    let transport = MockTransport::new(vec![MockResponse::status(200)]);
    let client = client_with(transport.clone());
    client.request_interceptor(|request: RequestDescriptor| async move {
        Ok(InterceptedRequest::abort(request))
    });

    let error = client
        .get("/guarded", RequestOptions::new())
        .await
        .expect_err("throw mode should reject the abort");
    assert_eq!(error.code(), ErrorCode::Abort);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_cancels_the_token_and_rejects() {
    let transport = MockTransport::new(Vec::new());
    let client = client_with(transport.clone());
    let token = CancellationToken::new();

    let error = client
        .get(
            "/stalled",
            RequestOptions::new()
                .timeout(Duration::from_millis(50))
                .controller(token.clone()),
        )
        .await
        .expect_err("throw mode should reject on timeout");

    match error {
        Error::Timeout { timeout_ms, .. } => assert_eq!(timeout_ms, 50),
        other => panic!("unexpected error variant: {other}"),
    }
    assert!(token.is_cancelled());
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.metrics_snapshot().timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_resolves_with_a_failure_when_throw_is_disabled() {
    let transport = MockTransport::new(Vec::new());
    let client = client_with(transport);
    client.set_throw_on_http_error(false);

    let response = client
        .get(
            "/stalled",
            RequestOptions::new().timeout(Duration::from_millis(50)),
        )
        .await
        .expect("result mode should resolve with the timeout");

    assert_eq!(response.status(), Some(StatusCode::REQUEST_TIMEOUT));
    let reason = response.error().expect("timeout reason should be set");
    assert_eq!(reason.kind, FailureKind::Timeout);
    assert_eq!(reason.message, "timeout");
}

#[tokio::test]
async fn pre_cancelled_controller_aborts_before_any_response() {
    let transport = MockTransport::new(Vec::new());
    let client = client_with(transport.clone());
    client.set_throw_on_http_error(false);
    let token = CancellationToken::new();
    token.cancel();

    let response = client
        .get(
            "/cancelled",
            RequestOptions::new().controller(token),
        )
        .await
        .expect("result mode should resolve with the abort");

    assert_eq!(transport.calls(), 1);
    assert_eq!(
        response.error().map(|reason| reason.kind),
        Some(FailureKind::Abort)
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_duplicate_requests_share_one_transport_call() {
    let transport = MockTransport::new(vec![
        MockResponse::json(200, "{\"value\":42}").delayed(Duration::from_millis(50)),
    ]);
    let client = Client::builder("https://api.test")
        .transport(transport.clone())
        .avoid_duplicate_requests(true)
        .try_build()
        .expect("build client");

    let (left, right) = tokio::join!(
        client.get("/shared", RequestOptions::new()),
        client.get("/shared", RequestOptions::new())
    );
    let left = left.expect("first caller should succeed");
    let right = right.expect("second caller should succeed");

    assert_eq!(transport.calls(), 1);
    assert_eq!(left.data(), right.data());
    assert_eq!(left.data().as_json(), Some(&json!({ "value": 42 })));
    assert_eq!(client.metrics_snapshot().dedupe_hits, 1);
    // OnSettle eviction clears the entry once the shared outcome lands.
    assert!(client.dedupe_registry().is_empty());
}

#[tokio::test]
async fn settled_entries_are_evicted_so_the_next_call_is_fresh() {
    let transport = MockTransport::new(vec![
        MockResponse::json(200, "{\"seq\":1}"),
        MockResponse::json(200, "{\"seq\":2}"),
    ]);
    let client = Client::builder("https://api.test")
        .transport(transport.clone())
        .avoid_duplicate_requests(true)
        .try_build()
        .expect("build client");

    let first = client
        .get("/fresh", RequestOptions::new())
        .await
        .expect("first call should succeed");
    let second = client
        .get("/fresh", RequestOptions::new())
        .await
        .expect("second call should succeed");

    assert_eq!(transport.calls(), 2);
    assert_eq!(first.data().as_json(), Some(&json!({ "seq": 1 })));
    assert_eq!(second.data().as_json(), Some(&json!({ "seq": 2 })));
}

#[tokio::test]
async fn manual_eviction_serves_the_cached_outcome_until_cleared() {
    let transport = MockTransport::new(vec![
        MockResponse::json(200, "{\"seq\":1}"),
        MockResponse::json(200, "{\"seq\":2}"),
    ]);
    let client = Client::builder("https://api.test")
        .transport(transport.clone())
        .avoid_duplicate_requests(true)
        .dedupe_eviction(DedupeEviction::Manual)
        .try_build()
        .expect("build client");

    let first = client
        .get("/window", RequestOptions::new())
        .await
        .expect("first call should succeed");
    let cached = client
        .get("/window", RequestOptions::new())
        .await
        .expect("cached call should succeed");

    assert_eq!(transport.calls(), 1);
    assert_eq!(first.data(), cached.data());
    let key = "https://api.test/window";
    assert!(client.dedupe_registry().contains(key));

    // The elapsed-time guard refuses to clear young entries.
    assert!(
        !client
            .dedupe_registry()
            .clear_if_elapsed(key, Duration::from_secs(3600))
    );
    assert!(client.dedupe_registry().clear_if_elapsed(key, Duration::ZERO));

    let fresh = client
        .get("/window", RequestOptions::new())
        .await
        .expect("post-clear call should succeed");
    assert_eq!(transport.calls(), 2);
    assert_eq!(fresh.data().as_json(), Some(&json!({ "seq": 2 })));
}

#[tokio::test(start_paused = true)]
async fn method_scoped_dedupe_keys_keep_different_verbs_apart() {
    let transport = MockTransport::new(vec![
        MockResponse::json(200, "{\"verb\":\"get\"}").delayed(Duration::from_millis(50)),
        MockResponse::json(200, "{\"verb\":\"delete\"}").delayed(Duration::from_millis(50)),
    ]);
    let client = Client::builder("https://api.test")
        .transport(transport.clone())
        .avoid_duplicate_requests(true)
        .dedupe_key(DedupeKey::MethodAndUrl)
        .try_build()
        .expect("build client");

    let (get, delete) = tokio::join!(
        client.get("/resource", RequestOptions::new()),
        client.delete("/resource", RequestOptions::new())
    );

    assert!(get.expect("get should succeed").ok());
    assert!(delete.expect("delete should succeed").ok());
    assert_eq!(transport.calls(), 2);
}
