use std::sync::Arc;
use std::time::Duration;

use http::Method;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::FetchxResult;
use crate::body::{RequestBody, decode_content_encoded_body, decode_payload, read_body, select_parser};
use crate::client::Client;
use crate::dedupe::DedupeEviction;
use crate::error::Error;
use crate::header::HeaderContainer;
use crate::interceptor::{run_request_chain, run_response_chain};
use crate::request::{
    CacheMode, CorsMode, CredentialsMode, DownloadTracker, RedirectMode, RequestDescriptor,
    RetryState,
};
use crate::response::{FailureKind, Response};
use crate::transport::{TransportFailure, TransportRequest, TransportResponse};
use crate::util::redact_url_for_logs;

/// One call's fully resolved configuration: every per-call option merged
/// over its client default, field by field, before execution begins.
#[derive(Clone)]
pub(crate) struct CallConfig {
    pub(crate) url: String,
    pub(crate) method: Method,
    pub(crate) body: RequestBody,
    pub(crate) headers: HeaderContainer,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry: RetryState,
    pub(crate) retry_codes: Vec<u16>,
    pub(crate) cache: CacheMode,
    pub(crate) credentials: CredentialsMode,
    pub(crate) mode: CorsMode,
    pub(crate) redirect: RedirectMode,
    pub(crate) dedupe_key: Option<String>,
    pub(crate) throw_on_http_error: bool,
    pub(crate) cancel: CancellationToken,
    pub(crate) on_download: Option<DownloadTracker>,
}

pub(crate) async fn execute(client: &Client, config: CallConfig) -> FetchxResult<Response> {
    client.metrics().record_request_started();
    let _in_flight = client.metrics().enter_in_flight();

    let method = config.method.clone();
    let url = config.url.clone();
    let redacted = redact_url_for_logs(&url);
    let timeout_value = config.timeout;
    let cancel = config.cancel.clone();
    let throw = config.throw_on_http_error;

    let outcome = match timeout_value {
        Some(limit) => match timeout(limit, dispatch(client, config)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                client.metrics().record_timeout();
                warn!(
                    method = %method,
                    url = %redacted,
                    timeout_ms = limit.as_millis() as u64,
                    "request timed out"
                );
                Ok(Response::timeout(url))
            }
        },
        None => dispatch(client, config).await,
    };

    finalize(client, outcome, throw, &method, &redacted, timeout_value)
}

/// Routes the drive through the deduplication registry when the call is
/// coalescible, so concurrent duplicates share one in-flight outcome.
async fn dispatch(client: &Client, config: CallConfig) -> FetchxResult<Response> {
    let Some(key) = config.dedupe_key.clone() else {
        return drive(client.clone(), config).await;
    };

    let (shared, first) = client.dedupe_registry().join(&key, || {
        let client = client.clone();
        async move { drive(client, config).await.map_err(Arc::new) }
    });
    if !first {
        client.metrics().record_dedupe_hit();
        debug!(key = %key, "joined in-flight duplicate request");
    }
    let outcome = shared.await;
    if client.dedupe_eviction() == DedupeEviction::OnSettle {
        client.dedupe_registry().remove(&key);
    }
    outcome.map_err(unshared)
}

fn unshared(error: Arc<Error>) -> Error {
    Arc::try_unwrap(error).unwrap_or_else(Error::Shared)
}

/// The attempt loop: Intercepting, AwaitingTransport, Classifying, and
/// Retrying run here; Building happened in `Client::resolve` and the
/// timeout race wraps the whole drive in `execute`.
async fn drive(client: Client, mut config: CallConfig) -> FetchxResult<Response> {
    let redacted = redact_url_for_logs(&config.url);
    let mut attempt: u32 = 1;

    loop {
        let span = info_span!(
            "fetchx.request",
            method = %config.method,
            url = %redacted,
            attempt,
            remaining = config.retry.remaining
        );
        match run_attempt(&client, &mut config, &redacted)
            .instrument(span)
            .await?
        {
            AttemptOutcome::Resolved(response) => return Ok(response),
            AttemptOutcome::Retry => attempt += 1,
        }
    }
}

enum AttemptOutcome {
    Resolved(Response),
    Retry,
}

/// One pass through Intercepting, AwaitingTransport, and Classifying.
async fn run_attempt(
    client: &Client,
    config: &mut CallConfig,
    redacted: &str,
) -> FetchxResult<AttemptOutcome> {
    let descriptor = RequestDescriptor {
        url: config.url.clone(),
        method: config.method.clone(),
        body: config.body.clone(),
        headers: config.headers.clone(),
        cache: config.cache,
        credentials: config.credentials,
        mode: config.mode,
        redirect: config.redirect,
        retry: config.retry,
        retry_codes: config.retry_codes.clone(),
        cancel: config.cancel.clone(),
        on_download: config.on_download.clone(),
    };
    let intercepted = run_request_chain(descriptor, &client.request_interceptors()).await;
    if intercepted.abort {
        client.metrics().record_abort();
        debug!("request aborted by interceptor");
        return Ok(AttemptOutcome::Resolved(Response::aborted(
            config.url.clone(),
        )));
    }
    let request = intercepted.request;

    let mut header_map = request.headers.to_header_map()?;
    if !header_map.contains_key(CONTENT_TYPE)
        && let Some(content_type) = request.body.content_type()
    {
        header_map.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    let body_bytes = request.body.to_bytes()?;

    debug!("sending request");
    let transport_request = TransportRequest {
        url: request.url.clone(),
        method: request.method.clone(),
        headers: header_map,
        body: body_bytes,
        cache: request.cache,
        credentials: request.credentials,
        mode: request.mode,
        redirect: request.redirect,
        cancel: request.cancel.clone(),
    };
    let TransportResponse {
        status,
        status_text,
        headers: response_headers,
        body,
    } = match client.transport().send(transport_request).await {
        Ok(response) => response,
        Err(TransportFailure::Aborted) => {
            client.metrics().record_abort();
            debug!("transport aborted by cancellation");
            return Ok(AttemptOutcome::Resolved(Response::aborted(
                config.url.clone(),
            )));
        }
        Err(TransportFailure::Failed { kind, source }) => {
            return Err(Error::Transport {
                kind,
                method: config.method.clone(),
                url: redacted.to_owned(),
                source,
            });
        }
    };

    let content_length = response_headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let raw = read_body(body, content_length, request.on_download.clone()).await?;
    let raw = decode_content_encoded_body(raw, &response_headers)?;
    let content_type = response_headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let payload = decode_payload(select_parser(content_type), raw)?;
    let header_snapshot = snapshot_headers(&response_headers);
    debug!(status = status.as_u16(), "request completed");

    if status.is_success() {
        let response = Response::success(
            config.url.clone(),
            status,
            status_text,
            header_snapshot,
            payload,
        );
        return Ok(AttemptOutcome::Resolved(
            run_response_chain(response, &client.success_interceptors()).await,
        ));
    }

    let response = Response::http_failure(
        config.url.clone(),
        status,
        status_text,
        header_snapshot,
        payload,
    );
    let response = run_response_chain(response, &client.error_interceptors()).await;

    if config.retry.should_retry() && config.retry_codes.contains(&status.as_u16()) {
        warn!(
            status = status.as_u16(),
            delay_ms = config.retry.backoff.as_millis() as u64,
            remaining = config.retry.remaining - 1,
            "retrying request after retryable status"
        );
        client.metrics().record_retry();
        if !config.retry.backoff.is_zero() {
            sleep(config.retry.backoff).await;
        }
        config.retry.decrement();
        config.retry_codes.extend(client.retry_codes());
        return Ok(AttemptOutcome::Retry);
    }
    Ok(AttemptOutcome::Resolved(response))
}

/// Applies the client's throw mode: classified failures surface as errors
/// or as failure-tagged responses; transport-level errors are already
/// rejections by the time they reach here.
fn finalize(
    client: &Client,
    outcome: FetchxResult<Response>,
    throw: bool,
    method: &Method,
    url: &str,
    timeout_value: Option<Duration>,
) -> FetchxResult<Response> {
    let response = match outcome {
        Ok(response) => response,
        Err(error) => {
            client.metrics().record_failure();
            return Err(error);
        }
    };

    if let Some(status) = response.status() {
        client.metrics().record_status(status.as_u16());
    }
    if response.ok() {
        client.metrics().record_success();
        return Ok(response);
    }
    client.metrics().record_failure();
    if !throw {
        return Ok(response);
    }

    match response.error().map(|reason| reason.kind) {
        Some(FailureKind::Timeout) => Err(Error::Timeout {
            timeout_ms: timeout_value.map(|limit| limit.as_millis()).unwrap_or(0),
            method: method.clone(),
            url: url.to_owned(),
        }),
        Some(FailureKind::Abort) => Err(Error::Abort {
            method: method.clone(),
            url: url.to_owned(),
        }),
        _ => {
            let status = response
                .status()
                .map(|status| status.as_u16())
                .unwrap_or_default();
            let reason = response
                .status()
                .and_then(|status| status.canonical_reason())
                .unwrap_or("")
                .to_owned();
            Err(Error::HttpStatus {
                status,
                reason,
                method: method.clone(),
                url: url.to_owned(),
                response: Box::new(response),
            })
        }
    }
}

fn snapshot_headers(headers: &http::HeaderMap) -> std::collections::BTreeMap<String, String> {
    let mut snapshot = std::collections::BTreeMap::new();
    for (name, value) in headers {
        snapshot.insert(
            name.as_str().to_owned(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    snapshot
}
