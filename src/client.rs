use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::Method;

use crate::FetchxResult;
use crate::body::RequestBody;
use crate::dedupe::{DedupeEviction, DedupeKey, DedupeRegistry};
use crate::execute::{CallConfig, execute};
use crate::header::HeaderContainer;
use crate::interceptor::{
    InterceptedRequest, InterceptorFailure, RequestInterceptor, ResponseInterceptor,
    boxed_request_interceptor, boxed_response_interceptor,
};
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::query::{QueryOptions, encode_query};
use crate::request::{RequestDescriptor, RequestOptions, RetryState};
use crate::response::Response;
use crate::transport::{HyperTransport, Transport};
use crate::util::{lock_unpoisoned, resolve_url};

/// Status codes retried by default when a retry budget is configured.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 7] = [408, 429, 451, 500, 502, 503, 504];

pub struct ClientBuilder {
    base_url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
    retry_status_codes: Vec<u16>,
    retry_backoff: Duration,
    avoid_duplicate_requests: bool,
    dedupe_key: DedupeKey,
    dedupe_eviction: DedupeEviction,
    throw_on_http_error: bool,
    transport: Option<Arc<dyn Transport>>,
    dedupe_registry: Option<DedupeRegistry>,
}

impl ClientBuilder {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: Vec::new(),
            timeout: Duration::ZERO,
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            retry_backoff: Duration::ZERO,
            avoid_duplicate_requests: false,
            dedupe_key: DedupeKey::default(),
            dedupe_eviction: DedupeEviction::default(),
            throw_on_http_error: true,
            transport: None,
            dedupe_registry: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Global timeout for every call; `Duration::ZERO` (the default)
    /// disables the race entirely.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        let mut deduplicated: Vec<u16> = Vec::new();
        for code in codes {
            if !deduplicated.contains(&code) {
                deduplicated.push(code);
            }
        }
        self.retry_status_codes = deduplicated;
        self
    }

    pub fn retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn avoid_duplicate_requests(mut self, avoid: bool) -> Self {
        self.avoid_duplicate_requests = avoid;
        self
    }

    pub fn dedupe_key(mut self, dedupe_key: DedupeKey) -> Self {
        self.dedupe_key = dedupe_key;
        self
    }

    pub fn dedupe_eviction(mut self, dedupe_eviction: DedupeEviction) -> Self {
        self.dedupe_eviction = dedupe_eviction;
        self
    }

    pub fn throw_on_http_error(mut self, throw: bool) -> Self {
        self.throw_on_http_error = throw;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Injects a shared registry so several clients coalesce duplicates
    /// across instances intentionally.
    pub fn dedupe_registry(mut self, registry: DedupeRegistry) -> Self {
        self.dedupe_registry = Some(registry);
        self
    }

    pub fn try_build(self) -> FetchxResult<Client> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new()?),
        };
        Ok(Client {
            base_url: self.base_url,
            headers: Arc::new(Mutex::new(HeaderContainer::from_seed(self.headers))),
            retry_status_codes: Arc::new(Mutex::new(self.retry_status_codes)),
            request_interceptors: Arc::new(Mutex::new(Vec::new())),
            success_interceptors: Arc::new(Mutex::new(Vec::new())),
            error_interceptors: Arc::new(Mutex::new(Vec::new())),
            timeout: self.timeout,
            retry_backoff: self.retry_backoff,
            avoid_duplicate_requests: self.avoid_duplicate_requests,
            dedupe_key: self.dedupe_key,
            dedupe_eviction: self.dedupe_eviction,
            throw_on_http_error: Arc::new(AtomicBool::new(self.throw_on_http_error)),
            dedupe: self.dedupe_registry.unwrap_or_default(),
            transport,
            metrics: ClientMetrics::default(),
        })
    }

    pub fn build(self) -> Client {
        self.try_build()
            .unwrap_or_else(|error| panic!("failed to build fetchx client: {error}"))
    }
}

#[derive(Clone)]
pub struct Client {
    base_url: String,
    headers: Arc<Mutex<HeaderContainer>>,
    retry_status_codes: Arc<Mutex<Vec<u16>>>,
    request_interceptors: Arc<Mutex<Vec<RequestInterceptor>>>,
    success_interceptors: Arc<Mutex<Vec<ResponseInterceptor>>>,
    error_interceptors: Arc<Mutex<Vec<ResponseInterceptor>>>,
    timeout: Duration,
    retry_backoff: Duration,
    avoid_duplicate_requests: bool,
    dedupe_key: DedupeKey,
    dedupe_eviction: DedupeEviction,
    throw_on_http_error: Arc<AtomicBool>,
    dedupe: DedupeRegistry,
    transport: Arc<dyn Transport>,
    metrics: ClientMetrics,
}

impl Client {
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub async fn get(
        &self,
        url: impl Into<String>,
        options: RequestOptions,
    ) -> FetchxResult<Response> {
        self.send(Method::GET, url.into(), RequestBody::Empty, options)
            .await
    }

    pub async fn delete(
        &self,
        url: impl Into<String>,
        options: RequestOptions,
    ) -> FetchxResult<Response> {
        self.send(Method::DELETE, url.into(), RequestBody::Empty, options)
            .await
    }

    pub async fn post(
        &self,
        url: impl Into<String>,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> FetchxResult<Response> {
        self.send(Method::POST, url.into(), body.into(), options)
            .await
    }

    pub async fn put(
        &self,
        url: impl Into<String>,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> FetchxResult<Response> {
        self.send(Method::PUT, url.into(), body.into(), options)
            .await
    }

    pub async fn patch(
        &self,
        url: impl Into<String>,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> FetchxResult<Response> {
        self.send(Method::PATCH, url.into(), body.into(), options)
            .await
    }

    pub async fn send(
        &self,
        method: Method,
        url: String,
        body: RequestBody,
        options: RequestOptions,
    ) -> FetchxResult<Response> {
        let config = self.resolve(method, url, body, options)?;
        execute(self, config).await
    }

    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
        lock_unpoisoned(&self.headers).set(name, value);
        self
    }

    pub fn get_header(&self, name: &str) -> Option<String> {
        lock_unpoisoned(&self.headers).get(name).map(str::to_owned)
    }

    /// A snapshot of the client's current default headers.
    pub fn headers(&self) -> HeaderContainer {
        lock_unpoisoned(&self.headers).clone()
    }

    pub fn set_authorization(&self, token: impl Into<String>) -> &Self {
        lock_unpoisoned(&self.headers).set_authorization(token);
        self
    }

    pub fn set_authorization_named(
        &self,
        header_name: impl Into<String>,
        token: impl Into<String>,
    ) -> &Self {
        lock_unpoisoned(&self.headers).set_authorization_named(header_name, token);
        self
    }

    /// Appends a retryable status code; duplicates are ignored.
    pub fn add_retry_codes(&self, code: u16) -> &Self {
        let mut codes = lock_unpoisoned(&self.retry_status_codes);
        if !codes.contains(&code) {
            codes.push(code);
        }
        self
    }

    pub fn retry_codes(&self) -> Vec<u16> {
        lock_unpoisoned(&self.retry_status_codes).clone()
    }

    pub fn request_interceptor<F, Fut>(&self, interceptor: F) -> &Self
    where
        F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<InterceptedRequest, InterceptorFailure>> + Send + 'static,
    {
        lock_unpoisoned(&self.request_interceptors).push(boxed_request_interceptor(interceptor));
        self
    }

    pub fn success_response_interceptor<F, Fut>(&self, interceptor: F) -> &Self
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, InterceptorFailure>> + Send + 'static,
    {
        lock_unpoisoned(&self.success_interceptors).push(boxed_response_interceptor(interceptor));
        self
    }

    pub fn error_response_interceptor<F, Fut>(&self, interceptor: F) -> &Self
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, InterceptorFailure>> + Send + 'static,
    {
        lock_unpoisoned(&self.error_interceptors).push(boxed_response_interceptor(interceptor));
        self
    }

    pub fn set_throw_on_http_error(&self, throw: bool) -> &Self {
        self.throw_on_http_error.store(throw, Ordering::Relaxed);
        self
    }

    pub fn throw_on_http_error(&self) -> bool {
        self.throw_on_http_error.load(Ordering::Relaxed)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn dedupe_registry(&self) -> &DedupeRegistry {
        &self.dedupe
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn dedupe_eviction(&self) -> DedupeEviction {
        self.dedupe_eviction
    }

    pub(crate) fn request_interceptors(&self) -> Vec<RequestInterceptor> {
        lock_unpoisoned(&self.request_interceptors).clone()
    }

    pub(crate) fn success_interceptors(&self) -> Vec<ResponseInterceptor> {
        lock_unpoisoned(&self.success_interceptors).clone()
    }

    pub(crate) fn error_interceptors(&self) -> Vec<ResponseInterceptor> {
        lock_unpoisoned(&self.error_interceptors).clone()
    }

    /// Building: merges per-call options over client defaults, one field at
    /// a time, into the configuration the execution core runs.
    fn resolve(
        &self,
        method: Method,
        url: String,
        body: RequestBody,
        options: RequestOptions,
    ) -> FetchxResult<CallConfig> {
        let mut headers = lock_unpoisoned(&self.headers).clone();
        for (name, value) in &options.headers {
            headers.set(name.clone(), value.clone());
        }
        for name in &options.omit_headers {
            headers.remove(name);
        }

        let query = match &options.query {
            Some(params) => encode_query(
                params,
                &QueryOptions {
                    array_format: options.array_query_format.unwrap_or_default(),
                    encode: options.encode_query_string.unwrap_or(true),
                    ..QueryOptions::default()
                },
            ),
            None => String::new(),
        };
        let url = resolve_url(&self.base_url, &url, &query)?;

        let timeout = options.timeout.unwrap_or(self.timeout);
        let timeout = (!timeout.is_zero()).then_some(timeout);
        let retry = RetryState::new(
            options.retries.unwrap_or(1),
            options.retry_after.unwrap_or(self.retry_backoff),
        );
        let retry_codes = options.retry_codes.unwrap_or_else(|| self.retry_codes());
        let cancel = options.controller.unwrap_or_default();
        let dedupe_key = self.avoid_duplicate_requests.then(|| match self.dedupe_key {
            DedupeKey::Url => url.clone(),
            DedupeKey::MethodAndUrl => format!("{method} {url}"),
        });

        Ok(CallConfig {
            url,
            method,
            body,
            headers,
            timeout,
            retry,
            retry_codes,
            cache: options.cache.unwrap_or_default(),
            credentials: options.credentials.unwrap_or_default(),
            mode: options.mode.unwrap_or_default(),
            redirect: options.redirect.unwrap_or_default(),
            dedupe_key,
            throw_on_http_error: self.throw_on_http_error.load(Ordering::Relaxed),
            cancel,
            on_download: options.on_download,
        })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("retry_backoff", &self.retry_backoff)
            .field("avoid_duplicate_requests", &self.avoid_duplicate_requests)
            .field("dedupe_key", &self.dedupe_key)
            .field("dedupe_eviction", &self.dedupe_eviction)
            .field(
                "throw_on_http_error",
                &self.throw_on_http_error.load(Ordering::Relaxed),
            )
            .finish()
    }
}
