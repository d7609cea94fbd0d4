use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::body::RequestBody;
use crate::header::HeaderContainer;
use crate::query::ArrayFormat;

/// Progress of a response-body download, reported per received chunk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DownloadProgress {
    pub transferred: u64,
    pub total: u64,
    pub percent: f64,
    pub done: bool,
}

pub type DownloadTracker = Arc<dyn Fn(DownloadProgress, &[u8]) + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheMode {
    Default,
    NoStore,
    Reload,
    #[default]
    NoCache,
    ForceCache,
    OnlyIfCached,
}

impl CacheMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::NoStore => "no-store",
            Self::Reload => "reload",
            Self::NoCache => "no-cache",
            Self::ForceCache => "force-cache",
            Self::OnlyIfCached => "only-if-cached",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CredentialsMode {
    #[default]
    SameOrigin,
    Omit,
    Include,
}

impl CredentialsMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SameOrigin => "same-origin",
            Self::Omit => "omit",
            Self::Include => "include",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CorsMode {
    #[default]
    Cors,
    SameOrigin,
    NoCors,
}

impl CorsMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cors => "cors",
            Self::SameOrigin => "same-origin",
            Self::NoCors => "no-cors",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RedirectMode {
    #[default]
    Follow,
    Error,
    Manual,
}

impl RedirectMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Error => "error",
            Self::Manual => "manual",
        }
    }
}

/// Attempts remaining and the delay applied before each retry.
///
/// `retries` counts attempts including the first, so `0` and `1` both mean a
/// single attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryState {
    pub remaining: u32,
    pub backoff: Duration,
}

impl RetryState {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self {
            remaining: retries.max(1),
            backoff,
        }
    }

    pub(crate) fn should_retry(&self) -> bool {
        self.remaining > 1
    }

    pub(crate) fn decrement(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }
}

/// The logical request handed to request interceptors: everything the
/// execution core knows before calling the transport primitive.
#[derive(Clone)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: Method,
    pub body: RequestBody,
    pub headers: HeaderContainer,
    pub cache: CacheMode,
    pub credentials: CredentialsMode,
    pub mode: CorsMode,
    pub redirect: RedirectMode,
    pub retry: RetryState,
    pub retry_codes: Vec<u16>,
    pub cancel: CancellationToken,
    pub on_download: Option<DownloadTracker>,
}

impl std::fmt::Debug for RequestDescriptor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestDescriptor")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("cache", &self.cache)
            .field("credentials", &self.credentials)
            .field("mode", &self.mode)
            .field("redirect", &self.redirect)
            .field("retry", &self.retry)
            .field("retry_codes", &self.retry_codes)
            .field("on_download", &self.on_download.is_some())
            .finish()
    }
}

/// Per-call parameters; every `None` falls back to the client default.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub query: Option<Value>,
    pub encode_query_string: Option<bool>,
    pub array_query_format: Option<ArrayFormat>,
    pub headers: Vec<(String, String)>,
    pub retries: Option<u32>,
    pub retry_after: Option<Duration>,
    pub retry_codes: Option<Vec<u16>>,
    pub timeout: Option<Duration>,
    pub omit_headers: Vec<String>,
    pub cache: Option<CacheMode>,
    pub credentials: Option<CredentialsMode>,
    pub mode: Option<CorsMode>,
    pub redirect: Option<RedirectMode>,
    pub controller: Option<CancellationToken>,
    pub on_download: Option<DownloadTracker>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, params: Value) -> Self {
        self.query = Some(params);
        self
    }

    pub fn encode_query_string(mut self, encode: bool) -> Self {
        self.encode_query_string = Some(encode);
        self
    }

    pub fn array_query_format(mut self, format: ArrayFormat) -> Self {
        self.array_query_format = Some(format);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn retry_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_codes = Some(codes.into_iter().collect());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn omit_header(mut self, name: impl Into<String>) -> Self {
        self.omit_headers.push(name.into());
        self
    }

    pub fn cache(mut self, cache: CacheMode) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn mode(mut self, mode: CorsMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn redirect(mut self, redirect: RedirectMode) -> Self {
        self.redirect = Some(redirect);
        self
    }

    pub fn controller(mut self, controller: CancellationToken) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn on_download<F>(mut self, tracker: F) -> Self
    where
        F: Fn(DownloadProgress, &[u8]) + Send + Sync + 'static,
    {
        self.on_download = Some(Arc::new(tracker));
        self
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestOptions")
            .field("query", &self.query)
            .field("encode_query_string", &self.encode_query_string)
            .field("array_query_format", &self.array_query_format)
            .field("headers", &self.headers)
            .field("retries", &self.retries)
            .field("retry_after", &self.retry_after)
            .field("retry_codes", &self.retry_codes)
            .field("timeout", &self.timeout)
            .field("omit_headers", &self.omit_headers)
            .field("cache", &self.cache)
            .field("credentials", &self.credentials)
            .field("mode", &self.mode)
            .field("redirect", &self.redirect)
            .field("on_download", &self.on_download.is_some())
            .finish()
    }
}
