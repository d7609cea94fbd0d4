//! `fetchx` is an HTTP request client that layers header management,
//! interceptor pipelines, retry-with-backoff, request deduplication, and
//! timeout control over a pluggable fetch-like transport.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use fetchx::prelude::{Client, RequestOptions};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("https://api.example.com")
//!         .timeout(Duration::from_secs(5))
//!         .avoid_duplicate_requests(true)
//!         .try_build()?;
//!     client.set_authorization("Bearer token");
//!
//!     let response = client
//!         .get(
//!             "/v1/items",
//!             RequestOptions::new()
//!                 .query(serde_json::json!({ "page": 2 }))
//!                 .retries(3)
//!                 .retry_after(Duration::from_millis(200)),
//!         )
//!         .await?;
//!     let items: Vec<Item> = response.json()?;
//!
//!     println!("fetched {} items", items.len());
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - Set a client-wide timeout; per-call timeouts override it.
//! - Keep `throw_on_http_error` on and match on [`Error::HttpStatus`], or
//!   turn it off to receive failure-tagged [`Response`] values instead.
//! - Enable `avoid_duplicate_requests` for read-heavy clients issuing
//!   concurrent identical calls.

mod body;
mod client;
mod dedupe;
mod error;
mod execute;
mod header;
mod interceptor;
mod metrics;
mod query;
mod request;
mod response;
mod transport;
mod util;

pub use tokio_util::sync::CancellationToken;

pub use crate::body::{BodyParser, Payload, RequestBody, select_parser};
pub use crate::client::{Client, ClientBuilder, DEFAULT_RETRY_STATUS_CODES};
pub use crate::dedupe::{DedupeEviction, DedupeKey, DedupeRegistry};
pub use crate::error::{BoxError, Error, ErrorCode, TransportErrorKind};
pub use crate::header::HeaderContainer;
pub use crate::interceptor::{
    InterceptedRequest, InterceptorFailure, RequestInterceptor, ResponseInterceptor,
};
pub use crate::metrics::MetricsSnapshot;
pub use crate::query::{ArrayFormat, QueryOptions, encode_query};
pub use crate::request::{
    CacheMode, CorsMode, CredentialsMode, DownloadProgress, DownloadTracker, RedirectMode,
    RequestDescriptor, RequestOptions, RetryState,
};
pub use crate::response::{FailureKind, FailureReason, Response};
pub use crate::transport::{
    BodyStream, HyperTransport, Transport, TransportFailure, TransportRequest, TransportResponse,
};

pub type FetchxResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        ArrayFormat, BodyParser, CancellationToken, Client, DedupeEviction, DedupeKey,
        DedupeRegistry, DownloadProgress, Error, ErrorCode, FailureKind, FetchxResult,
        HeaderContainer, InterceptedRequest, InterceptorFailure, Payload, RequestBody,
        RequestDescriptor, RequestOptions, Response, Transport, TransportErrorKind,
        TransportFailure, TransportRequest, TransportResponse,
    };
}

#[cfg(test)]
mod tests;
