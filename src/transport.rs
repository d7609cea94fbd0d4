use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Method, StatusCode, Uri};
use http_body_util::BodyStream as HttpBodyStream;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::FetchxResult;
use crate::error::{BoxError, Error, TransportErrorKind};
use crate::request::{CacheMode, CorsMode, CredentialsMode, RedirectMode};

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// The fully resolved request handed to a transport primitive.
///
/// The fetch-mode fields (`cache`, `credentials`, `mode`, `redirect`) are
/// advisory: transports backed by a fetch-like platform honor them, the
/// shipped hyper transport does not interpret them.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cache: CacheMode,
    pub credentials: CredentialsMode,
    pub mode: CorsMode,
    pub redirect: RedirectMode,
    pub cancel: CancellationToken,
}

pub struct TransportResponse {
    pub status: StatusCode,
    pub status_text: Option<String>,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl TransportResponse {
    /// A fully buffered response, mainly useful for mock transports.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let chunks: Vec<Result<Bytes, BoxError>> = if body.is_empty() {
            Vec::new()
        } else {
            vec![Ok(body)]
        };
        Self {
            status,
            status_text: status.canonical_reason().map(str::to_owned),
            headers,
            body: Box::pin(futures_util::stream::iter(chunks)),
        }
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The cancellation handle fired while the operation was pending.
    #[error("transport operation aborted")]
    Aborted,
    #[error("transport error ({kind}): {source}")]
    Failed {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
}

impl TransportFailure {
    pub fn failed(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self::Failed {
            kind,
            source: source.into(),
        }
    }
}

/// The fetch-like seam the execution core drives. Implementations must
/// reject with [`TransportFailure::Aborted`] once the request's
/// cancellation token fires.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'static, Result<TransportResponse, TransportFailure>>;
}

type ReqBody = http_body_util::Full<Bytes>;
type HttpsClient = HyperClient<HttpsConnector<HttpConnector>, ReqBody>;

/// The shipped default transport: hyper over rustls with webpki roots.
#[derive(Clone)]
pub struct HyperTransport {
    client: HttpsClient,
}

impl HyperTransport {
    pub fn new() -> FetchxResult<Self> {
        let https = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|source| Error::TransportInit {
                message: source.to_string(),
            })?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = HyperClient::builder(TokioExecutor::new()).build(https);
        Ok(Self { client })
    }
}

impl Transport for HyperTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'static, Result<TransportResponse, TransportFailure>> {
        let client = self.client.clone();
        Box::pin(async move {
            let uri: Uri = request
                .url
                .parse()
                .map_err(|error: http::uri::InvalidUri| {
                    TransportFailure::failed(TransportErrorKind::Other, error)
                })?;
            let mut http_request = http::Request::builder()
                .method(request.method)
                .uri(uri)
                .body(ReqBody::new(request.body))
                .map_err(|error| TransportFailure::failed(TransportErrorKind::Other, error))?;
            *http_request.headers_mut() = request.headers;

            let response = tokio::select! {
                _ = request.cancel.cancelled() => return Err(TransportFailure::Aborted),
                outcome = client.request(http_request) => outcome.map_err(|source| {
                    let kind = classify_transport_error(&source);
                    TransportFailure::failed(kind, source)
                })?,
            };

            let (parts, body) = response.into_parts();
            let stream = HttpBodyStream::new(body).filter_map(|frame| async move {
                match frame {
                    Ok(frame) => frame.into_data().ok().map(Ok),
                    Err(error) => Some(Err(Box::new(error) as BoxError)),
                }
            });
            Ok(TransportResponse {
                status: parts.status,
                status_text: parts.status.canonical_reason().map(str::to_owned),
                headers: parts.headers,
                body: Box::pin(stream),
            })
        })
    }
}

fn classify_transport_error(error: &hyper_util::client::legacy::Error) -> TransportErrorKind {
    if error.is_connect() {
        let text = error.to_string().to_ascii_lowercase();
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    let text = error.to_string().to_ascii_lowercase();
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}
