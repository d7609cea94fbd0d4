use http::Method;
use thiserror::Error;

use crate::response::Response;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    SerializeJson,
    SerializeForm,
    InvalidHeaderName,
    InvalidHeaderValue,
    TransportInit,
    Transport,
    Timeout,
    Abort,
    HttpStatus,
    ReadBody,
    DecodeContentEncoding,
    Deserialize,
    Shared,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::SerializeJson => "serialize_json",
            Self::SerializeForm => "serialize_form",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::TransportInit => "transport_init",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Abort => "abort",
            Self::HttpStatus => "http_status",
            Self::ReadBody => "read_body",
            Self::DecodeContentEncoding => "decode_content_encoding",
            Self::Deserialize => "deserialize",
            Self::Shared => "shared",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request url: {url}")]
    InvalidUrl { url: String },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to initialize transport: {message}")]
    TransportInit { message: String },
    #[error("transport error ({kind}) for {method} {url}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("request timed out after {timeout_ms}ms for {method} {url}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        url: String,
    },
    #[error("request aborted for {method} {url}")]
    Abort { method: Method, url: String },
    #[error("http status error {status} {reason} for {method} {url}")]
    HttpStatus {
        status: u16,
        reason: String,
        method: Method,
        url: String,
        response: Box<Response>,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("failed to decode response content-encoding {encoding}: {message}")]
    DecodeContentEncoding { encoding: String, message: String },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("{0}")]
    Shared(std::sync::Arc<Error>),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::TransportInit { .. } => ErrorCode::TransportInit,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Abort { .. } => ErrorCode::Abort,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::DecodeContentEncoding { .. } => ErrorCode::DecodeContentEncoding,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::Shared(source) => source.code(),
        }
    }

    /// The failure response carried by an `HttpStatus` error, when present.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::HttpStatus { response, .. } => Some(response),
            Self::Shared(source) => source.response(),
            _ => None,
        }
    }
}
