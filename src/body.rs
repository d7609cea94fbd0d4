use std::io::Read;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::HeaderMap;
use http::header::CONTENT_ENCODING;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::FetchxResult;
use crate::error::Error;
use crate::request::{DownloadProgress, DownloadTracker};
use crate::transport::BodyStream;
use crate::util::truncate_body;

/// A request payload, serialized at dispatch time.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
    Json(Value),
    Form(String),
}

impl RequestBody {
    pub fn json<T>(payload: &T) -> FetchxResult<Self>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_value(payload)
            .map(Self::Json)
            .map_err(|source| Error::SerializeJson { source })
    }

    pub fn form<T>(payload: &T) -> FetchxResult<Self>
    where
        T: Serialize + ?Sized,
    {
        serde_urlencoded::to_string(payload)
            .map(Self::Form)
            .map_err(|source| Error::SerializeForm { source })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The content type implied by the body variant, used when the request
    /// carries no explicit `content-type` header.
    pub(crate) fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Json(_) => Some("application/json"),
            Self::Form(_) => Some("application/x-www-form-urlencoded"),
            Self::Empty | Self::Bytes(_) | Self::Text(_) => None,
        }
    }

    pub(crate) fn to_bytes(&self) -> FetchxResult<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Text(text) => Ok(Bytes::from(text.clone())),
            Self::Form(encoded) => Ok(Bytes::from(encoded.clone())),
            Self::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|source| Error::SerializeJson { source }),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<()> for RequestBody {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyParser {
    Json,
    FormData,
    Text,
    Binary,
}

/// Ordered content-type table; first substring match wins, so JSON is
/// checked before the generic text and binary fallbacks.
const PARSER_TABLE: [(BodyParser, &str); 4] = [
    (BodyParser::Json, "application/json"),
    (BodyParser::FormData, "multipart/form-data"),
    (BodyParser::Text, "text/"),
    (BodyParser::Binary, "*/*"),
];

pub fn select_parser(content_type: Option<&str>) -> BodyParser {
    let Some(value) = content_type else {
        return BodyParser::Binary;
    };
    let lowered = value.to_ascii_lowercase();
    for (parser, pattern) in PARSER_TABLE {
        if pattern == "*/*" || lowered.contains(pattern) {
            return parser;
        }
    }
    BodyParser::Binary
}

/// A decoded response body. Multipart and unrecognized content types are
/// delivered as raw bytes.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

impl Payload {
    pub fn json<T>(&self) -> FetchxResult<T>
    where
        T: DeserializeOwned,
    {
        let deserialize = |source: serde_json::Error, body: String| Error::Deserialize { source, body };
        match self {
            Self::Empty => serde_json::from_value(Value::Null)
                .map_err(|source| deserialize(source, String::new())),
            Self::Json(value) => serde_json::from_value(value.clone())
                .map_err(|source| deserialize(source, value.to_string())),
            Self::Text(text) => {
                serde_json::from_str(text).map_err(|source| deserialize(source, text.clone()))
            }
            Self::Bytes(bytes) => serde_json::from_slice(bytes)
                .map_err(|source| deserialize(source, truncate_body(bytes))),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

pub(crate) fn decode_payload(parser: BodyParser, body: Bytes) -> FetchxResult<Payload> {
    if body.is_empty() {
        return Ok(Payload::Empty);
    }
    match parser {
        BodyParser::Json => serde_json::from_slice(&body)
            .map(Payload::Json)
            .map_err(|source| Error::Deserialize {
                source,
                body: truncate_body(&body),
            }),
        BodyParser::Text => Ok(Payload::Text(String::from_utf8_lossy(&body).into_owned())),
        BodyParser::FormData | BodyParser::Binary => Ok(Payload::Bytes(body)),
    }
}

/// Buffers a response body stream, reporting progress per chunk when a
/// tracker is installed.
pub(crate) async fn read_body(
    mut body: BodyStream,
    content_length: Option<u64>,
    tracker: Option<DownloadTracker>,
) -> FetchxResult<Bytes> {
    let mut collected = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|source| Error::ReadBody { source })?;
        collected.extend_from_slice(&chunk);
        if let Some(tracker) = &tracker {
            let transferred = collected.len() as u64;
            let total = content_length.unwrap_or(0);
            let percent = if total > 0 {
                (transferred as f64 / total as f64 * 100.0).min(100.0)
            } else {
                0.0
            };
            tracker(
                DownloadProgress {
                    transferred,
                    total,
                    percent,
                    done: false,
                },
                &chunk,
            );
        }
    }

    if let Some(tracker) = &tracker {
        let transferred = collected.len() as u64;
        tracker(
            DownloadProgress {
                transferred,
                total: content_length.unwrap_or(transferred),
                percent: 100.0,
                done: true,
            },
            &[],
        );
    }
    Ok(collected.freeze())
}

/// Decodes `content-encoding` codings after buffering, innermost last.
/// Only the codings advertised by the default header set are supported.
pub(crate) fn decode_content_encoded_body(
    mut body: Bytes,
    headers: &HeaderMap,
) -> FetchxResult<Bytes> {
    let Some(content_encoding) = headers.get(CONTENT_ENCODING) else {
        return Ok(body);
    };
    let content_encoding =
        content_encoding
            .to_str()
            .map_err(|error| Error::DecodeContentEncoding {
                encoding: "content-encoding".to_owned(),
                message: error.to_string(),
            })?;
    let mut encodings = content_encoding
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>();

    while let Some(encoding) = encodings.pop() {
        let decoded = match encoding.to_ascii_lowercase().as_str() {
            "identity" => body.to_vec(),
            "gzip" => {
                let mut decoder = flate2::read::GzDecoder::new(body.as_ref());
                read_decoded(&mut decoder, encoding)?
            }
            "deflate" => {
                let mut decoder = flate2::read::ZlibDecoder::new(body.as_ref());
                read_decoded(&mut decoder, encoding)?
            }
            other => {
                return Err(Error::DecodeContentEncoding {
                    encoding: other.to_owned(),
                    message: "unsupported content-encoding".to_owned(),
                });
            }
        };
        body = Bytes::from(decoded);
    }

    Ok(body)
}

fn read_decoded<R: Read>(reader: &mut R, encoding: &str) -> FetchxResult<Vec<u8>> {
    let mut decoded = Vec::new();
    reader
        .read_to_end(&mut decoded)
        .map_err(|error| Error::DecodeContentEncoding {
            encoding: encoding.to_owned(),
            message: error.to_string(),
        })?;
    Ok(decoded)
}
