use std::collections::BTreeMap;

use http::StatusCode;
use serde::de::DeserializeOwned;

use crate::FetchxResult;
use crate::body::Payload;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    HttpStatus,
    Timeout,
    Abort,
    Interceptor,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HttpStatus => "http_status",
            Self::Timeout => "timeout",
            Self::Abort => "abort",
            Self::Interceptor => "interceptor",
        }
    }
}

/// The classified reason a response is a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

/// The unified outcome delivered to callers: url, parsed data, a plain
/// header snapshot, status information when a transport response was
/// received, and a populated `error` when the outcome is a failure.
#[derive(Clone, Debug)]
pub struct Response {
    url: String,
    data: Payload,
    headers: BTreeMap<String, String>,
    status: Option<StatusCode>,
    status_text: Option<String>,
    error: Option<FailureReason>,
}

impl Response {
    pub(crate) fn success(
        url: String,
        status: StatusCode,
        status_text: Option<String>,
        headers: BTreeMap<String, String>,
        data: Payload,
    ) -> Self {
        Self {
            url,
            data,
            headers,
            status: Some(status),
            status_text,
            error: None,
        }
    }

    pub(crate) fn http_failure(
        url: String,
        status: StatusCode,
        status_text: Option<String>,
        headers: BTreeMap<String, String>,
        data: Payload,
    ) -> Self {
        let message = status_text
            .clone()
            .unwrap_or_else(|| status.as_u16().to_string());
        Self {
            url,
            data,
            headers,
            status: Some(status),
            status_text,
            error: Some(FailureReason {
                kind: FailureKind::HttpStatus,
                message,
            }),
        }
    }

    /// Timeout failures carry status 408, matching the sentinel shape the
    /// execution core resolves with when the race loses.
    pub(crate) fn timeout(url: String) -> Self {
        Self {
            url,
            data: Payload::Empty,
            headers: BTreeMap::new(),
            status: Some(StatusCode::REQUEST_TIMEOUT),
            status_text: None,
            error: Some(FailureReason {
                kind: FailureKind::Timeout,
                message: "timeout".to_owned(),
            }),
        }
    }

    pub(crate) fn aborted(url: String) -> Self {
        Self {
            url,
            data: Payload::Empty,
            headers: BTreeMap::new(),
            status: None,
            status_text: None,
            error: Some(FailureReason {
                kind: FailureKind::Abort,
                message: "aborted".to_owned(),
            }),
        }
    }

    /// Replaces the parsed payload; intended for response interceptors.
    pub fn set_data(&mut self, data: Payload) {
        self.data = data;
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
    }

    pub fn set_error(&mut self, reason: FailureReason) {
        self.error = Some(reason);
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    pub fn into_data(self) -> Payload {
        self.data
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn ok(&self) -> bool {
        self.status.is_some_and(|status| status.is_success())
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    pub fn error(&self) -> Option<&FailureReason> {
        self.error.as_ref()
    }

    pub fn json<T>(&self) -> FetchxResult<T>
    where
        T: DeserializeOwned,
    {
        self.data.json()
    }
}
