use std::sync::Mutex;

use http::header::{HeaderName, HeaderValue};

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

pub(crate) fn resolve_url(base_url: &str, path: &str, query: &str) -> Result<String, Error> {
    let mut url_text = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_owned()
    } else {
        join_base_path(base_url, path)
    };
    if !query.is_empty() {
        url_text.push(if url_text.contains('?') { '&' } else { '?' });
        url_text.push_str(query);
    }
    url_text
        .parse::<http::Uri>()
        .map_err(|_| Error::InvalidUrl {
            url: url_text.clone(),
        })?;
    Ok(url_text)
}

pub(crate) fn redact_url_for_logs(url_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url_text) else {
        return url_text.split('?').next().unwrap_or(url_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
