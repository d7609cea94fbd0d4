use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;

/// Characters kept verbatim by standard percent-encoding, mirroring
/// `encodeURIComponent`: unreserved characters plus `! ' ( ) *`.
const STANDARD: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'!')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*');

/// RFC 3986-strict set: additionally escapes `! ' ( ) *`.
const STRICT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArrayFormat {
    /// `key[0]=v0&key[1]=v1`
    #[default]
    Index,
    /// `key[]=v0&key[]=v1`
    Brackets,
    /// `key=v0,v1`
    Commas,
}

#[derive(Clone, Copy, Debug)]
pub struct QueryOptions {
    pub array_format: ArrayFormat,
    /// When false, values are emitted verbatim without percent-encoding.
    pub encode: bool,
    /// Selects the RFC 3986-strict escape set over the standard one.
    pub strict: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            array_format: ArrayFormat::Index,
            encode: true,
            strict: true,
        }
    }
}

/// Encodes a parameter map into a query string, without the leading `?`.
///
/// Null values and null array elements are skipped; a null or empty map
/// yields the empty string. Key order follows map insertion order.
pub fn encode_query(params: &Value, options: &QueryOptions) -> String {
    let Value::Object(map) = params else {
        return String::new();
    };

    let mut parts: Vec<String> = Vec::new();
    for (key, value) in map {
        match value {
            Value::Null => continue,
            Value::Array(items) => encode_array(&mut parts, key, items, options),
            scalar => parts.push(format!(
                "{}={}",
                component(key, options),
                component(&scalar_text(scalar), options)
            )),
        }
    }
    parts.join("&")
}

fn encode_array(parts: &mut Vec<String>, key: &str, items: &[Value], options: &QueryOptions) {
    let values: Vec<String> = items
        .iter()
        .filter(|item| !item.is_null())
        .map(|item| component(&scalar_text(item), options))
        .collect();
    if values.is_empty() {
        return;
    }

    let key = component(key, options);
    match options.array_format {
        ArrayFormat::Index => {
            for (index, value) in values.iter().enumerate() {
                parts.push(format!("{key}[{index}]={value}"));
            }
        }
        ArrayFormat::Brackets => {
            for value in &values {
                parts.push(format!("{key}[]={value}"));
            }
        }
        ArrayFormat::Commas => parts.push(format!("{key}={}", values.join(","))),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn component(text: &str, options: &QueryOptions) -> String {
    if !options.encode {
        return text.to_owned();
    }
    let set = if options.strict { STRICT } else { STANDARD };
    utf8_percent_encode(text, set).to_string()
}
