//! Header codec.
//!
//! Broker clients hand headers back as raw bytes, strings, or lists of either.
//! Everything above the transport works with plain `String` values, so headers
//! are normalized here once, at ingress, and converted back on egress.
//!
//! Normalization rules:
//! - lists collapse to their first element
//! - empty lists, empty byte buffers and nulls are *absent*, not `""`
//! - an empty string stays present-but-empty
//! - other scalars use their string representation
//!
//! Well-known header names are matched case-insensitively on read and always
//! written with the canonical (lower-case) casing below.

use courier_transport::{HeaderValue, TransportHeaders};
use std::collections::BTreeMap;

/// Normalized header map
pub type HeaderMap = BTreeMap<String, String>;

pub const MESSAGE_ID: &str = "message-id";
pub const MESSAGE_TYPE: &str = "message-type";
pub const TIMESTAMP: &str = "timestamp";
pub const CORRELATION_ID: &str = "correlation-id";
pub const REPLY_TO: &str = "reply-to";
pub const RETRY_COUNT: &str = "retry-count";
pub const RETRY_TIMESTAMP: &str = "retry-timestamp";
pub const LAST_ERROR: &str = "last-error";
pub const ORIGINAL_TOPIC: &str = "original-topic";
pub const ERROR: &str = "error";
pub const ERROR_STACK: &str = "error-stack";
pub const FAILED_AT: &str = "failed-at";
pub const TOTAL_RETRIES: &str = "total-retries";

/// Value of the `message-type` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    FireAndForget,
    RequestReply,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FireAndForget => "fire-and-forget",
            Self::RequestReply => "request-reply",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a single raw header value
///
/// Returns `None` when the value counts as absent.
pub fn normalize_value(value: &HeaderValue) -> Option<String> {
    match value {
        HeaderValue::Null => None,
        HeaderValue::Bytes(bytes) if bytes.is_empty() => None,
        HeaderValue::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        HeaderValue::Text(text) => Some(text.clone()),
        HeaderValue::List(values) => values.first().and_then(normalize_value),
        HeaderValue::Scalar(serde_json::Value::Null) => None,
        HeaderValue::Scalar(serde_json::Value::String(text)) => Some(text.clone()),
        HeaderValue::Scalar(other) => Some(other.to_string()),
    }
}

/// Whether a raw value carries anything (empty string, bytes, list and null do not)
pub fn has_value(value: &HeaderValue) -> bool {
    match value {
        HeaderValue::Null => false,
        HeaderValue::Bytes(bytes) => !bytes.is_empty(),
        HeaderValue::Text(text) => !text.is_empty(),
        HeaderValue::List(values) => !values.is_empty(),
        HeaderValue::Scalar(serde_json::Value::Null) => false,
        HeaderValue::Scalar(_) => true,
    }
}

/// Normalize transport headers into plain strings, dropping absent values
pub fn normalize(headers: &TransportHeaders) -> HeaderMap {
    headers
        .iter()
        .filter_map(|(key, value)| normalize_value(value).map(|v| (key.clone(), v)))
        .collect()
}

/// Convert plain string headers back into transport headers
pub fn denormalize(headers: &HeaderMap) -> TransportHeaders {
    headers
        .iter()
        .map(|(key, value)| (key.clone(), HeaderValue::Text(value.clone())))
        .collect()
}

/// Find a raw header by case-insensitive name
pub fn find<'a>(headers: &'a TransportHeaders, name: &str) -> Option<(&'a str, &'a HeaderValue)> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(key, value)| (key.as_str(), value))
}

/// Look up a header by case-insensitive name and normalize its value
pub fn get(headers: &TransportHeaders, name: &str) -> Option<String> {
    find(headers, name).and_then(|(_, value)| normalize_value(value))
}

/// Look up a normalized header by case-insensitive name
pub fn get_normalized<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Set a header using canonical casing, replacing any differently-cased variant
pub fn set(headers: &mut TransportHeaders, name: &str, value: impl Into<String>) {
    headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), HeaderValue::Text(value.into()));
}

/// Parse the leading decimal integer of a header value
///
/// Leading whitespace and a sign are accepted, trailing garbage is ignored
/// (`"12ms"` is 12). Returns `None` when no digits lead the value.
pub fn parse_int(value: &str) -> Option<i64> {
    let trimmed = value.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }

    let magnitude: i64 = rest[..digits_end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
#[path = "headers_tests.rs"]
mod tests;
