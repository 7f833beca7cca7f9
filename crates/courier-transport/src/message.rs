//! Message types for transport operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated topic name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicName(String);

impl TopicName {
    /// Maximum topic name length accepted by Kafka-compatible brokers
    pub const MAX_LENGTH: usize = 249;

    /// Create new topic name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();

        if name.is_empty() || name.len() > Self::MAX_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "topic_name".to_string(),
                message: format!("must be 1-{} characters", Self::MAX_LENGTH),
            });
        }

        if name == "." || name == ".." {
            return Err(ValidationError::InvalidFormat {
                field: "topic_name".to_string(),
                message: "'.' and '..' are reserved".to_string(),
            });
        }

        // Validate characters (ASCII alphanumeric, dots, underscores, hyphens)
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
        {
            return Err(ValidationError::InvalidFormat {
                field: "topic_name".to_string(),
                message: "only ASCII alphanumeric, '.', '_' and '-' allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Topic that receives messages which exhausted their retry budget
    ///
    /// Naming is fixed to `<topic>.dlq`.
    pub fn dead_letter(&self) -> Result<Self, ValidationError> {
        Self::new(format!("{}.dlq", self.0))
    }

    /// Get topic name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TopicName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for TopicName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for published messages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
///
/// Headers carry timestamps as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Create timestamp from milliseconds since the Unix epoch
    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    /// Milliseconds since the Unix epoch
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Header representation (milliseconds since epoch, decimal string)
    pub fn to_header_value(&self) -> String {
        self.as_millis().to_string()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

// ============================================================================
// Headers
// ============================================================================

/// A raw header value as handed over by a broker client
///
/// Broker clients are loose about header shapes: the same header may arrive
/// as raw bytes, a string, or a list of either. The pattern layer normalizes
/// these once at ingress.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    /// Explicit null / undefined entry
    Null,
    /// Raw byte buffer (the shape real brokers deliver)
    Bytes(Bytes),
    /// UTF-8 string
    Text(String),
    /// List of values; only the first element is meaningful
    List(Vec<HeaderValue>),
    /// Any other scalar (number, boolean, ...)
    Scalar(serde_json::Value),
}

impl HeaderValue {
    /// Wire representation used by the broker: strings and scalars become bytes
    pub fn into_wire(self) -> Option<HeaderValue> {
        match self {
            Self::Null => None,
            Self::Bytes(bytes) => Some(Self::Bytes(bytes)),
            Self::Text(text) => Some(Self::Bytes(Bytes::from(text))),
            Self::List(values) => Some(Self::List(
                values.into_iter().filter_map(Self::into_wire).collect(),
            )),
            Self::Scalar(serde_json::Value::Null) => None,
            Self::Scalar(serde_json::Value::String(text)) => Some(Self::Bytes(Bytes::from(text))),
            Self::Scalar(other) => Some(Self::Bytes(Bytes::from(other.to_string()))),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Bytes> for HeaderValue {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

/// Transport-level header map
pub type TransportHeaders = BTreeMap<String, HeaderValue>;

// ============================================================================
// Records
// ============================================================================

/// A record handed to the transport for publishing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutboundRecord {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: TransportHeaders,
}

impl OutboundRecord {
    /// Create new record with a value
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            key: None,
            value: Some(value.into()),
            headers: TransportHeaders::new(),
        }
    }

    /// Set record key
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Replace all headers
    pub fn with_headers(mut self, headers: TransportHeaders) -> Self {
        self.headers = headers;
        self
    }
}

/// A record delivered by the transport to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub topic: TopicName,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: TransportHeaders,
    pub timestamp: Timestamp,
}

impl InboundRecord {
    /// Convert back to an outbound record (for retrying / forwarding)
    pub fn to_outbound(&self) -> OutboundRecord {
        OutboundRecord {
            key: self.key.clone(),
            value: self.value.clone(),
            headers: self.headers.clone(),
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
