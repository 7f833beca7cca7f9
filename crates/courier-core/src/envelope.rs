//! Response envelope carried in the value of a reply message.
//!
//! Success: `{"success": true, "data": ..., "timestamp": ...}`
//! Failure: `{"success": false, "statusCode": ..., "error": ..., "message": ..., "timestamp": ...}`

use crate::error::{CourierError, HandlerError, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status code used when a failure reply carries none
pub const DEFAULT_ERROR_STATUS: u16 = HandlerError::DEFAULT_STATUS;

/// Error name used when a failure reply carries none
pub const DEFAULT_ERROR_NAME: &str = HandlerError::DEFAULT_NAME;

/// Message used when a failure reply carries neither `message` nor `error`
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// Reply envelope as read from the wire
///
/// Every field is optional on ingress; defaults are applied by
/// [`ResponseEnvelope::into_result`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub status_code: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ResponseEnvelope {
    /// Parse an envelope from a reply payload
    ///
    /// Anything that is not a JSON object is a parse error.
    pub fn parse(payload: &[u8]) -> Result<Self, CourierError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| CourierError::ResponseParse {
                message: e.to_string(),
            })?;

        if !value.is_object() {
            return Err(CourierError::ResponseParse {
                message: format!("expected a JSON object, got {}", json_kind(&value)),
            });
        }

        serde_json::from_value(value).map_err(|e| CourierError::ResponseParse {
            message: e.to_string(),
        })
    }

    /// Resolve the envelope into the reply data or an application error
    pub fn into_result(self) -> Result<Value, CourierError> {
        if self.success {
            return Ok(self.data.unwrap_or(Value::Null));
        }

        let status_code = self
            .status_code
            .filter(|code| *code != 0)
            .and_then(|code| u16::try_from(code).ok())
            .unwrap_or(DEFAULT_ERROR_STATUS);

        let message = non_empty(self.message)
            .or_else(|| non_empty(self.error.clone()))
            .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string());

        let error_name = non_empty(self.error).unwrap_or_else(|| DEFAULT_ERROR_NAME.to_string());

        Err(CourierError::Rpc(RpcError::new(
            status_code,
            error_name,
            message,
        )))
    }
}

/// Success reply body
#[derive(Debug, Clone, Serialize)]
pub struct SuccessReply<'a> {
    pub success: bool,
    pub data: &'a Value,
    pub timestamp: i64,
}

impl<'a> SuccessReply<'a> {
    pub fn new(data: &'a Value, timestamp: i64) -> Self {
        Self {
            success: true,
            data,
            timestamp,
        }
    }
}

/// Failure reply body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    pub success: bool,
    pub status_code: u16,
    pub error: String,
    pub message: String,
    pub timestamp: i64,
}

impl ErrorReply {
    pub fn new(error: &HandlerError, timestamp: i64) -> Self {
        Self {
            success: false,
            status_code: error.status_code,
            error: error.name.clone(),
            message: error.message.clone(),
            timestamp,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
