//! Error types for the pattern layer.
//!
//! Callers of a request/reply exchange must be able to tell a timeout from an
//! application-level failure, a shutdown and an expiry sweep, so each of
//! those outcomes gets its own variant.

use courier_transport::TransportError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Standard result type for courier operations
pub type CourierResult<T> = Result<T, CourierError>;

/// Error type for all pattern-layer operations
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Request timeout after {}ms for correlationId: {correlation_id}", .duration.as_millis())]
    Timeout {
        duration: Duration,
        correlation_id: String,
    },

    #[error("RequestReply stopped")]
    Stopped,

    #[error("Request expired")]
    Expired { correlation_id: String },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Failed to parse response: {message}")]
    ResponseParse { message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("RequestReply pattern already initialized")]
    AlreadyInitialized,

    #[error("Request-Reply not initialized")]
    NotInitialized,
}

impl CourierError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "INVALID_MODULE_OPTIONS",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Timeout { .. } => "REQUEST_TIMEOUT",
            Self::Stopped => "REQUEST_REPLY_STOPPED",
            Self::Expired { .. } => "REQUEST_EXPIRED",
            Self::Rpc(_) => "RPC_ERROR",
            Self::ResponseParse { .. } => "RESPONSE_PARSE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::AlreadyInitialized => "REQUEST_REPLY_ALREADY_INITIALIZED",
            Self::NotInitialized => "REQUEST_REPLY_NOT_INITIALIZED",
        }
    }

    /// Whether resending the same request may succeed
    ///
    /// Timeouts, expiries and transient transport failures are worth a retry;
    /// application errors, shutdowns and malformed payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Expired { .. } => true,
            Self::Transport(e) => e.is_transient(),
            Self::Rpc(e) => e.status_code >= 500,
            _ => false,
        }
    }

    /// Status code carried by an application error reply
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Rpc(e) => Some(e.status_code),
            _ => None,
        }
    }
}

/// Application error returned by the remote side of a request/reply exchange
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RpcError {
    pub status_code: u16,
    pub error_name: String,
    pub message: String,
}

impl RpcError {
    pub fn new(status_code: u16, error_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            error_name: error_name.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by a [`MessageHandler`](crate::consumer::MessageHandler)
///
/// Turned into an error reply when the failed message expects one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub status_code: u16,
    pub name: String,
    pub message: String,
}

impl HandlerError {
    pub const DEFAULT_STATUS: u16 = 500;
    pub const DEFAULT_NAME: &'static str = "InternalServerError";

    /// Internal error with default status and name
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status_code: Self::DEFAULT_STATUS,
            name: Self::DEFAULT_NAME.to_string(),
            message: message.into(),
        }
    }

    /// Error with explicit status code and name
    pub fn with_status(status_code: u16, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Bad request (400)
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(400, "BadRequest", message)
    }

    /// Not found (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(404, "NotFound", message)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", error))
    }
}

impl From<CourierError> for HandlerError {
    fn from(error: CourierError) -> Self {
        match error {
            CourierError::Rpc(rpc) => Self::with_status(rpc.status_code, rpc.error_name, rpc.message),
            other => Self::internal(other.to_string()),
        }
    }
}

/// Render an error and its source chain, one cause per line
///
/// Used where the wire format expects a stack-like description.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {}", cause));
        source = cause.source();
    }
    lines.join("\n")
}

/// Describe a panic payload caught at an isolation boundary
pub fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown error occurred".to_string()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
