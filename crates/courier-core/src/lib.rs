//! # Courier Core
//!
//! Messaging patterns on top of a partitioned, topic-based publish/subscribe
//! broker.
//!
//! This library provides:
//! - Fire-and-forget publishing with generated message ids and type markers
//! - Request/reply with correlation ids, per-request deadlines and reply routing
//! - Retry escalation with backoff and a `<topic>.dlq` dead-letter topic
//! - A dead-letter consumer forwarding quarantined messages to a callback
//! - A consumer service that answers request/reply messages automatically
//!
//! ## Module Organization
//!
//! - [client] - Orchestrator owning the producer and consumers
//! - [config] - Client configuration and loading
//! - [consumer] - Consumer service and the message handler trait
//! - [dlq] - Dead-letter consumer
//! - [envelope] - Reply envelope bodies
//! - [error] - Error types for all pattern operations
//! - [headers] - Header normalization and well-known header names
//! - [publisher] - Fire-and-forget publisher
//! - [request_reply] - Request/reply correlation engine
//! - [retry] - Retry policy and escalation
//! - [telemetry] - Logging setup

// Module declarations
pub mod client;
pub mod config;
pub mod consumer;
pub mod dlq;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod publisher;
pub mod request_reply;
pub mod retry;
pub mod telemetry;

// Re-export commonly used types at crate root for convenience
pub use client::CourierClient;
pub use config::{CourierConfig, DlqConfig, LoggingConfig, RequestReplyConfig, RetryConfig};
pub use consumer::{ConsumerService, MessageHandler};
pub use dlq::{DeadLetterMessage, DeadLetterRecord, DlqCallback, DlqHandler};
pub use envelope::{ErrorReply, ResponseEnvelope, SuccessReply};
pub use error::{CourierError, CourierResult, HandlerError, RpcError};
pub use headers::{HeaderMap, MessageType};
pub use publisher::FireAndForgetPublisher;
pub use request_reply::{ListenerState, PendingReply, RequestReplyEngine};
pub use retry::{RetryHandler, RetryOutcome, RetryPolicy};
pub use telemetry::init_logging;
