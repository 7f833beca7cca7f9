//! # Courier Transport
//!
//! Boundary types and traits for a partitioned, topic-based publish/subscribe
//! broker, plus an in-memory broker used for development and testing.
//!
//! This library provides:
//! - Validated topic names and message identifiers
//! - Raw header values in every shape a broker client may hand back
//! - `Producer`, `Consumer` and `Transport` traits (publish / subscribe / run / disconnect)
//! - Consumer groups with shared offsets in the in-memory implementation
//!
//! ## Module Organization
//!
//! - [error] - Error types for all transport operations
//! - [message] - Topic names, identifiers, headers and records
//! - [config] - Consumer and broker configuration
//! - [transport] - Producer/consumer traits
//! - [providers] - Concrete transport implementations

// Module declarations
pub mod config;
pub mod error;
pub mod message;
pub mod providers;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use config::{ConsumerOptions, InMemoryConfig};
pub use error::{ConfigurationError, TransportError, ValidationError};
pub use message::{
    HeaderValue, InboundRecord, MessageId, OutboundRecord, Timestamp, TopicName, TransportHeaders,
};
pub use providers::{InMemoryBroker, InMemoryConsumer, InMemoryProducer};
pub use transport::{message_handler, Consumer, MessageHandler, Producer, Transport};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
