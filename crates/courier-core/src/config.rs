//! Configuration for the courier client.
//!
//! Sources, later overriding earlier:
//!  1. An optional configuration file (format inferred from its extension)
//!  2. Environment variables prefixed `COURIER__`, double-underscore separated,
//!     e.g. `COURIER__REQUEST_REPLY__DEFAULT_TIMEOUT_MS=5000`. List values
//!     (`BROKERS`, response and dead-letter topics) are comma separated.
//!
//! Every field has a serde default, so an empty environment yields a usable
//! configuration. Values that are present but wrong are reported by
//! [`CourierConfig::validate`] before any connection is attempted.

use crate::error::{CourierError, CourierResult};
use crate::retry::RetryPolicy;
use courier_transport::{ConsumerOptions, TopicName};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Client identifier, also the prefix of derived consumer group ids
    pub client_id: String,

    /// Broker addresses
    pub brokers: Vec<String>,

    /// Request/reply settings
    pub request_reply: RequestReplyConfig,

    /// Retry escalation settings
    pub retry: RetryConfig,

    /// Dead-letter consumer settings; no dead-letter consumer when absent
    pub dlq: Option<DlqConfig>,

    /// Options applied to every consumer the client creates
    pub consumer: ConsumerOptions,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            client_id: "courier".to_string(),
            brokers: vec!["localhost:9092".to_string()],
            request_reply: RequestReplyConfig::default(),
            retry: RetryConfig::default(),
            dlq: None,
            consumer: ConsumerOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CourierConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> CourierResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("COURIER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("brokers")
                    .with_list_parse_key("request_reply.response_topics")
                    .with_list_parse_key("dlq.topics")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CourierError::configuration(format!("failed to build configuration: {}", e)))?;

        let loaded: Self = config.try_deserialize().map_err(|e| {
            CourierError::configuration(format!("failed to deserialize configuration: {}", e))
        })?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check the configuration for values that can never work
    pub fn validate(&self) -> CourierResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(CourierError::configuration(
                "brokers and client_id must be provided",
            ));
        }

        if self.brokers.is_empty() || self.brokers.iter().any(|b| b.trim().is_empty()) {
            return Err(CourierError::configuration(
                "brokers and client_id must be provided",
            ));
        }

        if self.request_reply.default_timeout_ms == 0 {
            return Err(CourierError::configuration(
                "request_reply.default_timeout_ms must be greater than zero",
            ));
        }

        if let Some(group_id) = &self.request_reply.group_id {
            if group_id.trim().is_empty() {
                return Err(CourierError::configuration(
                    "request_reply.group_id must not be empty",
                ));
            }
        }

        self.request_reply.response_topic_names()?;

        if let Some(dlq) = &self.dlq {
            if let Some(group_id) = &dlq.group_id {
                if group_id.trim().is_empty() {
                    return Err(CourierError::configuration("dlq.group_id must not be empty"));
                }
            }
            dlq.topic_names()?;
        }

        if self.consumer.max_records_per_poll == 0 {
            return Err(CourierError::configuration(
                "consumer.max_records_per_poll must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Consumer group for request/reply responses
    pub fn request_reply_group_id(&self) -> String {
        self.request_reply
            .group_id
            .clone()
            .unwrap_or_else(|| format!("{}-request-reply", self.client_id))
    }

    /// Consumer group for the dead-letter consumer
    pub fn dlq_group_id(&self) -> String {
        self.dlq
            .as_ref()
            .and_then(|dlq| dlq.group_id.clone())
            .unwrap_or_else(|| format!("{}-dlq-consumer", self.client_id))
    }
}

/// Request/reply configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestReplyConfig {
    /// Deadline for requests that do not specify one
    pub default_timeout_ms: u64,

    /// Consumer group for responses; `<client_id>-request-reply` when unset
    pub group_id: Option<String>,

    /// Topics replies arrive on; request/reply starts automatically when non-empty
    pub response_topics: Vec<String>,
}

impl Default for RequestReplyConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            group_id: None,
            response_topics: Vec::new(),
        }
    }
}

impl RequestReplyConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn response_topic_names(&self) -> CourierResult<Vec<TopicName>> {
        parse_topics("request_reply.response_topics", &self.response_topics)
    }
}

/// Retry escalation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Republishes before a message is dead-lettered; zero dead-letters at once
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay_ms: u64,

    /// Double the delay on each further retry
    pub use_exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            use_exponential_backoff: policy.use_exponential_backoff,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
            .with_exponential_backoff(self.use_exponential_backoff)
    }
}

/// Dead-letter consumer configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    /// Consumer group; `<client_id>-dlq-consumer` when unset
    pub group_id: Option<String>,

    /// Dead-letter topics to listen on
    pub topics: Vec<String>,
}

impl DlqConfig {
    pub fn topic_names(&self) -> CourierResult<Vec<TopicName>> {
        parse_topics("dlq.topics", &self.topics)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

fn parse_topics(field: &str, topics: &[String]) -> CourierResult<Vec<TopicName>> {
    topics
        .iter()
        .map(|topic| {
            TopicName::new(topic.as_str())
                .map_err(|e| CourierError::configuration(format!("{}: {}", field, e)))
        })
        .collect()
}
