//! # Retry Escalator
//!
//! Re-publishes a message whose processing failed, with an incremented
//! `retry-count`, until the retry budget is spent; after that the message is
//! moved to `<topic>.dlq` together with failure metadata.
//!
//! Every call performs exactly one publish: either back to the original topic
//! or to the dead-letter topic, never both.

use crate::error::{error_chain, CourierResult};
use crate::headers;
use courier_transport::{
    InboundRecord, OutboundRecord, Producer, Timestamp, TopicName, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

/// Retry policy with optional exponential backoff
///
/// # Examples
///
/// ```rust
/// use courier_core::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: 3 retries, 1s base delay, exponential backoff
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.calculate_delay(3), Duration::from_secs(4));
///
/// // Constant delay
/// let policy = RetryPolicy::new(5, Duration::from_millis(200)).with_exponential_backoff(false);
/// assert_eq!(policy.calculate_delay(4), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Republishes allowed before a message is dead-lettered
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Double the delay on each further retry
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with exponential backoff enabled
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            use_exponential_backoff: true,
        }
    }

    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    /// Delay before publishing retry number `retry_count` (1-based)
    ///
    /// Exponential: `base_delay * 2^(retry_count - 1)`. Constant: `base_delay`.
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay;
        }

        let factor = 2u32.saturating_pow(retry_count.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Whether a message that has been retried `retry_count` times may be retried again
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Where a failed message ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Republished to the original topic
    Retried { retry_count: u32, delay: Duration },
    /// Moved to the dead-letter topic
    DeadLettered { topic: TopicName },
}

/// Escalates failed messages through retries to the dead-letter topic
#[derive(Clone)]
pub struct RetryHandler {
    producer: Arc<dyn Producer>,
    policy: RetryPolicy,
}

impl RetryHandler {
    pub fn new(producer: Arc<dyn Producer>, policy: RetryPolicy) -> Self {
        Self { producer, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry or dead-letter a message that failed processing
    ///
    /// A missing or unparsable `retry-count` header counts as zero retries.
    /// Sleeps for the backoff delay before republishing; only the calling
    /// task is suspended.
    pub async fn handle_error(
        &self,
        original_topic: &TopicName,
        message: &OutboundRecord,
        error: &(dyn std::error::Error + Send + Sync + 'static),
    ) -> CourierResult<RetryOutcome> {
        let retry_count = current_retry_count(message);

        if self.policy.should_retry(retry_count) {
            self.send_to_retry(original_topic, message, error, retry_count + 1)
                .await
        } else {
            self.send_to_dead_letter(original_topic, message, error)
                .await
        }
    }

    /// Retry or dead-letter a consumed record on the topic it came from
    pub async fn handle_failed_record(
        &self,
        record: &InboundRecord,
        error: &(dyn std::error::Error + Send + Sync + 'static),
    ) -> CourierResult<RetryOutcome> {
        self.handle_error(&record.topic, &record.to_outbound(), error)
            .await
    }

    async fn send_to_retry(
        &self,
        topic: &TopicName,
        message: &OutboundRecord,
        error: &(dyn std::error::Error + Send + Sync + 'static),
        retry_count: u32,
    ) -> CourierResult<RetryOutcome> {
        let delay = self.policy.calculate_delay(retry_count);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut record = message.clone();
        headers::set(&mut record.headers, headers::RETRY_COUNT, retry_count.to_string());
        headers::set(
            &mut record.headers,
            headers::RETRY_TIMESTAMP,
            Timestamp::now().to_header_value(),
        );
        headers::set(&mut record.headers, headers::LAST_ERROR, error.to_string());

        self.producer.publish(topic, vec![record]).await?;

        info!(
            topic = %topic,
            retry_count,
            max_retries = self.policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Retrying message"
        );
        Ok(RetryOutcome::Retried { retry_count, delay })
    }

    async fn send_to_dead_letter(
        &self,
        original_topic: &TopicName,
        message: &OutboundRecord,
        error: &(dyn std::error::Error + Send + Sync + 'static),
    ) -> CourierResult<RetryOutcome> {
        let dlq_topic = original_topic
            .dead_letter()
            .map_err(TransportError::from)?;

        let mut record = message.clone();
        headers::set(&mut record.headers, headers::ORIGINAL_TOPIC, original_topic.as_str());
        headers::set(&mut record.headers, headers::ERROR, error.to_string());
        headers::set(&mut record.headers, headers::ERROR_STACK, error_chain(error));
        headers::set(
            &mut record.headers,
            headers::FAILED_AT,
            Timestamp::now().to_header_value(),
        );
        headers::set(
            &mut record.headers,
            headers::TOTAL_RETRIES,
            self.policy.max_retries.to_string(),
        );

        self.producer.publish(&dlq_topic, vec![record]).await?;

        error!(
            topic = %dlq_topic,
            original_topic = %original_topic,
            error = %error,
            "Message moved to dead-letter topic"
        );
        Ok(RetryOutcome::DeadLettered { topic: dlq_topic })
    }
}

/// Retries already performed on a message, per its `retry-count` header
fn current_retry_count(message: &OutboundRecord) -> u32 {
    headers::get(&message.headers, headers::RETRY_COUNT)
        .and_then(|value| headers::parse_int(&value))
        .and_then(|count| u32::try_from(count).ok())
        .unwrap_or(0)
}
