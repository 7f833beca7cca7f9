//! Dead-letter consumer.
//!
//! Listens on dead-letter topics and hands every quarantined message, with its
//! failure metadata decoded from headers, to a [`DlqCallback`]. A failing or
//! panicking callback is logged and the next message is processed as usual.

use crate::error::{describe_panic, CourierResult};
use crate::headers::{self, HeaderMap};
use crate::request_reply::ListenerState;
use async_trait::async_trait;
use bytes::Bytes;
use courier_transport::{message_handler, Consumer, InboundRecord, TopicName};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "dlq_tests.rs"]
mod tests;

/// Raw message as it sits on the dead-letter topic
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterMessage {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: HeaderMap,
    pub offset: i64,
}

/// A dead-lettered message with its decoded failure metadata
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterRecord {
    /// Dead-letter topic the message was read from
    pub topic: TopicName,
    pub partition: i32,
    pub message: DeadLetterMessage,
    /// Topic the message originally failed on; `"unknown"` when not recorded
    pub original_topic: String,
    /// Failure message; `"Unknown error"` when not recorded
    pub error: String,
    pub error_stack: String,
    /// Failure time in ms since epoch; `None` when the header is not numeric
    pub failed_at: Option<i64>,
    /// Retries performed before dead-lettering; `None` when the header is not numeric
    pub total_retries: Option<i64>,
}

impl DeadLetterRecord {
    /// Decode a record read from a dead-letter topic
    pub fn from_inbound(record: &InboundRecord) -> Self {
        let normalized = headers::normalize(&record.headers);
        let text = |name: &str| {
            headers::get_normalized(&normalized, name)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        // Absent counts as zero, present but non-numeric has no value
        let number = |name: &str| match text(name) {
            Some(value) => headers::parse_int(&value),
            None => Some(0),
        };

        Self {
            topic: record.topic.clone(),
            partition: record.partition,
            original_topic: text(headers::ORIGINAL_TOPIC).unwrap_or_else(|| "unknown".to_string()),
            error: text(headers::ERROR).unwrap_or_else(|| "Unknown error".to_string()),
            error_stack: text(headers::ERROR_STACK).unwrap_or_default(),
            failed_at: number(headers::FAILED_AT),
            total_retries: number(headers::TOTAL_RETRIES),
            message: DeadLetterMessage {
                key: record.key.clone(),
                value: record.value.clone(),
                headers: normalized,
                offset: record.offset,
            },
        }
    }
}

/// Receives dead-lettered messages
#[async_trait]
pub trait DlqCallback: Send + Sync {
    async fn on_message(&self, record: DeadLetterRecord) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> DlqCallback for F
where
    F: Fn(DeadLetterRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_message(&self, record: DeadLetterRecord) -> anyhow::Result<()> {
        (self)(record).await
    }
}

/// Consumes dead-letter topics and forwards each message to a callback
pub struct DlqHandler {
    consumer: Arc<dyn Consumer>,
    callback: Arc<dyn DlqCallback>,
    state: tokio::sync::Mutex<ListenerState>,
}

impl DlqHandler {
    pub fn new(consumer: Arc<dyn Consumer>, callback: Arc<dyn DlqCallback>) -> Self {
        Self {
            consumer,
            callback,
            state: tokio::sync::Mutex::new(ListenerState::Idle),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.state.lock().await == ListenerState::Listening
    }

    /// Subscribe to `topics` and start forwarding; a no-op when already running
    pub async fn start(&self, topics: &[TopicName]) -> CourierResult<()> {
        let mut state = self.state.lock().await;
        match *state {
            ListenerState::Listening => {
                warn!("Dead-letter consumer already running");
                return Ok(());
            }
            ListenerState::Stopped => self.consumer.connect().await?,
            ListenerState::Idle => {}
        }

        self.consumer.subscribe(topics, false).await?;

        let callback = Arc::clone(&self.callback);
        self.consumer
            .run(message_handler(move |record| {
                let callback = Arc::clone(&callback);
                async move { forward(callback.as_ref(), &record).await }
            }))
            .await?;

        *state = ListenerState::Listening;
        info!(
            topics = ?topics.iter().map(TopicName::as_str).collect::<Vec<_>>(),
            "Started listening to dead-letter topics"
        );
        Ok(())
    }

    /// Stop forwarding and disconnect; a no-op when not running
    pub async fn stop(&self) -> CourierResult<()> {
        let mut state = self.state.lock().await;
        if *state != ListenerState::Listening {
            return Ok(());
        }

        *state = ListenerState::Stopped;
        self.consumer.disconnect().await?;

        info!("Dead-letter consumer stopped");
        Ok(())
    }

    /// Decode one dead-letter message and hand it to the callback
    pub async fn handle_message(&self, record: &InboundRecord) {
        forward(self.callback.as_ref(), record).await;
    }
}

async fn forward(callback: &dyn DlqCallback, record: &InboundRecord) {
    let dead_letter = DeadLetterRecord::from_inbound(record);
    let original_topic = dead_letter.original_topic.clone();

    match AssertUnwindSafe(callback.on_message(dead_letter))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => info!(
            original_topic = %original_topic,
            offset = record.offset,
            "Processed dead-letter message"
        ),
        Ok(Err(e)) => error!(
            topic = %record.topic,
            offset = record.offset,
            error = %format!("{:#}", e),
            "Error processing dead-letter message"
        ),
        Err(panic) => error!(
            topic = %record.topic,
            offset = record.offset,
            error = %describe_panic(panic.as_ref()),
            "Dead-letter callback panicked"
        ),
    }
}
