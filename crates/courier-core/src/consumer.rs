//! Consumer service.
//!
//! Binds a [`MessageHandler`] to a set of topics under one consumer group.
//! Each JSON message is handed to the handler; when the message carries both
//! `correlation-id` and `reply-to`, the handler's result is published back as
//! a reply envelope so a [`RequestReplyEngine`](crate::request_reply::RequestReplyEngine)
//! on the other side can settle its request.
//!
//! A failing handler never stops the loop. Failed messages that expect a
//! reply get an error reply; other failures go to the [`RetryHandler`] when
//! one is configured.

use crate::envelope::{ErrorReply, SuccessReply};
use crate::error::{describe_panic, CourierError, CourierResult, HandlerError};
use crate::headers::{self, HeaderMap};
use crate::publisher::FireAndForgetPublisher;
use crate::retry::RetryHandler;
use async_trait::async_trait;
use courier_transport::{
    message_handler, Consumer, HeaderValue, InboundRecord, Timestamp, TopicName, TransportHeaders,
};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Application logic invoked for every consumed message
///
/// The returned value becomes the `data` of a success reply; an error becomes
/// an error reply with its status code, name and message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(
        &self,
        topic: &TopicName,
        message: Value,
        headers: &HeaderMap,
    ) -> Result<Value, HandlerError>;
}

/// Per-message processing shared with the delivery loop
struct Dispatcher {
    handler: Arc<dyn MessageHandler>,
    publisher: FireAndForgetPublisher,
    retry: Option<RetryHandler>,
}

impl Dispatcher {
    async fn process(&self, record: &InboundRecord) {
        let headers = headers::normalize(&record.headers);
        let reply_route = reply_route(&headers);

        let Some(value) = record.value.as_ref().filter(|value| !value.is_empty()) else {
            warn!(topic = %record.topic, offset = record.offset, "Received empty message");
            return;
        };

        let result = match serde_json::from_slice::<Value>(value) {
            Ok(message) => {
                info!(topic = %record.topic, offset = record.offset, "Processing message");
                self.invoke(&record.topic, message, &headers).await
            }
            Err(e) => Err(HandlerError::with_status(
                HandlerError::DEFAULT_STATUS,
                "ParseError",
                e.to_string(),
            )),
        };

        match result {
            Ok(data) => {
                if let Some((reply_to, correlation_id)) = &reply_route {
                    let reply = SuccessReply::new(&data, Timestamp::now().as_millis());
                    if let Err(e) = self.reply(reply_to, correlation_id, &reply).await {
                        error!(
                            reply_to = %reply_to,
                            correlation_id = %correlation_id,
                            error = %e,
                            "Failed to send response"
                        );
                    }
                }
                info!(topic = %record.topic, offset = record.offset, "Successfully processed message");
            }
            Err(failure) => {
                error!(
                    topic = %record.topic,
                    offset = record.offset,
                    status_code = failure.status_code,
                    error = %failure,
                    "Error processing message"
                );
                self.handle_failure(record, reply_route, failure).await;
            }
        }
    }

    async fn invoke(
        &self,
        topic: &TopicName,
        message: Value,
        headers: &HeaderMap,
    ) -> Result<Value, HandlerError> {
        AssertUnwindSafe(self.handler.handle_message(topic, message, headers))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::internal(describe_panic(panic.as_ref()))))
    }

    async fn handle_failure(
        &self,
        record: &InboundRecord,
        reply_route: Option<(String, String)>,
        failure: HandlerError,
    ) {
        if let Some((reply_to, correlation_id)) = reply_route {
            let reply = ErrorReply::new(&failure, Timestamp::now().as_millis());
            if let Err(e) = self.reply(&reply_to, &correlation_id, &reply).await {
                error!(
                    reply_to = %reply_to,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Failed to send error response"
                );
            }
            return;
        }

        if let Some(retry) = &self.retry {
            if let Err(e) = retry.handle_failed_record(record, &failure).await {
                error!(topic = %record.topic, offset = record.offset, error = %e, "Failed to escalate message");
            }
        }
    }

    async fn reply<T: Serialize + Sync>(
        &self,
        reply_to: &str,
        correlation_id: &str,
        body: &T,
    ) -> CourierResult<()> {
        let topic = TopicName::new(reply_to).map_err(courier_transport::TransportError::from)?;
        let reply_headers = TransportHeaders::from([(
            headers::CORRELATION_ID.to_string(),
            HeaderValue::from(correlation_id),
        )]);
        self.publisher.send(&topic, body, Some(&reply_headers)).await?;
        Ok(())
    }
}

/// `(reply-to, correlation-id)` when the message expects a reply
fn reply_route(headers: &HeaderMap) -> Option<(String, String)> {
    let present = |name: &str| {
        headers::get_normalized(headers, name)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    Some((present(headers::REPLY_TO)?, present(headers::CORRELATION_ID)?))
}

/// Consumes topics under one group and dispatches to a [`MessageHandler`]
pub struct ConsumerService {
    consumer: Arc<dyn Consumer>,
    topics: Vec<TopicName>,
    dispatcher: Arc<Dispatcher>,
}

impl ConsumerService {
    /// Create a service for `topics`, replying through `publisher`
    ///
    /// Fails when the consumer has an empty group id.
    pub fn new(
        consumer: Arc<dyn Consumer>,
        topics: Vec<TopicName>,
        publisher: FireAndForgetPublisher,
        handler: Arc<dyn MessageHandler>,
    ) -> CourierResult<Self> {
        if consumer.group_id().trim().is_empty() {
            return Err(CourierError::configuration(
                "group_id must be provided for a consumer service",
            ));
        }

        Ok(Self {
            consumer,
            topics,
            dispatcher: Arc::new(Dispatcher {
                handler,
                publisher,
                retry: None,
            }),
        })
    }

    /// Escalate failed messages that expect no reply through `retry`
    pub fn with_retry(mut self, retry: RetryHandler) -> Self {
        let dispatcher = Dispatcher {
            handler: Arc::clone(&self.dispatcher.handler),
            publisher: self.dispatcher.publisher.clone(),
            retry: Some(retry),
        };
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    pub fn group_id(&self) -> &str {
        self.consumer.group_id()
    }

    pub fn topics(&self) -> &[TopicName] {
        &self.topics
    }

    /// Connect, subscribe to new messages on the topics and start processing
    pub async fn start(&self) -> CourierResult<()> {
        info!(group_id = %self.group_id(), "Initializing consumer service");

        self.consumer.connect().await?;
        self.consumer.subscribe(&self.topics, false).await?;

        let dispatcher = Arc::clone(&self.dispatcher);
        self.consumer
            .run(message_handler(move |record| {
                let dispatcher = Arc::clone(&dispatcher);
                async move { dispatcher.process(&record).await }
            }))
            .await?;

        info!(
            group_id = %self.group_id(),
            topics = ?self.topics.iter().map(TopicName::as_str).collect::<Vec<_>>(),
            "Consumer service subscribed"
        );
        Ok(())
    }

    /// Stop processing and disconnect
    pub async fn stop(&self) -> CourierResult<()> {
        self.consumer.disconnect().await?;
        info!(group_id = %self.group_id(), "Consumer service disconnected");
        Ok(())
    }

    /// Process one record as the delivery loop would
    pub async fn handle_message(&self, record: &InboundRecord) {
        self.dispatcher.process(record).await;
    }
}
