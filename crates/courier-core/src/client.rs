//! Client orchestrator.
//!
//! [`CourierClient`] owns the shared publish channel, the request/reply
//! consumer and the optional dead-letter consumer, and wires the patterns on
//! top of them:
//!
//! ```text
//! producer ──┬── FireAndForgetPublisher
//!            ├── RetryHandler
//!            └── RequestReplyEngine ── consumer (<client_id>-request-reply)
//! dlq_consumer ── DlqHandler            (<client_id>-dlq-consumer)
//! ```
//!
//! Request/reply is initialized separately, at most once per client.
//!
//! # Example
//!
//! ```
//! use courier_core::{CourierClient, CourierConfig};
//! use courier_transport::{InMemoryBroker, TopicName};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let client = CourierClient::new(CourierConfig::default(), Arc::new(InMemoryBroker::default()))?;
//! client.connect().await?;
//!
//! let topic = TopicName::new("orders.events")?;
//! client
//!     .send_fire_and_forget(&topic, &serde_json::json!({"id": 1}), None)
//!     .await?;
//!
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

use crate::config::CourierConfig;
use crate::consumer::{ConsumerService, MessageHandler};
use crate::dlq::{DlqCallback, DlqHandler};
use crate::error::{CourierError, CourierResult};
use crate::publisher::FireAndForgetPublisher;
use crate::request_reply::RequestReplyEngine;
use crate::retry::RetryHandler;
use courier_transport::{
    Consumer, ConsumerOptions, MessageId, Producer, TopicName, Transport, TransportHeaders,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Entry point tying the messaging patterns to one transport
pub struct CourierClient {
    config: CourierConfig,
    transport: Arc<dyn Transport>,
    producer: Arc<dyn Producer>,
    consumer: Arc<dyn Consumer>,
    dlq_consumer: Option<Arc<dyn Consumer>>,
    fire_and_forget: FireAndForgetPublisher,
    retry_handler: RetryHandler,
    request_reply: OnceLock<Arc<RequestReplyEngine>>,
    dlq_handler: Option<Arc<DlqHandler>>,
    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
    connected: AtomicBool,
}

impl CourierClient {
    /// Build a client over `transport`
    ///
    /// The configuration is validated before anything is created. A
    /// dead-letter consumer is created only when `config.dlq` is set.
    pub fn new(config: CourierConfig, transport: Arc<dyn Transport>) -> CourierResult<Self> {
        config.validate()?;

        let producer = transport.producer();
        let consumer = transport.consumer(&config.request_reply_group_id(), config.consumer.clone());
        let dlq_consumer = config
            .dlq
            .as_ref()
            .map(|_| transport.consumer(&config.dlq_group_id(), config.consumer.clone()));

        info!(
            client_id = %config.client_id,
            brokers = %config.brokers.join(", "),
            "Created courier client"
        );

        Ok(Self {
            fire_and_forget: FireAndForgetPublisher::new(Arc::clone(&producer)),
            retry_handler: RetryHandler::new(Arc::clone(&producer), config.retry.policy()),
            config,
            transport,
            producer,
            consumer,
            dlq_consumer,
            request_reply: OnceLock::new(),
            dlq_handler: None,
            lifecycle: tokio::sync::Mutex::new(()),
            connected: AtomicBool::new(false),
        })
    }

    /// Attach the callback that receives dead-lettered messages
    ///
    /// Requires a `dlq` section in the configuration.
    pub fn with_dlq_callback(mut self, callback: Arc<dyn DlqCallback>) -> CourierResult<Self> {
        let consumer = self.dlq_consumer.clone().ok_or_else(|| {
            CourierError::configuration("dlq configuration is required for a dead-letter callback")
        })?;
        self.dlq_handler = Some(Arc::new(DlqHandler::new(consumer, callback)));
        Ok(self)
    }

    /// Build, connect and start a client from configuration
    ///
    /// Request/reply starts listening when response topics are configured;
    /// the dead-letter consumer starts when a callback is given and
    /// dead-letter topics are configured.
    pub async fn start(
        config: CourierConfig,
        transport: Arc<dyn Transport>,
        dlq_callback: Option<Arc<dyn DlqCallback>>,
    ) -> CourierResult<Self> {
        let mut client = Self::new(config, transport)?;
        if let Some(callback) = dlq_callback {
            client = client.with_dlq_callback(callback)?;
        }

        client.connect().await?;

        let response_topics = client.config.request_reply.response_topic_names()?;
        if !response_topics.is_empty() {
            let engine = client.init_request_reply(response_topics, None)?;
            engine.start_listening().await?;
        }

        if let (Some(handler), Some(dlq)) = (&client.dlq_handler, &client.config.dlq) {
            let topics = dlq.topic_names()?;
            if !topics.is_empty() {
                handler.start(&topics).await?;
            }
        }

        info!(client_id = %client.config.client_id, "Courier client initialized");
        Ok(client)
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    /// Create the request/reply engine on the request/reply consumer
    ///
    /// `default_timeout` of `None` uses the configured default. A second call
    /// fails with [`CourierError::AlreadyInitialized`].
    pub fn init_request_reply(
        &self,
        response_topics: Vec<TopicName>,
        default_timeout: Option<Duration>,
    ) -> CourierResult<Arc<RequestReplyEngine>> {
        if self.request_reply.get().is_some() {
            return Err(CourierError::AlreadyInitialized);
        }

        let engine = Arc::new(RequestReplyEngine::new(
            Arc::clone(&self.producer),
            Arc::clone(&self.consumer),
            response_topics,
            default_timeout.or(Some(self.config.request_reply.default_timeout())),
        ));

        self.request_reply
            .set(Arc::clone(&engine))
            .map_err(|_| CourierError::AlreadyInitialized)?;

        info!(
            topics = ?engine.response_topics().iter().map(TopicName::as_str).collect::<Vec<_>>(),
            "Initialized request/reply"
        );
        Ok(engine)
    }

    /// Request/reply engine, once initialized
    pub fn request_reply(&self) -> Option<&Arc<RequestReplyEngine>> {
        self.request_reply.get()
    }

    pub fn fire_and_forget(&self) -> &FireAndForgetPublisher {
        &self.fire_and_forget
    }

    pub fn retry_handler(&self) -> &RetryHandler {
        &self.retry_handler
    }

    pub fn dlq_handler(&self) -> Option<&Arc<DlqHandler>> {
        self.dlq_handler.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect the producer and every owned consumer; a no-op when connected
    pub async fn connect(&self) -> CourierResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_connected() {
            warn!("Already connected");
            return Ok(());
        }

        self.producer.connect().await?;
        self.consumer.connect().await?;
        if let Some(dlq_consumer) = &self.dlq_consumer {
            dlq_consumer.connect().await?;
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(client_id = %self.config.client_id, "Connected");
        Ok(())
    }

    /// Stop the patterns and close every connection; a no-op when not connected
    ///
    /// In-flight requests are rejected with [`CourierError::Stopped`] before
    /// the connections are torn down.
    pub async fn disconnect(&self) -> CourierResult<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.is_connected() {
            return Ok(());
        }

        if let Some(engine) = self.request_reply.get() {
            engine.stop_listening().await?;
        }
        if let Some(handler) = &self.dlq_handler {
            handler.stop().await?;
        }

        self.producer.disconnect().await?;
        self.consumer.disconnect().await?;
        if let Some(dlq_consumer) = &self.dlq_consumer {
            dlq_consumer.disconnect().await?;
        }

        self.connected.store(false, Ordering::SeqCst);
        info!(client_id = %self.config.client_id, "Disconnected");
        Ok(())
    }

    /// Create an independent consumer bound to `group_id`
    ///
    /// `options` of `None` uses the configured consumer options.
    pub fn create_consumer(
        &self,
        group_id: &str,
        options: Option<ConsumerOptions>,
    ) -> CourierResult<Arc<dyn Consumer>> {
        if group_id.trim().is_empty() {
            return Err(CourierError::configuration("group_id must not be empty"));
        }
        Ok(self
            .transport
            .consumer(group_id, options.unwrap_or_else(|| self.config.consumer.clone())))
    }

    /// Create a consumer service on its own consumer group
    ///
    /// Replies go out through this client's publisher and failures that
    /// expect no reply are escalated through its retry handler.
    pub fn consumer_service(
        &self,
        group_id: &str,
        topics: Vec<TopicName>,
        handler: Arc<dyn MessageHandler>,
    ) -> CourierResult<ConsumerService> {
        let consumer = self.create_consumer(group_id, None)?;
        Ok(
            ConsumerService::new(consumer, topics, self.fire_and_forget.clone(), handler)?
                .with_retry(self.retry_handler.clone()),
        )
    }

    /// Publish a message without waiting for a reply
    pub async fn send_fire_and_forget<T: Serialize + Sync + ?Sized>(
        &self,
        topic: &TopicName,
        message: &T,
        headers: Option<&TransportHeaders>,
    ) -> CourierResult<MessageId> {
        self.fire_and_forget.send(topic, message, headers).await
    }

    /// Send a command and wait for its reply
    ///
    /// Fails with [`CourierError::NotInitialized`] before
    /// [`init_request_reply`](Self::init_request_reply).
    pub async fn send_command<Req, Resp>(
        &self,
        command_topic: &TopicName,
        response_topic: &TopicName,
        message: &Req,
        timeout: Option<Duration>,
    ) -> CourierResult<Resp>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let engine = self
            .request_reply
            .get()
            .ok_or(CourierError::NotInitialized)?;
        engine
            .send(command_topic, response_topic, message, timeout, None)
            .await
    }
}
