//! Producer and consumer traits implemented by concrete transports.
//!
//! These are the only primitives the pattern layer relies on: publish a batch
//! of records, subscribe a consumer to topics, start delivery to a handler, and
//! disconnect. Broker protocol, acknowledgements and partitioning stay behind
//! this boundary.

use crate::config::ConsumerOptions;
use crate::error::TransportError;
use crate::message::{InboundRecord, OutboundRecord, TopicName};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Per-record callback registered with [`Consumer::run`]
///
/// Invoked sequentially for each record delivered to one consumer instance.
pub type MessageHandler = Arc<dyn Fn(InboundRecord) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into a [`MessageHandler`]
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(InboundRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |record| Box::pin(f(record)))
}

/// Publishing side of a transport connection
#[async_trait]
pub trait Producer: Send + Sync {
    /// Open the connection to the broker
    async fn connect(&self) -> Result<(), TransportError>;

    /// Publish records to a topic in a single call
    async fn publish(
        &self,
        topic: &TopicName,
        records: Vec<OutboundRecord>,
    ) -> Result<(), TransportError>;

    /// Close the connection
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Consuming side of a transport connection, bound to one consumer group
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Consumer group this consumer belongs to
    fn group_id(&self) -> &str;

    /// Open the connection to the broker
    async fn connect(&self) -> Result<(), TransportError>;

    /// Subscribe to topics
    async fn subscribe(
        &self,
        topics: &[TopicName],
        from_beginning: bool,
    ) -> Result<(), TransportError>;

    /// Register the per-record handler and begin delivery
    ///
    /// Returns once delivery has started; records are handed to `handler`
    /// in the background until [`Consumer::disconnect`] is called.
    async fn run(&self, handler: MessageHandler) -> Result<(), TransportError>;

    /// Stop delivery and close the connection
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Factory for producers and consumers sharing one broker connection config
pub trait Transport: Send + Sync {
    /// Create a producer
    fn producer(&self) -> Arc<dyn Producer>;

    /// Create a consumer bound to a consumer group
    fn consumer(&self, group_id: &str, options: ConsumerOptions) -> Arc<dyn Consumer>;
}
