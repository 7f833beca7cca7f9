//! In-memory broker implementation for testing and development.
//!
//! This module provides a fully functional in-memory topic broker that:
//! - Keeps an append-only log per topic (single partition)
//! - Tracks committed offsets per consumer group, so a group sees each record once
//! - Honors `from_beginning` when a group first subscribes to a topic
//! - Delivers records to each running consumer sequentially on its own task
//! - Encodes headers to bytes on publish, the way real brokers hand them back
//!
//! This provider is intended for:
//! - Unit testing of the pattern layer
//! - Development and prototyping without a broker

use crate::config::{ConsumerOptions, InMemoryConfig};
use crate::error::TransportError;
use crate::message::{
    InboundRecord, OutboundRecord, Timestamp, TopicName, TransportHeaders,
};
use crate::transport::{Consumer, MessageHandler, Producer, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};
use tracing::{debug, info};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Shared broker state
struct BrokerState {
    topics: HashMap<TopicName, TopicLog>,
    /// Next offset to deliver, per (group, topic)
    committed: HashMap<(String, TopicName), usize>,
    /// Number of successful publish calls
    publish_calls: usize,
    /// Injected failure for the next publish call
    fail_next_publish: Option<String>,
    config: InMemoryConfig,
}

impl BrokerState {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            topics: HashMap::new(),
            committed: HashMap::new(),
            publish_calls: 0,
            fail_next_publish: None,
            config,
        }
    }

    /// Fetch up to `max` undelivered records for a group and commit them
    fn poll(&mut self, group_id: &str, topics: &[TopicName], max: usize) -> Vec<InboundRecord> {
        let mut batch = Vec::new();

        for topic in topics {
            let Some(log) = self.topics.get(topic) else {
                continue;
            };
            let next = self
                .committed
                .entry((group_id.to_string(), topic.clone()))
                .or_insert(log.records.len());

            while *next < log.records.len() && batch.len() < max {
                batch.push(log.records[*next].to_inbound(topic, *next));
                *next += 1;
            }
        }

        batch
    }
}

/// Append-only record log for a single topic
#[derive(Default)]
struct TopicLog {
    records: Vec<StoredRecord>,
}

/// A record stored in a topic log with wire-encoded headers
#[derive(Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    value: Option<Bytes>,
    headers: TransportHeaders,
    appended_at: Timestamp,
}

impl StoredRecord {
    fn from_outbound(record: OutboundRecord) -> Self {
        let headers = record
            .headers
            .into_iter()
            .filter_map(|(key, value)| value.into_wire().map(|wire| (key, wire)))
            .collect();

        Self {
            key: record.key,
            value: record.value,
            headers,
            appended_at: Timestamp::now(),
        }
    }

    fn to_inbound(&self, topic: &TopicName, offset: usize) -> InboundRecord {
        InboundRecord {
            topic: topic.clone(),
            partition: 0,
            offset: offset as i64,
            key: self.key.clone(),
            value: self.value.clone(),
            headers: self.headers.clone(),
            timestamp: self.appended_at,
        }
    }
}

/// State plus the wake-up signal for idle consumers
struct Shared {
    state: Mutex<BrokerState>,
    published: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// In-memory broker; cloning yields a handle to the same broker
///
/// # Example
///
/// ```
/// use courier_transport::{InMemoryBroker, OutboundRecord, TopicName, Transport};
///
/// # tokio_test::block_on(async {
/// let broker = InMemoryBroker::default();
/// let producer = broker.producer();
/// producer.connect().await?;
///
/// let topic = TopicName::new("orders")?;
/// producer
///     .publish(&topic, vec![OutboundRecord::new("{}").with_key("order-1")])
///     .await?;
///
/// assert_eq!(broker.records(&topic).len(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Create new in-memory broker with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::new(config)),
                published: Notify::new(),
            }),
        }
    }

    /// Create a topic explicitly (no-op when it exists)
    pub fn create_topic(&self, topic: &TopicName) {
        self.shared.lock().topics.entry(topic.clone()).or_default();
    }

    /// All records currently stored in a topic, as a consumer would see them
    pub fn records(&self, topic: &TopicName) -> Vec<InboundRecord> {
        let state = self.shared.lock();
        state
            .topics
            .get(topic)
            .map(|log| {
                log.records
                    .iter()
                    .enumerate()
                    .map(|(offset, record)| record.to_inbound(topic, offset))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of successful publish calls across all producers
    pub fn publish_calls(&self) -> usize {
        self.shared.lock().publish_calls
    }

    /// Names of all existing topics
    pub fn topics(&self) -> Vec<TopicName> {
        let mut topics: Vec<TopicName> = self.shared.lock().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Make the next publish call fail with the given message
    pub fn fail_next_publish(&self, message: impl Into<String>) {
        self.shared.lock().fail_next_publish = Some(message.into());
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl Transport for InMemoryBroker {
    fn producer(&self) -> Arc<dyn Producer> {
        Arc::new(InMemoryProducer {
            shared: Arc::clone(&self.shared),
            connected: AtomicBool::new(false),
        })
    }

    fn consumer(&self, group_id: &str, options: ConsumerOptions) -> Arc<dyn Consumer> {
        Arc::new(InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            group_id: group_id.to_string(),
            options,
            inner: Mutex::new(ConsumerInner::default()),
        })
    }
}

// ============================================================================
// InMemoryProducer
// ============================================================================

/// In-memory producer
pub struct InMemoryProducer {
    shared: Arc<Shared>,
    connected: AtomicBool,
}

#[async_trait]
impl Producer for InMemoryProducer {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &TopicName,
        records: Vec<OutboundRecord>,
    ) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected {
                operation: "publish".to_string(),
            });
        }

        {
            let mut state = self.shared.lock();

            if let Some(message) = state.fail_next_publish.take() {
                return Err(TransportError::PublishFailed {
                    topic: topic.to_string(),
                    message,
                });
            }

            let auto_create = state.config.auto_create_topics;
            let max_size = state.config.max_topic_size;

            if !state.topics.contains_key(topic) && !auto_create {
                return Err(TransportError::PublishFailed {
                    topic: topic.to_string(),
                    message: "unknown topic".to_string(),
                });
            }

            let log = state.topics.entry(topic.clone()).or_default();
            if log.records.len() + records.len() > max_size {
                return Err(TransportError::TopicFull {
                    topic: topic.to_string(),
                    max_size,
                });
            }

            let count = records.len();
            log.records
                .extend(records.into_iter().map(StoredRecord::from_outbound));
            state.publish_calls += 1;

            debug!(topic = %topic, count, "Published records");
        }

        self.shared.published.notify_waiters();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// InMemoryConsumer
// ============================================================================

#[derive(Default)]
struct ConsumerInner {
    connected: bool,
    subscriptions: Vec<TopicName>,
    /// Present while the delivery loop is running
    shutdown: Option<watch::Sender<bool>>,
}

/// In-memory consumer bound to one consumer group
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    group_id: String,
    options: ConsumerOptions,
    inner: Mutex<ConsumerInner>,
}

impl InMemoryConsumer {
    fn inner(&self) -> MutexGuard<'_, ConsumerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the delivery loop is running
    pub fn is_running(&self) -> bool {
        self.inner().shutdown.is_some()
    }
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.inner().connected = true;
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[TopicName],
        from_beginning: bool,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner();
        if !inner.connected {
            return Err(TransportError::NotConnected {
                operation: "subscribe".to_string(),
            });
        }

        let mut state = self.shared.lock();
        for topic in topics {
            if !state.topics.contains_key(topic) {
                if !self.options.allow_auto_topic_creation {
                    return Err(TransportError::SubscribeFailed {
                        message: format!("topic '{}' does not exist", topic),
                    });
                }
                state.topics.insert(topic.clone(), TopicLog::default());
            }

            let start = if from_beginning {
                0
            } else {
                state.topics.get(topic).map_or(0, |log| log.records.len())
            };
            state
                .committed
                .entry((self.group_id.clone(), topic.clone()))
                .or_insert(start);

            if !inner.subscriptions.contains(topic) {
                inner.subscriptions.push(topic.clone());
            }
        }

        debug!(group_id = %self.group_id, ?topics, from_beginning, "Subscribed");
        Ok(())
    }

    async fn run(&self, handler: MessageHandler) -> Result<(), TransportError> {
        let mut inner = self.inner();
        if !inner.connected {
            return Err(TransportError::NotConnected {
                operation: "run".to_string(),
            });
        }
        if inner.shutdown.is_some() {
            return Err(TransportError::AlreadyRunning {
                group_id: self.group_id.clone(),
            });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        inner.shutdown = Some(shutdown_tx);

        tokio::spawn(deliver(
            Arc::clone(&self.shared),
            self.group_id.clone(),
            inner.subscriptions.clone(),
            self.options.max_records_per_poll.max(1),
            handler,
            shutdown_rx,
        ));

        info!(group_id = %self.group_id, "Consumer running");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut inner = self.inner();
        if let Some(shutdown) = inner.shutdown.take() {
            // Receiver may already be gone if the loop exited
            let _ = shutdown.send(true);
        }
        inner.connected = false;
        inner.subscriptions.clear();
        Ok(())
    }
}

/// Delivery loop for one running consumer
async fn deliver(
    shared: Arc<Shared>,
    group_id: String,
    topics: Vec<TopicName>,
    max_records: usize,
    handler: MessageHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        // Register interest before polling so a publish in between is not missed
        let notified = shared.published.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let batch = shared.lock().poll(&group_id, &topics, max_records);

        if batch.is_empty() {
            tokio::select! {
                _ = &mut notified => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            continue;
        }

        for record in batch {
            handler(record).await;
        }
    }

    debug!(group_id = %group_id, "Delivery loop stopped");
}
