//! Request/reply over a topic broker.
//!
//! # Correlation
//!
//! ```text
//! send:   register pending(id, deadline) -> publish(command topic, correlation-id = id, reply-to)
//! reply:  consume(response topics) -> correlation-id -> take(id) -> resolve / reject
//! timer:  deadline elapsed          -> take(id) -> reject(Timeout)
//! sweep:  cleanup_old_requests      -> take(every id older than max age) -> reject(Expired)
//! stop:   stop_listening            -> take(all) -> reject(Stopped)
//! ```
//!
//! All five paths settle a request through the same compare-and-remove on the
//! pending table, so whichever gets there first wins and the others find
//! nothing to do. Each correlation id is settled exactly once.
//!
//! The number of in-flight requests is not bounded.

use crate::envelope::ResponseEnvelope;
use crate::error::{CourierError, CourierResult};
use crate::headers::{self, HeaderMap, MessageType};
use courier_transport::{
    message_handler, Consumer, HeaderValue, InboundRecord, OutboundRecord, Producer, Timestamp,
    TopicName, TransportHeaders,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "request_reply_tests.rs"]
mod tests;

/// Deadline applied when a request specifies none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Age past which [`RequestReplyEngine::cleanup_old_requests`] expires requests by default
pub const DEFAULT_CLEANUP_MAX_AGE: Duration = Duration::from_millis(60_000);

// ============================================================================
// Pending table
// ============================================================================

type ReplySender = oneshot::Sender<CourierResult<Value>>;

/// A request waiting for its reply
struct PendingRequest {
    sender: ReplySender,
    timer: JoinHandle<()>,
    created_at: Instant,
}

impl PendingRequest {
    /// Deliver the outcome and cancel the deadline timer
    fn settle(self, result: CourierResult<Value>) {
        self.timer.abort();
        // The waiter may have been dropped; nothing left to notify then
        let _ = self.sender.send(result);
    }
}

/// Pending requests keyed by correlation id
///
/// The only synchronized state in the engine. The lock is never held across
/// an await point.
#[derive(Default)]
struct PendingTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a request and arm its deadline timer
    fn register(
        self: &Arc<Self>,
        correlation_id: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<CourierResult<Value>> {
        let (sender, receiver) = oneshot::channel();

        let mut entries = self.lock();
        let table = Arc::clone(self);
        let id = correlation_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(entry) = table.take(&id) {
                warn!(correlation_id = %id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                let _ = entry.sender.send(Err(CourierError::Timeout {
                    duration: timeout,
                    correlation_id: id,
                }));
            }
        });

        entries.insert(
            correlation_id.to_string(),
            PendingRequest {
                sender,
                timer,
                created_at: Instant::now(),
            },
        );

        receiver
    }

    /// Remove and return the entry for `correlation_id`, if still pending
    fn take(&self, correlation_id: &str) -> Option<PendingRequest> {
        self.lock().remove(correlation_id)
    }

    fn drain_all(&self) -> Vec<(String, PendingRequest)> {
        self.lock().drain().collect()
    }

    fn drain_older_than(&self, max_age: Duration) -> Vec<(String, PendingRequest)> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.created_at) > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
            .collect()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Route one inbound message to its waiter
    ///
    /// Messages that cannot be matched to a pending request are ignored.
    fn handle_response(&self, record: &InboundRecord) {
        let Some(payload) = record.value.as_ref() else {
            debug!(topic = %record.topic, offset = record.offset, "Ignoring response without value");
            return;
        };

        if record.headers.is_empty() {
            debug!(topic = %record.topic, offset = record.offset, "Ignoring response without headers");
            return;
        }

        if headers::get(&record.headers, headers::MESSAGE_TYPE).as_deref()
            == Some(MessageType::FireAndForget.as_str())
        {
            return;
        }

        let Some((_, raw)) = headers::find(&record.headers, headers::CORRELATION_ID) else {
            debug!(
                topic = %record.topic,
                available = ?record.headers.keys().collect::<Vec<_>>(),
                "Ignoring response without correlation-id"
            );
            return;
        };

        let Some(correlation_id) = headers::normalize_value(raw).filter(|id| !id.is_empty()) else {
            debug!(topic = %record.topic, "Ignoring response with empty correlation-id");
            return;
        };

        let Some(entry) = self.take(&correlation_id) else {
            debug!(correlation_id = %correlation_id, "No pending request for correlation-id");
            return;
        };

        let result = ResponseEnvelope::parse(payload).and_then(ResponseEnvelope::into_result);
        match &result {
            Ok(_) => info!(correlation_id = %correlation_id, "Received success response"),
            Err(CourierError::Rpc(rpc)) => warn!(
                correlation_id = %correlation_id,
                status_code = rpc.status_code,
                error = %rpc.message,
                "Received error response"
            ),
            Err(e) => error!(correlation_id = %correlation_id, error = %e, "Error parsing response"),
        }

        entry.settle(result);
    }
}

// ============================================================================
// Reply future
// ============================================================================

/// Reply to a request that has already been published
///
/// Resolves with the reply data, or fails with a timeout, application error,
/// parse error, shutdown or expiry.
pub struct PendingReply<T> {
    correlation_id: String,
    receiver: oneshot::Receiver<CourierResult<Value>>,
    _response: PhantomData<fn() -> T>,
}

impl<T> PendingReply<T> {
    /// Correlation id carried by the request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl<T: DeserializeOwned> Future for PendingReply<T> {
    type Output = CourierResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(data))) => Poll::Ready(serde_json::from_value(data).map_err(|e| {
                CourierError::ResponseParse {
                    message: e.to_string(),
                }
            })),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            // Sender dropped without settling: the engine went away
            Poll::Ready(Err(_)) => Poll::Ready(Err(CourierError::Stopped)),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
    Stopped,
}

/// Request/reply correlation engine
pub struct RequestReplyEngine {
    producer: Arc<dyn Producer>,
    consumer: Arc<dyn Consumer>,
    response_topics: Vec<TopicName>,
    default_timeout: Duration,
    pending: Arc<PendingTable>,
    state: tokio::sync::Mutex<ListenerState>,
}

impl RequestReplyEngine {
    /// Create an engine publishing through `producer` and reading replies
    /// from `response_topics` through `consumer`
    ///
    /// A zero `default_timeout` falls back to [`DEFAULT_TIMEOUT`].
    pub fn new(
        producer: Arc<dyn Producer>,
        consumer: Arc<dyn Consumer>,
        response_topics: Vec<TopicName>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            producer,
            consumer,
            response_topics,
            default_timeout: default_timeout
                .filter(|t| !t.is_zero())
                .unwrap_or(DEFAULT_TIMEOUT),
            pending: Arc::new(PendingTable::default()),
            state: tokio::sync::Mutex::new(ListenerState::Idle),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn response_topics(&self) -> &[TopicName] {
        &self.response_topics
    }

    pub async fn state(&self) -> ListenerState {
        *self.state.lock().await
    }

    /// Subscribe to the response topics and start routing replies
    ///
    /// Calling this while already listening only logs a warning.
    pub async fn start_listening(&self) -> CourierResult<()> {
        let mut state = self.state.lock().await;
        match *state {
            ListenerState::Listening => {
                warn!("Already listening");
                return Ok(());
            }
            ListenerState::Stopped => self.consumer.connect().await?,
            ListenerState::Idle => {}
        }

        self.consumer.subscribe(&self.response_topics, false).await?;

        let pending = Arc::clone(&self.pending);
        self.consumer
            .run(message_handler(move |record| {
                let pending = Arc::clone(&pending);
                async move { pending.handle_response(&record) }
            }))
            .await?;

        *state = ListenerState::Listening;
        info!(
            topics = ?self.response_topics.iter().map(TopicName::as_str).collect::<Vec<_>>(),
            "Started listening to response topics"
        );
        Ok(())
    }

    /// Reject every pending request with [`CourierError::Stopped`] and
    /// disconnect the response consumer
    ///
    /// A no-op unless listening. The pending table is empty once this returns.
    pub async fn stop_listening(&self) -> CourierResult<()> {
        let mut state = self.state.lock().await;
        if *state != ListenerState::Listening {
            return Ok(());
        }

        let drained = self.pending.drain_all();
        let rejected = drained.len();
        for (_, entry) in drained {
            entry.settle(Err(CourierError::Stopped));
        }

        *state = ListenerState::Stopped;
        self.consumer.disconnect().await?;

        info!(rejected, "Stopped listening");
        Ok(())
    }

    /// Send a request and wait for its reply
    ///
    /// `timeout` of `None` or zero uses the engine default. `extra_headers`
    /// are added to the request and override the generated ones.
    pub async fn send<Req, Resp>(
        &self,
        command_topic: &TopicName,
        response_topic: &TopicName,
        message: &Req,
        timeout: Option<Duration>,
        extra_headers: Option<&HeaderMap>,
    ) -> CourierResult<Resp>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        self.dispatch(command_topic, response_topic, message, timeout, extra_headers)
            .await?
            .await
    }

    /// Publish a request and return the future for its reply
    ///
    /// Returns once the publish completes. If the publish fails the request is
    /// discarded and the transport error is returned.
    pub async fn dispatch<Req, Resp>(
        &self,
        command_topic: &TopicName,
        response_topic: &TopicName,
        message: &Req,
        timeout: Option<Duration>,
        extra_headers: Option<&HeaderMap>,
    ) -> CourierResult<PendingReply<Resp>>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let value = serde_json::to_vec(message)?;
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let timeout = timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.default_timeout);

        let receiver = self.pending.register(&correlation_id, timeout);

        let mut record_headers = TransportHeaders::from([
            (headers::CORRELATION_ID.to_string(), HeaderValue::from(correlation_id.as_str())),
            (headers::REPLY_TO.to_string(), HeaderValue::from(response_topic.as_str())),
            (
                headers::MESSAGE_TYPE.to_string(),
                HeaderValue::from(MessageType::RequestReply.as_str()),
            ),
            (
                headers::TIMESTAMP.to_string(),
                HeaderValue::from(Timestamp::now().to_header_value()),
            ),
        ]);
        if let Some(extra) = extra_headers {
            for (key, value) in extra {
                record_headers.retain(|existing, _| !existing.eq_ignore_ascii_case(key));
                record_headers.insert(key.clone(), HeaderValue::from(value.as_str()));
            }
        }

        let record = OutboundRecord::new(value)
            .with_key(correlation_id.clone())
            .with_headers(record_headers);

        if let Err(e) = self.producer.publish(command_topic, vec![record]).await {
            if let Some(entry) = self.pending.take(&correlation_id) {
                entry.timer.abort();
            }
            error!(correlation_id = %correlation_id, topic = %command_topic, error = %e, "Failed to send request");
            return Err(e.into());
        }

        info!(
            correlation_id = %correlation_id,
            topic = %command_topic,
            timeout_ms = timeout.as_millis() as u64,
            "Sent request"
        );

        Ok(PendingReply {
            correlation_id,
            receiver,
            _response: PhantomData,
        })
    }

    /// Route one inbound message from a response topic to its waiter
    pub fn handle_response(&self, record: &InboundRecord) {
        self.pending.handle_response(record);
    }

    /// Number of requests still waiting for a reply
    pub fn pending_requests_count(&self) -> usize {
        self.pending.len()
    }

    /// Reject with [`CourierError::Expired`] every request older than `max_age`
    ///
    /// Returns the number of requests removed.
    pub fn cleanup_old_requests(&self, max_age: Duration) -> usize {
        let expired = self.pending.drain_older_than(max_age);
        let cleaned = expired.len();

        for (correlation_id, entry) in expired {
            entry.settle(Err(CourierError::Expired { correlation_id }));
        }

        if cleaned > 0 {
            info!(cleaned, "Cleaned up old pending requests");
        }
        cleaned
    }
}

impl Drop for RequestReplyEngine {
    fn drop(&mut self) {
        for (_, entry) in self.pending.drain_all() {
            entry.settle(Err(CourierError::Stopped));
        }
    }
}
