//! Fire-and-forget publishing.

use crate::error::CourierResult;
use crate::headers::{self, MessageType};
use courier_transport::{
    HeaderValue, MessageId, OutboundRecord, Producer, Timestamp, TopicName, TransportHeaders,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;

/// Publishes messages without waiting for any reply
///
/// Every record carries a fresh `message-id` (also used as the record key),
/// a `timestamp` in milliseconds and a `message-type` marker.
#[derive(Clone)]
pub struct FireAndForgetPublisher {
    producer: Arc<dyn Producer>,
}

impl FireAndForgetPublisher {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        Self { producer }
    }

    /// Publish a single message
    ///
    /// When `custom_headers` carries a non-empty `correlation-id` the message
    /// is the reply leg of a request/reply exchange and is marked
    /// `request-reply`. Caller-supplied headers, `message-type` included,
    /// override the generated ones.
    pub async fn send<T: Serialize + Sync + ?Sized>(
        &self,
        topic: &TopicName,
        message: &T,
        custom_headers: Option<&TransportHeaders>,
    ) -> CourierResult<MessageId> {
        let message_id = MessageId::new();
        let value = serde_json::to_vec(message)?;

        let message_type = match custom_headers.and_then(|h| headers::find(h, headers::CORRELATION_ID)) {
            Some((_, value)) if headers::has_value(value) => MessageType::RequestReply,
            _ => MessageType::FireAndForget,
        };

        let mut record_headers = base_headers(&message_id, message_type);
        if let Some(custom) = custom_headers {
            for (key, value) in custom {
                if let Some(text) = headers::normalize_value(value) {
                    record_headers.retain(|existing, _| !existing.eq_ignore_ascii_case(key));
                    record_headers.insert(key.clone(), HeaderValue::Text(text));
                }
            }
        }

        let record = OutboundRecord::new(value)
            .with_key(message_id.to_string())
            .with_headers(record_headers);

        self.producer.publish(topic, vec![record]).await?;

        info!(topic = %topic, message_id = %message_id, %message_type, "Sent message");
        Ok(message_id)
    }

    /// Publish several messages to one topic in a single transport call
    pub async fn send_batch<T: Serialize + Sync>(
        &self,
        topic: &TopicName,
        messages: &[T],
    ) -> CourierResult<Vec<MessageId>> {
        let mut ids = Vec::with_capacity(messages.len());
        let mut records = Vec::with_capacity(messages.len());

        for message in messages {
            let message_id = MessageId::new();
            let record = OutboundRecord::new(serde_json::to_vec(message)?)
                .with_key(message_id.to_string())
                .with_headers(base_headers(&message_id, MessageType::FireAndForget));
            records.push(record);
            ids.push(message_id);
        }

        self.producer.publish(topic, records).await?;

        info!(topic = %topic, count = ids.len(), "Sent message batch");
        Ok(ids)
    }
}

fn base_headers(message_id: &MessageId, message_type: MessageType) -> TransportHeaders {
    TransportHeaders::from([
        (headers::MESSAGE_ID.to_string(), HeaderValue::from(message_id.as_str())),
        (headers::MESSAGE_TYPE.to_string(), HeaderValue::from(message_type.as_str())),
        (
            headers::TIMESTAMP.to_string(),
            HeaderValue::from(Timestamp::now().to_header_value()),
        ),
    ])
}
