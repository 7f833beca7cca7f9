//! Common test utilities for courier integration tests
//!
//! This module provides:
//! - Client construction over a shared in-memory broker
//! - Message handlers standing in for remote services
//! - Polling helpers for asynchronous delivery

use async_trait::async_trait;
use courier_core::{
    headers, CourierClient, CourierConfig, HandlerError, HeaderMap, MessageHandler,
};
use courier_transport::{InMemoryBroker, InboundRecord, TopicName};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

#[allow(dead_code)]
pub const COMMAND_TOPIC: &str = "cmd";
#[allow(dead_code)]
pub const RESPONSE_TOPIC: &str = "resp";

#[allow(dead_code)]
pub fn topic(name: &str) -> TopicName {
    TopicName::new(name).expect("valid topic name")
}

/// Configuration for a client named `client_id` with no patterns started
#[allow(dead_code)]
pub fn config(client_id: &str) -> CourierConfig {
    CourierConfig {
        client_id: client_id.to_string(),
        ..CourierConfig::default()
    }
}

/// Connected client listening for replies on [`RESPONSE_TOPIC`]
#[allow(dead_code)]
pub async fn requesting_client(broker: &InMemoryBroker, timeout: Option<Duration>) -> CourierClient {
    let client = CourierClient::new(config("gateway"), Arc::new(broker.clone()))
        .expect("valid configuration");
    client.connect().await.expect("connect");

    let engine = client
        .init_request_reply(vec![topic(RESPONSE_TOPIC)], timeout)
        .expect("first initialization");
    engine.start_listening().await.expect("start listening");

    client
}

/// Records published to `topic`, waiting until at least `count` exist
#[allow(dead_code)]
pub async fn wait_for_records(
    broker: &InMemoryBroker,
    topic: &TopicName,
    count: usize,
) -> Vec<InboundRecord> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let records = broker.records(topic);
            if records.len() >= count {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("records published in time")
}

/// Correlation id carried by the request at `index` on `topic`
#[allow(dead_code)]
pub async fn correlation_id_of(broker: &InMemoryBroker, topic: &TopicName, index: usize) -> String {
    let records = wait_for_records(broker, topic, index + 1).await;
    headers::get(&records[index].headers, headers::CORRELATION_ID).expect("correlation-id header")
}

// ============================================================================
// Handlers
// ============================================================================

/// Stand-in for an order service
///
/// `{"type": "GET"}` answers `{"v": 1}`, `{"type": "MISSING"}` fails with 404,
/// anything else fails with a 500.
#[derive(Default)]
#[allow(dead_code)]
pub struct OrderService {
    pub calls: AtomicUsize,
}

#[async_trait]
impl MessageHandler for OrderService {
    async fn handle_message(
        &self,
        _topic: &TopicName,
        message: Value,
        _headers: &HeaderMap,
    ) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match message["type"].as_str() {
            Some("GET") => Ok(json!({"v": 1})),
            Some("MISSING") => Err(HandlerError::not_found("order not found")),
            _ => Err(HandlerError::internal("unsupported command")),
        }
    }
}

/// Handler that always fails
#[derive(Default)]
#[allow(dead_code)]
pub struct FailingService {
    pub calls: AtomicUsize,
}

#[async_trait]
impl MessageHandler for FailingService {
    async fn handle_message(
        &self,
        _topic: &TopicName,
        _message: Value,
        _headers: &HeaderMap,
    ) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::internal("downstream unavailable"))
    }
}
