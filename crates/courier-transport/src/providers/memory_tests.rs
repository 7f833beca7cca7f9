//! Tests for the in-memory broker.

use super::*;
use crate::message::HeaderValue;
use crate::transport::message_handler;
use std::time::Duration;
use tokio::sync::mpsc;

fn topic(name: &str) -> TopicName {
    TopicName::new(name).unwrap()
}

/// Start a consumer that forwards every delivered record into a channel.
async fn collecting_consumer(
    broker: &InMemoryBroker,
    group_id: &str,
    topics: &[TopicName],
    from_beginning: bool,
) -> (Arc<dyn Consumer>, mpsc::UnboundedReceiver<InboundRecord>) {
    let consumer = broker.consumer(group_id, ConsumerOptions::default());
    consumer.connect().await.unwrap();
    consumer.subscribe(topics, from_beginning).await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    consumer
        .run(message_handler(move |record| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(record);
            }
        }))
        .await
        .unwrap();

    (consumer, rx)
}

async fn connected_producer(broker: &InMemoryBroker) -> Arc<dyn Producer> {
    let producer = broker.producer();
    producer.connect().await.unwrap();
    producer
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<InboundRecord>) -> InboundRecord {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("record should be delivered")
        .expect("channel open")
}

mod producing {
    use super::*;

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let broker = InMemoryBroker::default();
        let producer = broker.producer();

        let result = producer
            .publish(&topic("orders"), vec![OutboundRecord::new("x")])
            .await;

        assert!(matches!(result, Err(TransportError::NotConnected { .. })));
        assert_eq!(broker.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_publish_batch_is_single_call() {
        let broker = InMemoryBroker::default();
        let producer = connected_producer(&broker).await;

        producer
            .publish(
                &topic("orders"),
                vec![OutboundRecord::new("a"), OutboundRecord::new("b")],
            )
            .await
            .unwrap();

        assert_eq!(broker.publish_calls(), 1);
        let records = broker.records(&topic("orders"));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[1].offset, 1);
    }

    #[tokio::test]
    async fn test_headers_are_stored_as_bytes() {
        let broker = InMemoryBroker::default();
        let producer = connected_producer(&broker).await;

        let record = OutboundRecord::new("v")
            .with_header("a", "x")
            .with_header("b", HeaderValue::Null);
        producer.publish(&topic("orders"), vec![record]).await.unwrap();

        let stored = &broker.records(&topic("orders"))[0];
        assert_eq!(
            stored.headers.get("a"),
            Some(&HeaderValue::Bytes(Bytes::from("x")))
        );
        assert!(!stored.headers.contains_key("b"));
    }

    #[tokio::test]
    async fn test_injected_publish_failure_is_one_shot() {
        let broker = InMemoryBroker::default();
        let producer = connected_producer(&broker).await;
        broker.fail_next_publish("leader not available");

        let first = producer
            .publish(&topic("orders"), vec![OutboundRecord::new("a")])
            .await;
        let second = producer
            .publish(&topic("orders"), vec![OutboundRecord::new("b")])
            .await;

        match first {
            Err(TransportError::PublishFailed { message, .. }) => {
                assert_eq!(message, "leader not available")
            }
            other => panic!("expected publish failure, got {:?}", other),
        }
        assert!(second.is_ok());
        assert_eq!(broker.records(&topic("orders")).len(), 1);
    }

    #[tokio::test]
    async fn test_topic_size_limit() {
        let broker = InMemoryBroker::new(InMemoryConfig {
            max_topic_size: 1,
            auto_create_topics: true,
        });
        let producer = connected_producer(&broker).await;

        producer
            .publish(&topic("orders"), vec![OutboundRecord::new("a")])
            .await
            .unwrap();
        let result = producer
            .publish(&topic("orders"), vec![OutboundRecord::new("b")])
            .await;

        assert!(matches!(result, Err(TransportError::TopicFull { .. })));
    }

    #[tokio::test]
    async fn test_unknown_topic_without_auto_create() {
        let broker = InMemoryBroker::new(InMemoryConfig {
            auto_create_topics: false,
            ..InMemoryConfig::default()
        });
        let producer = connected_producer(&broker).await;

        let result = producer
            .publish(&topic("orders"), vec![OutboundRecord::new("a")])
            .await;
        assert!(matches!(result, Err(TransportError::PublishFailed { .. })));

        broker.create_topic(&topic("orders"));
        assert!(producer
            .publish(&topic("orders"), vec![OutboundRecord::new("a")])
            .await
            .is_ok());
    }
}

mod consuming {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let broker = InMemoryBroker::default();
        let consumer = broker.consumer("group", ConsumerOptions::default());

        let result = consumer.subscribe(&[topic("orders")], false).await;
        assert!(matches!(result, Err(TransportError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_delivers_records_published_after_subscribe() {
        let broker = InMemoryBroker::default();
        let producer = connected_producer(&broker).await;
        let (_consumer, mut rx) =
            collecting_consumer(&broker, "group", &[topic("orders")], false).await;

        producer
            .publish(&topic("orders"), vec![OutboundRecord::new("hello")])
            .await
            .unwrap();

        let record = recv(&mut rx).await;
        assert_eq!(record.value, Some(Bytes::from("hello")));
        assert_eq!(record.topic, topic("orders"));
        assert_eq!(record.partition, 0);
    }

    #[tokio::test]
    async fn test_from_beginning_replays_existing_records() {
        let broker = InMemoryBroker::default();
        let producer = connected_producer(&broker).await;
        producer
            .publish(&topic("orders"), vec![OutboundRecord::new("old")])
            .await
            .unwrap();

        let (_late, mut late_rx) =
            collecting_consumer(&broker, "late", &[topic("orders")], false).await;
        let (_replay, mut replay_rx) =
            collecting_consumer(&broker, "replay", &[topic("orders")], true).await;

        let replayed = recv(&mut replay_rx).await;
        assert_eq!(replayed.value, Some(Bytes::from("old")));

        producer
            .publish(&topic("orders"), vec![OutboundRecord::new("new")])
            .await
            .unwrap();
        let first_seen = recv(&mut late_rx).await;
        assert_eq!(first_seen.value, Some(Bytes::from("new")));
    }

    #[tokio::test]
    async fn test_independent_groups_each_receive_records() {
        let broker = InMemoryBroker::default();
        let producer = connected_producer(&broker).await;
        let (_a, mut rx_a) = collecting_consumer(&broker, "a", &[topic("orders")], false).await;
        let (_b, mut rx_b) = collecting_consumer(&broker, "b", &[topic("orders")], false).await;

        producer
            .publish(&topic("orders"), vec![OutboundRecord::new("x")])
            .await
            .unwrap();

        assert_eq!(recv(&mut rx_a).await.value, Some(Bytes::from("x")));
        assert_eq!(recv(&mut rx_b).await.value, Some(Bytes::from("x")));
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let broker = InMemoryBroker::default();
        let (consumer, _rx) = collecting_consumer(&broker, "g", &[topic("orders")], false).await;

        let result = consumer.run(message_handler(|_| async {})).await;
        assert!(matches!(result, Err(TransportError::AlreadyRunning { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_stops_delivery() {
        let broker = InMemoryBroker::default();
        let producer = connected_producer(&broker).await;
        let (consumer, mut rx) =
            collecting_consumer(&broker, "g", &[topic("orders")], false).await;

        consumer.disconnect().await.unwrap();
        // Disconnect is idempotent
        consumer.disconnect().await.unwrap();

        producer
            .publish(&topic("orders"), vec![OutboundRecord::new("late")])
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(!matches!(outcome, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_subscribe_to_missing_topic_without_auto_create() {
        let broker = InMemoryBroker::default();
        let consumer = broker.consumer(
            "g",
            ConsumerOptions {
                allow_auto_topic_creation: false,
                ..ConsumerOptions::default()
            },
        );
        consumer.connect().await.unwrap();

        let result = consumer.subscribe(&[topic("missing")], false).await;
        assert!(matches!(result, Err(TransportError::SubscribeFailed { .. })));
    }
}
