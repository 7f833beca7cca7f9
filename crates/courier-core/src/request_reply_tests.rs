//! Tests for the request/reply correlation engine.

use super::*;
use bytes::Bytes;
use courier_transport::{ConsumerOptions, InMemoryBroker, Transport};
use serde_json::json;

struct Fixture {
    broker: InMemoryBroker,
    engine: RequestReplyEngine,
    command: TopicName,
    response: TopicName,
}

async fn fixture() -> Fixture {
    let broker = InMemoryBroker::default();
    let producer = broker.producer();
    producer.connect().await.unwrap();
    let consumer = broker.consumer("svc-request-reply", ConsumerOptions::default());
    consumer.connect().await.unwrap();

    let response = TopicName::new("resp").unwrap();
    let engine = RequestReplyEngine::new(producer, consumer, vec![response.clone()], None);

    Fixture {
        broker,
        engine,
        command: TopicName::new("cmd").unwrap(),
        response,
    }
}

impl Fixture {
    async fn request(&self, timeout: Option<Duration>) -> PendingReply<Value> {
        self.engine
            .dispatch(&self.command, &self.response, &json!({"type": "GET"}), timeout, None)
            .await
            .unwrap()
    }
}

fn reply_record(topic: &TopicName, headers: TransportHeaders, body: Option<&str>) -> InboundRecord {
    InboundRecord {
        topic: topic.clone(),
        partition: 0,
        offset: 0,
        key: None,
        value: body.map(|b| Bytes::copy_from_slice(b.as_bytes())),
        headers,
        timestamp: Timestamp::now(),
    }
}

fn correlated(correlation_id: &str) -> TransportHeaders {
    TransportHeaders::from([(
        "correlation-id".to_string(),
        HeaderValue::Bytes(Bytes::from(correlation_id.to_string())),
    )])
}

mod sending {
    use super::*;

    #[tokio::test]
    async fn test_request_carries_correlation_headers() {
        let fx = fixture().await;

        let reply = fx.request(None).await;

        let records = fx.broker.records(&fx.command);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        let headers = headers::normalize(&record.headers);
        assert_eq!(headers["correlation-id"], reply.correlation_id());
        assert_eq!(headers["reply-to"], "resp");
        assert_eq!(headers["message-type"], "request-reply");
        assert!(headers["timestamp"].parse::<i64>().is_ok());
        assert_eq!(
            record.key,
            Some(Bytes::from(reply.correlation_id().to_string()))
        );
        assert_eq!(fx.engine.pending_requests_count(), 1);
    }

    #[tokio::test]
    async fn test_extra_headers_override_generated() {
        let fx = fixture().await;
        let extra = HeaderMap::from([
            ("tenant".to_string(), "acme".to_string()),
            ("Reply-To".to_string(), "elsewhere".to_string()),
        ]);

        let _reply: PendingReply<Value> = fx
            .engine
            .dispatch(&fx.command, &fx.response, &json!({}), None, Some(&extra))
            .await
            .unwrap();

        let record = &fx.broker.records(&fx.command)[0];
        assert_eq!(headers::get(&record.headers, "tenant").as_deref(), Some("acme"));
        assert_eq!(
            headers::get(&record.headers, headers::REPLY_TO).as_deref(),
            Some("elsewhere")
        );
        assert!(!record.headers.contains_key("reply-to"));
    }

    #[tokio::test]
    async fn test_correlation_ids_are_unique() {
        let fx = fixture().await;

        let first = fx.request(None).await;
        let second = fx.request(None).await;

        assert_ne!(first.correlation_id(), second.correlation_id());
        assert_eq!(fx.engine.pending_requests_count(), 2);
    }

    #[tokio::test]
    async fn test_publish_failure_discards_pending_request() {
        let fx = fixture().await;
        fx.broker.fail_next_publish("leader not available");

        let result: CourierResult<Value> = fx
            .engine
            .send(&fx.command, &fx.response, &json!({}), None, None)
            .await;

        assert!(matches!(result, Err(CourierError::Transport(_))));
        assert_eq!(fx.engine.pending_requests_count(), 0);
    }

    #[tokio::test]
    async fn test_unset_default_timeout_falls_back() {
        let fx = fixture().await;
        assert_eq!(fx.engine.default_timeout(), DEFAULT_TIMEOUT);
    }
}

mod replies {
    use super::*;

    #[tokio::test]
    async fn test_success_reply_resolves_data() {
        let fx = fixture().await;
        let reply = fx.request(None).await;

        fx.engine.handle_response(&reply_record(
            &fx.response,
            correlated(reply.correlation_id()),
            Some(r#"{"success":true,"data":{"v":1}}"#),
        ));

        assert_eq!(fx.engine.pending_requests_count(), 0);
        assert_eq!(reply.await.unwrap(), json!({"v": 1}));
    }

    #[tokio::test]
    async fn test_reply_deserializes_into_requested_type() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct User {
            id: u32,
        }

        let fx = fixture().await;
        let reply: PendingReply<User> = fx
            .engine
            .dispatch(&fx.command, &fx.response, &json!({}), None, None)
            .await
            .unwrap();

        fx.engine.handle_response(&reply_record(
            &fx.response,
            correlated(reply.correlation_id()),
            Some(r#"{"success":true,"data":{"id":7}}"#),
        ));

        assert_eq!(reply.await.unwrap(), User { id: 7 });
    }

    #[tokio::test]
    async fn test_error_reply_rejects_with_status() {
        let fx = fixture().await;
        let reply = fx.request(None).await;

        fx.engine.handle_response(&reply_record(
            &fx.response,
            correlated(reply.correlation_id()),
            Some(r#"{"success":false,"statusCode":404,"error":"NotFound","message":"User not found"}"#),
        ));

        let error = reply.await.unwrap_err();
        assert_eq!(error.status_code(), Some(404));
        assert_eq!(error.to_string(), "User not found");
    }

    #[tokio::test]
    async fn test_unparsable_reply_rejects_and_clears_entry() {
        let fx = fixture().await;
        let reply = fx.request(None).await;

        fx.engine.handle_response(&reply_record(
            &fx.response,
            correlated(reply.correlation_id()),
            Some("not json"),
        ));

        assert_eq!(fx.engine.pending_requests_count(), 0);
        assert!(matches!(
            reply.await,
            Err(CourierError::ResponseParse { .. })
        ));
    }

    #[tokio::test]
    async fn test_correlation_header_matched_case_insensitively() {
        let fx = fixture().await;
        let reply = fx.request(None).await;
        let headers = TransportHeaders::from([(
            "Correlation-ID".to_string(),
            HeaderValue::List(vec![HeaderValue::from(reply.correlation_id())]),
        )]);

        fx.engine.handle_response(&reply_record(
            &fx.response,
            headers,
            Some(r#"{"success":true,"data":1}"#),
        ));

        assert_eq!(reply.await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_fire_and_forget_reply_is_ignored() {
        let fx = fixture().await;
        let reply = fx.request(None).await;
        let mut headers = correlated(reply.correlation_id());
        headers.insert(
            "message-type".to_string(),
            HeaderValue::Bytes(Bytes::from("fire-and-forget")),
        );

        fx.engine.handle_response(&reply_record(
            &fx.response,
            headers,
            Some(r#"{"success":true,"data":1}"#),
        ));

        assert_eq!(fx.engine.pending_requests_count(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_messages_are_ignored() {
        let fx = fixture().await;
        let reply = fx.request(None).await;
        let body = Some(r#"{"success":true,"data":1}"#);

        // No value
        fx.engine
            .handle_response(&reply_record(&fx.response, correlated(reply.correlation_id()), None));
        // No headers
        fx.engine
            .handle_response(&reply_record(&fx.response, TransportHeaders::new(), body));
        // No correlation-id
        fx.engine.handle_response(&reply_record(
            &fx.response,
            TransportHeaders::from([("other".to_string(), HeaderValue::from("x"))]),
            body,
        ));
        // Empty correlation-id
        fx.engine.handle_response(&reply_record(
            &fx.response,
            TransportHeaders::from([("correlation-id".to_string(), HeaderValue::from(""))]),
            body,
        ));
        // Unknown correlation-id
        fx.engine
            .handle_response(&reply_record(&fx.response, correlated("unknown"), body));

        assert_eq!(fx.engine.pending_requests_count(), 1);
    }

    #[tokio::test]
    async fn test_second_reply_for_same_id_is_ignored() {
        let fx = fixture().await;
        let reply = fx.request(None).await;
        let id = reply.correlation_id().to_string();

        fx.engine.handle_response(&reply_record(
            &fx.response,
            correlated(&id),
            Some(r#"{"success":true,"data":"first"}"#),
        ));
        fx.engine.handle_response(&reply_record(
            &fx.response,
            correlated(&id),
            Some(r#"{"success":true,"data":"second"}"#),
        ));

        assert_eq!(reply.await.unwrap(), json!("first"));
    }
}

mod deadlines {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_explicit_timeout_rejects_after_deadline() {
        let fx = fixture().await;
        let started = Instant::now();

        let reply = fx.request(Some(Duration::from_millis(1500))).await;
        let id = reply.correlation_id().to_string();
        let error = reply.await.unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert_eq!(
            error.to_string(),
            format!("Request timeout after 1500ms for correlationId: {}", id)
        );
        assert_eq!(fx.engine.pending_requests_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_is_thirty_seconds() {
        let fx = fixture().await;
        let started = Instant::now();

        let error = fx.request(None).await.await.unwrap_err();

        assert!(started.elapsed() >= DEFAULT_TIMEOUT);
        assert_eq!(error.code(), "REQUEST_TIMEOUT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_uses_default() {
        let fx = fixture().await;
        let started = Instant::now();

        let error = fx.request(Some(Duration::ZERO)).await.await.unwrap_err();

        assert!(started.elapsed() >= DEFAULT_TIMEOUT);
        assert!(matches!(error, CourierError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_after_timeout_is_ignored() {
        let fx = fixture().await;
        let reply = fx.request(Some(Duration::from_millis(100))).await;
        let id = reply.correlation_id().to_string();

        assert!(matches!(reply.await, Err(CourierError::Timeout { .. })));

        fx.engine.handle_response(&reply_record(
            &fx.response,
            correlated(&id),
            Some(r#"{"success":true,"data":1}"#),
        ));
        assert_eq!(fx.engine.pending_requests_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_before_deadline_cancels_timer() {
        let fx = fixture().await;
        let reply = fx.request(Some(Duration::from_millis(100))).await;

        fx.engine.handle_response(&reply_record(
            &fx.response,
            correlated(reply.correlation_id()),
            Some(r#"{"success":true,"data":"ok"}"#),
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(reply.await.unwrap(), json!("ok"));
    }
}

mod cleanup {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_only_entries_older_than_max_age() {
        let fx = fixture().await;
        let long = Some(Duration::from_secs(600));

        let old_a = fx.request(long).await;
        let old_b = fx.request(long).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        let fresh = fx.request(long).await;

        let cleaned = fx.engine.cleanup_old_requests(DEFAULT_CLEANUP_MAX_AGE);

        assert_eq!(cleaned, 2);
        assert_eq!(fx.engine.pending_requests_count(), 1);
        for reply in [old_a, old_b] {
            let error = reply.await.unwrap_err();
            assert_eq!(error.code(), "REQUEST_EXPIRED");
            assert_eq!(error.to_string(), "Request expired");
        }
        drop(fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_boundary_is_strict() {
        let fx = fixture().await;
        let _reply = fx.request(Some(Duration::from_secs(600))).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(fx.engine.cleanup_old_requests(Duration::from_secs(60)), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(fx.engine.cleanup_old_requests(Duration::from_secs(60)), 1);
    }

    #[tokio::test]
    async fn test_cleanup_on_empty_table() {
        let fx = fixture().await;
        assert_eq!(fx.engine.cleanup_old_requests(DEFAULT_CLEANUP_MAX_AGE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_age_expires_after_any_elapsed_time() {
        let fx = fixture().await;
        let reply = fx.request(Some(Duration::from_secs(10))).await;

        assert_eq!(fx.engine.cleanup_old_requests(Duration::ZERO), 0);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(fx.engine.cleanup_old_requests(Duration::ZERO), 1);

        assert!(matches!(reply.await, Err(CourierError::Expired { .. })));
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_stop_rejects_all_pending() {
        let fx = fixture().await;
        fx.engine.start_listening().await.unwrap();

        let replies = vec![
            fx.request(None).await,
            fx.request(None).await,
            fx.request(None).await,
        ];
        assert_eq!(fx.engine.pending_requests_count(), 3);

        fx.engine.stop_listening().await.unwrap();
        assert_eq!(fx.engine.pending_requests_count(), 0);

        for reply in replies {
            let error = reply.await.unwrap_err();
            assert_eq!(error.code(), "REQUEST_REPLY_STOPPED");
            assert_eq!(error.to_string(), "RequestReply stopped");
        }
        assert_eq!(fx.engine.state().await, ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_noop() {
        let fx = fixture().await;
        let _reply = fx.request(None).await;

        fx.engine.stop_listening().await.unwrap();

        assert_eq!(fx.engine.state().await, ListenerState::Idle);
        assert_eq!(fx.engine.pending_requests_count(), 1);
    }

    #[tokio::test]
    async fn test_start_listening_twice_is_idempotent() {
        let fx = fixture().await;

        fx.engine.start_listening().await.unwrap();
        fx.engine.start_listening().await.unwrap();

        assert_eq!(fx.engine.state().await, ListenerState::Listening);
    }

    #[tokio::test]
    async fn test_listening_routes_published_replies() {
        let fx = fixture().await;
        fx.engine.start_listening().await.unwrap();

        let reply = fx.request(Some(Duration::from_secs(5))).await;

        let responder = fx.broker.producer();
        responder.connect().await.unwrap();
        responder
            .publish(
                &fx.response,
                vec![OutboundRecord::new(r#"{"success":true,"data":{"v":1}}"#)
                    .with_header("correlation-id", reply.correlation_id())],
            )
            .await
            .unwrap();

        assert_eq!(reply.await.unwrap(), json!({"v": 1}));
        assert_eq!(fx.engine.pending_requests_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let fx = fixture().await;

        fx.engine.start_listening().await.unwrap();
        fx.engine.stop_listening().await.unwrap();
        fx.engine.start_listening().await.unwrap();

        assert_eq!(fx.engine.state().await, ListenerState::Listening);
    }

    #[tokio::test]
    async fn test_dropping_engine_rejects_pending() {
        let fx = fixture().await;
        let reply = fx.request(None).await;

        drop(fx.engine);

        assert!(matches!(reply.await, Err(CourierError::Stopped)));
    }
}
