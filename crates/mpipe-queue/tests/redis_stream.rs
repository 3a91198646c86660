//! Redis Streams source tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test -p mpipe-queue -- --ignored`

use std::collections::HashMap;
use std::time::Duration;

use mpipe_models::FileEvent;
use mpipe_queue::{EventSource, QueueConfig, RedisStreamSource};

async fn source(max_delivery_attempts: u32) -> RedisStreamSource {
    source_with(max_delivery_attempts, QueueConfig::default().claim_min_idle).await
}

async fn source_with(max_delivery_attempts: u32, claim_min_idle: Duration) -> RedisStreamSource {
    dotenvy::dotenv().ok();
    let suffix = uuid::Uuid::new_v4();
    let config = QueueConfig {
        stream_name: format!("mpipe:test:{}", suffix),
        consumer_group: format!("mpipe:test-group:{}", suffix),
        dlq_stream_name: format!("mpipe:test-dlq:{}", suffix),
        max_delivery_attempts,
        block: Duration::from_millis(200),
        claim_min_idle,
        claim_interval: Duration::ZERO,
        ..QueueConfig::from_env()
    };
    let source = RedisStreamSource::new(config).expect("client");
    source.init().await.expect("init");
    source
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_poll_ack() {
    let source = source(3).await;
    // Creating the group twice is tolerated.
    source.init().await.unwrap();

    let mut headers = HashMap::new();
    headers.insert(
        "traceparent".to_string(),
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
    );
    let payload = FileEvent::new("clip.mp4", "video/mp4", 7).to_payload().unwrap();
    let id = source.publish(&payload, &headers).await.unwrap();

    let records = source.poll().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].delivery.message_id, id);

    let event = records[0].decode().unwrap();
    assert_eq!(event.filename, "clip.mp4");
    assert!(event.trace.is_some());

    source.ack(&records[0].delivery).await.unwrap();
    assert!(source.poll().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_failure_counter_and_dead_letter() {
    let source = source(2).await;
    let payload = FileEvent::new("clip.mp4", "video/mp4", 7).to_payload().unwrap();
    source.publish(&payload, &HashMap::new()).await.unwrap();

    let record = source.poll().await.unwrap().remove(0);
    assert_eq!(source.record_failure(&record.delivery).await.unwrap(), 1);
    assert_eq!(source.record_failure(&record.delivery).await.unwrap(), 2);
    assert_eq!(source.max_delivery_attempts(), 2);

    source
        .dead_letter(&record.delivery, &payload, "encode failed")
        .await
        .unwrap();
    assert!(source.poll().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_keep_alive_defers_reclaim() {
    let source = source_with(3, Duration::from_millis(300)).await;
    let payload = FileEvent::new("clip.mp4", "video/mp4", 7).to_payload().unwrap();
    let id = source.publish(&payload, &HashMap::new()).await.unwrap();
    let record = source.poll().await.unwrap().remove(0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    source.keep_alive(&[record.delivery.clone()]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(source.poll().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let reclaimed = source.poll().await.unwrap();
    assert_eq!(reclaimed[0].delivery.message_id, id);
    source.ack(&record.delivery).await.unwrap();
}
