//! Redis stream integration tests.

use librend_models::{FinalizedRecord, Segment};
use librend_queue::{QueueConfig, ResultQueue, SegmentQueue};

fn isolated_config() -> QueueConfig {
    dotenvy::dotenv().ok();
    let suffix = uuid::Uuid::new_v4();
    QueueConfig {
        segment_stream: format!("test:segments:{}", suffix),
        result_stream: format!("test:results:{}", suffix),
        ..QueueConfig::from_env()
    }
}

/// Test stream creation and a consume/ack cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_segment_consume_ack() {
    let queue = SegmentQueue::connect(isolated_config())
        .await
        .expect("Failed to connect");
    queue.init().await.expect("Failed to initialize queue");

    let segment = Segment::gloss("abc", 1, "OI", 1500);
    queue.enqueue(&segment).await.expect("Failed to enqueue");

    let delivery = queue
        .next_delivery("test-consumer")
        .await
        .expect("Failed to read")
        .expect("Expected a delivery");

    assert_eq!(delivery.correlation_id.as_deref(), Some("abc"));
    assert_eq!(delivery.attempt, 0);
    let parsed = Segment::parse(delivery.correlation_id.as_deref(), delivery.body_str())
        .expect("Failed to parse");
    assert_eq!(parsed, segment);

    queue.ack(&delivery.message_id).await.expect("Failed to ack");
    assert_eq!(queue.len().await.expect("Failed to get length"), 0);
}

/// Test that requeue moves the message to the tail and bumps the attempt.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_requeue_moves_to_tail() {
    let queue = SegmentQueue::connect(isolated_config())
        .await
        .expect("Failed to connect");
    queue.init().await.expect("Failed to initialize queue");

    queue
        .enqueue(&Segment::gloss("xyz", 1, "OI", 0))
        .await
        .expect("Failed to enqueue");
    queue
        .enqueue(&Segment::gloss("abc", 1, "OI", 0))
        .await
        .expect("Failed to enqueue");

    let first = queue.next_delivery("c").await.unwrap().unwrap();
    assert_eq!(first.correlation_id.as_deref(), Some("xyz"));
    queue.requeue(&first).await.expect("Failed to requeue");

    let second = queue.next_delivery("c").await.unwrap().unwrap();
    assert_eq!(second.correlation_id.as_deref(), Some("abc"));
    queue.ack(&second.message_id).await.unwrap();

    let third = queue.next_delivery("c").await.unwrap().unwrap();
    assert_eq!(third.correlation_id.as_deref(), Some("xyz"));
    assert_eq!(third.attempt, 1);
    assert_eq!(third.body, first.body);
    queue.ack(&third.message_id).await.unwrap();
}

/// Test publishing to the result stream.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_result() {
    let config = isolated_config();
    let results = ResultQueue::connect(&config).await.expect("Failed to connect");

    let record = FinalizedRecord::from_terminal(&Segment::finalize("abc", 3), "/tmp/abc.mp4");
    results.publish(&record).await.expect("Failed to publish");
    results.ping().await.expect("Failed to ping");

    assert_eq!(results.len().await.expect("Failed to get length"), 1);
}
