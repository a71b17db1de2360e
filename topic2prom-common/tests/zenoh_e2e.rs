//! End-to-end tests with Zenoh pub/sub.
//!
//! Note: Zenoh requires multi-thread tokio runtime.
//! Each test uses a unique key prefix to avoid interference.

use std::time::Duration;

use topic2prom_common::{ZenohConfig, connect};

/// Generate a unique test prefix to avoid test interference.
fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_text_payload_roundtrip() {
    let prefix = unique_prefix();
    let session = connect(&ZenohConfig::default())
        .await
        .expect("Failed to open Zenoh session");

    let key = format!("{}/sensors/room1/temp", prefix);
    let subscriber = session
        .declare_subscriber(&key)
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    session.put(&key, "21.5").await.expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for message")
        .expect("Failed to receive message");

    assert_eq!(received.key_expr().as_str(), key);
    assert_eq!(&*received.payload().to_bytes(), b"21.5");

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exact_key_does_not_match_sibling() {
    let prefix = unique_prefix();
    let session = connect(&ZenohConfig::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(format!("{}/a/1", prefix))
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    session
        .put(format!("{}/a/2", prefix), "1")
        .await
        .expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_millis(500), subscriber.recv_async()).await;
    assert!(received.is_err(), "sibling key must not be delivered");

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
