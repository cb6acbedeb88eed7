// Store-and-forward client behavior against an unreachable endpoint.
// Server-side replay deduplication is covered by the idempotent-send
// tests in `mail.rs`.

use std::time::Duration;

use agent_courier::client::{CourierClient, Dispatch};
use agent_courier::models::{Priority, SendMessage};
use agent_courier::queue::LocalQueue;

// Nothing listens on this port; connections are refused immediately.
const DEAD_ENDPOINT: &str = "http://127.0.0.1:9";

fn temp_queue_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "courier_client_test_{}/queue.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    ))
}

fn offline_client(queue_path: &std::path::Path) -> CourierClient {
    CourierClient::new(
        DEAD_ENDPOINT,
        queue_path,
        Duration::from_secs(3600),
        Duration::from_millis(500),
        Duration::from_secs(30),
    )
    .unwrap()
}

fn send_request() -> SendMessage {
    SendMessage {
        from: "alpha".into(),
        to: vec!["beta".into()],
        subject: "offline".into(),
        body: "queued for later".into(),
        priority: Some(Priority::Normal),
        reply_to: None,
        deadline: None,
        idempotency_key: None,
    }
}

#[rocket::async_test]
async fn offline_send_is_queued_with_a_key() {
    let queue_path = temp_queue_path();
    let client = offline_client(&queue_path);

    match client.send_message(send_request()).await.unwrap() {
        Dispatch::Queued { idempotency_key } => assert!(!idempotency_key.is_empty()),
        Dispatch::Delivered(_) => panic!("endpoint should be unreachable"),
    }
    assert_eq!(client.queued_len().unwrap(), 1);

    let _ = std::fs::remove_dir_all(queue_path.parent().unwrap());
}

#[rocket::async_test]
async fn queue_survives_client_restart() {
    let queue_path = temp_queue_path();
    let client = offline_client(&queue_path);
    client.send_message(send_request()).await.unwrap();
    client.heartbeat(7).await.unwrap();
    drop(client);

    let queue = LocalQueue::open(&queue_path, Duration::from_secs(3600)).unwrap();
    assert_eq!(queue.len().unwrap(), 2);
    // FIFO: the send precedes the heartbeat.
    let pending = queue.pending().unwrap();
    assert_eq!(pending[0].kind.as_str(), "send");
    assert_eq!(pending[1].kind.as_str(), "heartbeat");

    let _ = std::fs::remove_dir_all(queue_path.parent().unwrap());
}

#[rocket::async_test]
async fn drain_against_dead_endpoint_records_attempts() {
    let queue_path = temp_queue_path();
    let client = offline_client(&queue_path);
    client.send_message(send_request()).await.unwrap();

    let err = client.drain_pending().await.unwrap_err();
    assert_eq!(err.kind(), "unavailable");

    let queue_len = client.queued_len().unwrap();
    assert_eq!(queue_len, 1, "op is kept for the next pass");

    let _ = std::fs::remove_dir_all(queue_path.parent().unwrap());
}

#[rocket::async_test]
async fn reads_fail_fast_and_are_never_queued() {
    let queue_path = temp_queue_path();
    let client = offline_client(&queue_path);

    let err = client.fetch_inbox("beta", None).await.unwrap_err();
    assert_eq!(err.kind(), "unavailable");
    assert_eq!(err.exit_code(), 3);
    assert_eq!(client.queued_len().unwrap(), 0);

    let _ = std::fs::remove_dir_all(queue_path.parent().unwrap());
}
