// Long-poll contract tests. These need concurrent in-flight requests, so
// they use the asynchronous local client.

use std::path::PathBuf;

use rocket::http::ContentType;
use rocket::local::asynchronous::Client;
use rocket::tokio;

use crate::common::test_config;

struct AsyncEnv {
    client: Client,
    data_dir: PathBuf,
}

impl Drop for AsyncEnv {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

async fn async_client() -> AsyncEnv {
    let config = test_config();
    let data_dir = config.data_dir.clone();
    let client = Client::tracked(agent_courier::rocket_with_config(config))
        .await
        .expect("valid rocket instance");
    AsyncEnv { client, data_dir }
}

async fn ensure(client: &Client, name: &str) {
    let res = client
        .post("/api/v1/agents/ensure")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"name": "{name}", "project": "proj", "branch": "main"}}"#
        ))
        .dispatch()
        .await;
    assert_eq!(res.status(), rocket::http::Status::Ok);
}

async fn send(client: &Client, from: &str, to: &str, subject: &str) -> i64 {
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({"from": from, "to": [to], "subject": subject, "body": "body"})
                .to_string(),
        )
        .dispatch()
        .await;
    res.into_json::<serde_json::Value>().await.unwrap()["message_id"]
        .as_i64()
        .unwrap()
}

#[rocket::async_test]
async fn poll_returns_immediately_when_unread_exists() {
    let env = async_client().await;
    let client = &env.client;
    ensure(client, "alpha").await;
    ensure(client, "beta").await;
    let id = send(client, "alpha", "beta", "waiting").await;

    let res = client
        .get("/api/v1/inbox/beta/poll?cursor=0&max_wait_ms=5000")
        .dispatch()
        .await;
    let body: serde_json::Value = res.into_json().await.unwrap();
    assert_eq!(body["messages"][0]["id"], id);
    assert!(body["cursor"].as_i64().unwrap() > 0);
}

// Long-poll liveness: a registered poll resolves with a message that
// commits after it, well before the deadline.
#[rocket::async_test]
async fn blocked_poll_wakes_on_send() {
    let env = async_client().await;
    let client = &env.client;
    ensure(client, "alpha").await;
    ensure(client, "beta").await;

    let poll = client.get("/api/v1/inbox/beta/poll?cursor=0&max_wait_ms=5000");
    let (poll_res, sent_id) = tokio::join!(poll.dispatch(), async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        send(client, "alpha", "beta", "wake up").await
    });

    let body: serde_json::Value = poll_res.into_json().await.unwrap();
    assert_eq!(body["messages"][0]["id"], sent_id);
    let cursor = body["cursor"].as_i64().unwrap();
    assert!(cursor > 0);

    // The advanced cursor skips the delivered message.
    let res = client
        .get(format!(
            "/api/v1/inbox/beta/poll?cursor={cursor}&max_wait_ms=200"
        ))
        .dispatch()
        .await;
    let body: serde_json::Value = res.into_json().await.unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 0);
    assert_eq!(body["cursor"], cursor);
}

#[rocket::async_test]
async fn poll_times_out_empty() {
    let env = async_client().await;
    let client = &env.client;
    ensure(client, "beta").await;

    let start = std::time::Instant::now();
    let res = client
        .get("/api/v1/inbox/beta/poll?cursor=0&max_wait_ms=250")
        .dispatch()
        .await;
    let body: serde_json::Value = res.into_json().await.unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 0);
    assert_eq!(body["cursor"], 0);
    assert!(start.elapsed() >= std::time::Duration::from_millis(250));
}

#[rocket::async_test]
async fn poll_for_unknown_agent_fails() {
    let env = async_client().await;
    let res = env
        .client
        .get("/api/v1/inbox/ghost/poll?cursor=0&max_wait_ms=100")
        .dispatch()
        .await;
    assert_eq!(res.status(), rocket::http::Status::NotFound);
}

// Snooze + auto-wake: the sweep returns the row to read and resolves the
// recipient's blocked poll.
#[rocket::async_test]
async fn snoozed_message_wakes_blocked_poll() {
    let env = async_client().await;
    let client = &env.client;
    ensure(client, "alpha").await;
    ensure(client, "beta").await;
    let id = send(client, "alpha", "beta", "nap time").await;

    let until = (chrono::Utc::now() + chrono::Duration::milliseconds(100)).to_rfc3339();
    let res = client
        .post(format!("/api/v1/messages/{id}/transition"))
        .header(ContentType::JSON)
        .body(
            serde_json::json!({"agent": "beta", "to": "snoozed", "snooze_until": until})
                .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(res.status(), rocket::http::Status::Ok);

    // The sweep (50ms period in tests) wakes the row shortly after the
    // snooze expires; a blocked poll resolves with it.
    let res = client
        .get("/api/v1/inbox/beta/poll?cursor=1000000&max_wait_ms=3000")
        .dispatch()
        .await;
    let body: serde_json::Value = res.into_json().await.unwrap();
    assert_eq!(body["messages"][0]["id"], id);
    assert_eq!(body["messages"][0]["state"], "read");

    let res = client.get("/api/v1/inbox/beta?state=read").dispatch().await;
    let page: serde_json::Value = res.into_json().await.unwrap();
    assert_eq!(page["count"], 1);
}
