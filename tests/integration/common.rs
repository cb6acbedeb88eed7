use std::path::PathBuf;
use std::time::Duration;

use rocket::http::ContentType;
use rocket::local::blocking::Client;

use agent_courier::config::Config;

/// Wrapper around Client that deletes the temp data directory on drop.
/// Uses Option<Client> so the store connection is released before the
/// files go away (WAL mode holds them).
pub struct TestClient {
    client: Option<Client>,
    data_dir: PathBuf,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_config() -> Config {
    let data_dir = std::env::temp_dir().join(format!(
        "courier_test_{}",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    ));
    Config {
        data_dir,
        // Fast sweeps so snooze auto-wake is observable in tests.
        snooze_sweep_interval: Duration::from_millis(50),
        ..Config::default()
    }
}

pub fn test_client() -> TestClient {
    let config = test_config();
    let data_dir = config.data_dir.clone();
    let rocket = agent_courier::rocket_with_config(config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        data_dir,
    }
}

pub fn test_client_with_config(config: Config) -> TestClient {
    let data_dir = config.data_dir.clone();
    let rocket = agent_courier::rocket_with_config(config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        data_dir,
    }
}

/// Helper: ensure an identity `(name, proj, main)` and return the agent row.
pub fn ensure_agent(client: &Client, name: &str) -> serde_json::Value {
    let res = client
        .post("/api/v1/agents/ensure")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"name": "{name}", "project": "proj", "branch": "main"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), rocket::http::Status::Ok, "ensure {name}");
    res.into_json().unwrap()
}

/// Helper: direct send, returning the receipt.
pub fn send(
    client: &Client,
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> serde_json::Value {
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "from": from, "to": [to], "subject": subject, "body": body
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), rocket::http::Status::Ok, "send {subject}");
    res.into_json().unwrap()
}

/// Helper: fetch an inbox with a raw query string.
pub fn inbox(client: &Client, agent: &str, query: &str) -> serde_json::Value {
    let res = client.get(format!("/api/v1/inbox/{agent}{query}")).dispatch();
    assert_eq!(res.status(), rocket::http::Status::Ok);
    res.into_json().unwrap()
}
