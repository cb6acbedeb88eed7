use rocket::http::{ContentType, Status};

use crate::common::{ensure_agent, inbox, send, test_client};

fn transition(client: &crate::common::TestClient, id: i64, body: &str) -> Status {
    client
        .post(format!("/api/v1/messages/{id}/transition"))
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .status()
}

fn setup_message(client: &crate::common::TestClient) -> i64 {
    ensure_agent(client, "alpha");
    ensure_agent(client, "beta");
    send(client, "alpha", "beta", "subject", "body")["message_id"]
        .as_i64()
        .unwrap()
}

#[test]
fn star_and_unstar_cycle() {
    let client = test_client();
    let id = setup_message(&client);

    assert_eq!(
        transition(&client, id, r#"{"agent": "beta", "to": "read"}"#),
        Status::Ok
    );
    assert_eq!(
        transition(&client, id, r#"{"agent": "beta", "to": "starred"}"#),
        Status::Ok
    );
    assert_eq!(
        transition(&client, id, r#"{"agent": "beta", "to": "read"}"#),
        Status::Ok
    );
}

#[test]
fn archive_and_unarchive() {
    let client = test_client();
    let id = setup_message(&client);

    assert_eq!(
        transition(&client, id, r#"{"agent": "beta", "to": "archived"}"#),
        Status::Ok
    );
    let page = inbox(&client, "beta", "?state=archived");
    assert_eq!(page["count"], 1);

    assert_eq!(
        transition(&client, id, r#"{"agent": "beta", "to": "read"}"#),
        Status::Ok
    );
    let page = inbox(&client, "beta", "?state=read");
    assert_eq!(page["count"], 1);
}

#[test]
fn guarded_pairs_are_rejected() {
    let client = test_client();
    let id = setup_message(&client);

    // Deleted is never caller-reachable, even from unread.
    let status = transition(&client, id, r#"{"agent": "beta", "to": "deleted"}"#);
    assert_eq!(status, Status::UnprocessableEntity);

    // Starred cannot jump to archived.
    transition(&client, id, r#"{"agent": "beta", "to": "starred"}"#);
    let status = transition(&client, id, r#"{"agent": "beta", "to": "archived"}"#);
    assert_eq!(status, Status::UnprocessableEntity);
}

#[test]
fn trash_is_hidden_and_terminal_for_callers() {
    let client = test_client();
    let id = setup_message(&client);

    assert_eq!(
        transition(&client, id, r#"{"agent": "beta", "to": "trash"}"#),
        Status::Ok
    );
    // Default inbox view hides trash.
    let page = inbox(&client, "beta", "");
    assert_eq!(page["count"], 0);
    // No way back out of trash for the caller.
    let status = transition(&client, id, r#"{"agent": "beta", "to": "read"}"#);
    assert_eq!(status, Status::UnprocessableEntity);
}

#[test]
fn snooze_requires_wake_time() {
    let client = test_client();
    let id = setup_message(&client);

    let status = transition(&client, id, r#"{"agent": "beta", "to": "snoozed"}"#);
    assert_eq!(status, Status::BadRequest);

    let until = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    let status = transition(
        &client,
        id,
        &format!(r#"{{"agent": "beta", "to": "snoozed", "snooze_until": "{until}"}}"#),
    );
    assert_eq!(status, Status::Ok);

    let page = inbox(&client, "beta", "?state=snoozed");
    assert_eq!(page["count"], 1);
    assert!(page["entries"][0]["snoozed_until"].is_string());
}

#[test]
fn transition_by_non_recipient_is_not_found() {
    let client = test_client();
    let id = setup_message(&client);
    ensure_agent(&client, "gamma");

    let status = transition(&client, id, r#"{"agent": "gamma", "to": "read"}"#);
    assert_eq!(status, Status::NotFound);
}

// --- Acknowledgement ---

#[test]
fn acknowledge_stamps_once() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");
    let deadline = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "from": "alpha", "to": ["beta"], "subject": "ack me", "body": "now",
                "deadline": deadline
            })
            .to_string(),
        )
        .dispatch();
    let id = res.into_json::<serde_json::Value>().unwrap()["message_id"]
        .as_i64()
        .unwrap();

    let first: serde_json::Value = client
        .post(format!("/api/v1/messages/{id}/ack"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "beta"}"#)
        .dispatch()
        .into_json()
        .unwrap();
    let second: serde_json::Value = client
        .post(format!("/api/v1/messages/{id}/ack"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "beta"}"#)
        .dispatch()
        .into_json()
        .unwrap();
    // Idempotent: the second call returns the first stamp.
    assert_eq!(first["acknowledged_at"], second["acknowledged_at"]);
}

#[test]
fn acknowledge_after_deadline_is_rejected() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");
    let deadline = (chrono::Utc::now() - chrono::Duration::seconds(1)).to_rfc3339();
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "from": "alpha", "to": ["beta"], "subject": "late", "body": "oops",
                "deadline": deadline
            })
            .to_string(),
        )
        .dispatch();
    let id = res.into_json::<serde_json::Value>().unwrap()["message_id"]
        .as_i64()
        .unwrap();

    let res = client
        .post(format!("/api/v1/messages/{id}/ack"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "beta"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::UnprocessableEntity);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["kind"], "deadline_passed");

    // State untouched: still unread, still flagged pending.
    let page = inbox(&client, "beta", "?state=unread");
    assert_eq!(page["count"], 1);
    assert_eq!(page["entries"][0]["deadline_pending"], true);
}

#[test]
fn unacked_deadline_sorts_before_equal_priority() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");

    send(&client, "alpha", "beta", "plain", "no deadline");
    let deadline = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "from": "alpha", "to": ["beta"], "subject": "urgent-ish", "body": "deadline",
                "deadline": deadline
            })
            .to_string(),
        )
        .dispatch();

    let page = inbox(&client, "beta", "");
    assert_eq!(page["entries"][0]["subject"], "urgent-ish");
    assert_eq!(page["entries"][0]["deadline_pending"], true);
    assert_eq!(page["entries"][1]["deadline_pending"], false);
}
