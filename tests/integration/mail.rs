use rocket::http::{ContentType, Status};

use crate::common::{ensure_agent, inbox, send, test_client};

// Direct send + read: the first end-to-end scenario.
#[test]
fn direct_send_and_read() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");

    let receipt = send(&client, "alpha", "beta", "hi", "yo");
    let message_id = receipt["message_id"].as_i64().unwrap();
    assert!(message_id > 0);
    assert_eq!(receipt["deduplicated"], false);

    let page = inbox(&client, "beta", "?state=unread");
    assert_eq!(page["count"], 1);
    assert_eq!(page["entries"][0]["id"], message_id);
    assert_eq!(page["entries"][0]["state"], "unread");
    assert_eq!(page["entries"][0]["sender"], "alpha@proj.main");

    let res = client
        .post(format!("/api/v1/messages/{message_id}/transition"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "beta", "to": "read"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let page = inbox(&client, "beta", "?state=unread");
    assert_eq!(page["count"], 0);
}

#[test]
fn send_to_unknown_recipient_fails() {
    let client = test_client();
    ensure_agent(&client, "alpha");

    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"from": "alpha", "to": ["ghost"], "subject": "hi", "body": "yo"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["kind"], "unknown_recipient");
}

#[test]
fn send_from_unknown_sender_fails() {
    let client = test_client();
    ensure_agent(&client, "beta");
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"from": "ghost", "to": ["beta"], "subject": "hi", "body": "yo"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn send_requires_recipients_and_content() {
    let client = test_client();
    ensure_agent(&client, "alpha");

    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"from": "alpha", "to": [], "subject": "hi", "body": "yo"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"from": "alpha", "to": ["alpha"], "subject": "", "body": "yo"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

// Send idempotence law: identical (sender, key) yields the same message id
// and exactly one row.
#[test]
fn idempotent_send_returns_original_id() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");

    let body = serde_json::json!({
        "from": "alpha", "to": ["beta"], "subject": "once", "body": "only",
        "idempotency_key": "k1"
    })
    .to_string();

    let first: serde_json::Value = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(&body)
        .dispatch()
        .into_json()
        .unwrap();
    let second: serde_json::Value = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(&body)
        .dispatch()
        .into_json()
        .unwrap();

    assert_eq!(first["message_id"], second["message_id"]);
    assert_eq!(first["deduplicated"], false);
    assert_eq!(second["deduplicated"], true);

    let page = inbox(&client, "beta", "");
    assert_eq!(page["count"], 1);
}

#[test]
fn different_senders_may_reuse_a_key() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");
    ensure_agent(&client, "gamma");

    for from in ["alpha", "beta"] {
        let res = client
            .post("/api/v1/messages")
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "from": from, "to": ["gamma"], "subject": "s", "body": "b",
                    "idempotency_key": "shared"
                })
                .to_string(),
            )
            .dispatch();
        assert_eq!(res.status(), Status::Ok);
    }
    let page = inbox(&client, "gamma", "");
    assert_eq!(page["count"], 2);
}

#[test]
fn message_detail_lists_recipients() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");
    ensure_agent(&client, "gamma");

    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"from": "alpha", "to": ["beta", "gamma"], "subject": "all", "body": "hands"}"#)
        .dispatch();
    let receipt: serde_json::Value = res.into_json().unwrap();
    let id = receipt["message_id"].as_i64().unwrap();

    let res = client.get(format!("/api/v1/messages/{id}")).dispatch();
    let detail: serde_json::Value = res.into_json().unwrap();
    let recipients = detail["recipients"].as_array().unwrap();
    assert_eq!(recipients.len(), 2);
    assert!(recipients.iter().all(|r| r["state"] == "unread"));
}

#[test]
fn duplicate_recipients_collapse_to_one_row() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");

    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"from": "alpha", "to": ["beta", "beta"], "subject": "s", "body": "b"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let page = inbox(&client, "beta", "");
    assert_eq!(page["count"], 1);
}

#[test]
fn inbox_filters_by_sender_and_search() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");
    ensure_agent(&client, "gamma");

    send(&client, "alpha", "gamma", "deploy", "the canary build is green");
    send(&client, "beta", "gamma", "lunch", "tacos today");

    let page = inbox(&client, "gamma", "?sender=alpha");
    assert_eq!(page["count"], 1);
    assert_eq!(page["entries"][0]["subject"], "deploy");

    let page = inbox(&client, "gamma", "?q=canary");
    assert_eq!(page["count"], 1);
    assert_eq!(page["entries"][0]["subject"], "deploy");

    let page = inbox(&client, "gamma", "?q=sushi");
    assert_eq!(page["count"], 0);
}

#[test]
fn urgent_messages_sort_first() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");

    send(&client, "alpha", "beta", "routine", "later");
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"from": "alpha", "to": ["beta"], "subject": "fire", "body": "now", "priority": "urgent"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let page = inbox(&client, "beta", "");
    assert_eq!(page["entries"][0]["subject"], "fire");
    assert_eq!(page["entries"][1]["subject"], "routine");
}

#[test]
fn inbox_pagination_cursor_walks_all_rows() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");
    for i in 0..5 {
        send(&client, "alpha", "beta", &format!("m{i}"), "body");
    }

    let page = inbox(&client, "beta", "?limit=2");
    assert_eq!(page["count"], 2);
    let cursor = page["next_cursor"].as_str().unwrap().to_string();

    let page2 = inbox(&client, "beta", &format!("?limit=2&cursor={cursor}"));
    assert_eq!(page2["count"], 2);
    assert_ne!(page["entries"][0]["id"], page2["entries"][0]["id"]);

    let cursor2 = page2["next_cursor"].as_str().unwrap().to_string();
    let page3 = inbox(&client, "beta", &format!("?limit=2&cursor={cursor2}"));
    assert_eq!(page3["count"], 1);
    assert!(page3["next_cursor"].is_null());
}
