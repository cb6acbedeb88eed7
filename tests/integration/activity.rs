use rocket::http::ContentType;

use crate::common::{ensure_agent, send, test_client};

#[test]
fn send_and_read_leave_an_audit_trail() {
    let client = test_client();
    let alpha = ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");
    let id = send(&client, "alpha", "beta", "s", "b")["message_id"]
        .as_i64()
        .unwrap();
    client
        .post(format!("/api/v1/messages/{id}/transition"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "beta", "to": "read"}"#)
        .dispatch();

    let res = client.get("/api/v1/activity").dispatch();
    let events: Vec<serde_json::Value> = res.into_json().unwrap();
    let kinds: Vec<&str> = events.iter().map(|e| e["kind"].as_str().unwrap()).collect();
    assert!(kinds.contains(&"send"));
    assert!(kinds.contains(&"read"));

    // Target filter narrows to the one message.
    let res = client
        .get(format!("/api/v1/activity?target=message:{id}"))
        .dispatch();
    let events: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e["target"] == format!("message:{id}")));

    // Actor filter: only the sender's own events.
    let actor_id = alpha["id"].as_i64().unwrap();
    let res = client
        .get(format!("/api/v1/activity?actor={actor_id}"))
        .dispatch();
    let events: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(events.iter().all(|e| e["actor_id"] == actor_id));
    assert!(events.iter().any(|e| e["kind"] == "send"));
}

#[test]
fn activity_is_newest_first_and_limited() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");
    for i in 0..5 {
        send(&client, "alpha", "beta", &format!("m{i}"), "b");
    }

    let res = client.get("/api/v1/activity?limit=3").dispatch();
    let events: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(events.len(), 3);
    let ids: Vec<i64> = events.iter().map(|e| e["id"].as_i64().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] > w[1]));
}
