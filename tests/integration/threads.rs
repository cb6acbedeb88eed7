use rocket::http::{ContentType, Status};

use crate::common::{ensure_agent, send, test_client};

#[test]
fn replies_share_the_root_thread() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");

    let root = send(&client, "alpha", "beta", "plan", "first")["message_id"]
        .as_i64()
        .unwrap();

    let mut ids = vec![root];
    let mut parent = root;
    for i in 0..2 {
        let res = client
            .post("/api/v1/messages")
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "from": if i % 2 == 0 { "beta" } else { "alpha" },
                    "to": [if i % 2 == 0 { "alpha" } else { "beta" }],
                    "subject": format!("re: plan {i}"),
                    "body": "follow-up",
                    "reply_to": parent
                })
                .to_string(),
            )
            .dispatch();
        let receipt: serde_json::Value = res.into_json().unwrap();
        parent = receipt["message_id"].as_i64().unwrap();
        ids.push(parent);
    }

    let res = client.get(format!("/api/v1/threads/{root}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let thread: serde_json::Value = res.into_json().unwrap();
    assert_eq!(thread["thread_id"], root);
    assert_eq!(thread["count"], 3);
    let returned: Vec<i64> = thread["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect();
    // Thread round-trip: exactly the messages whose thread id matches,
    // time-ordered.
    assert_eq!(returned, ids);
    assert!(
        thread["messages"]
            .as_array()
            .unwrap()
            .iter()
            .all(|m| m["thread_id"] == root)
    );
}

#[test]
fn reply_to_missing_message_fails() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");

    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"from": "alpha", "to": ["beta"], "subject": "s", "body": "b", "reply_to": 999}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn unknown_thread_is_not_found() {
    let client = test_client();
    let res = client.get("/api/v1/threads/424242").dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn separate_sends_are_separate_threads() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "beta");

    let a = send(&client, "alpha", "beta", "one", "x")["message_id"]
        .as_i64()
        .unwrap();
    let b = send(&client, "alpha", "beta", "two", "y")["message_id"]
        .as_i64()
        .unwrap();

    let res = client.get(format!("/api/v1/threads/{a}")).dispatch();
    let thread: serde_json::Value = res.into_json().unwrap();
    assert_eq!(thread["count"], 1);
    assert_ne!(a, b);
}
