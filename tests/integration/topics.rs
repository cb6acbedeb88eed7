use rocket::http::{ContentType, Status};

use crate::common::{ensure_agent, inbox, test_client};

fn create_topic(client: &crate::common::TestClient, name: &str) {
    let res = client
        .post("/api/v1/topics")
        .header(ContentType::JSON)
        .body(format!(r#"{{"name": "{name}", "description": "ci chatter"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

fn subscribe(client: &crate::common::TestClient, topic: &str, agent: &str) -> Status {
    client
        .post(format!("/api/v1/topics/{topic}/subscribe"))
        .header(ContentType::JSON)
        .body(format!(r#"{{"agent": "{agent}"}}"#))
        .dispatch()
        .status()
}

// Topic publish fan-out: the third end-to-end scenario.
#[test]
fn publish_fans_out_to_subscribers() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "charlie");
    ensure_agent(&client, "xavier");

    create_topic(&client, "builds");
    assert_eq!(subscribe(&client, "builds", "alpha"), Status::Ok);
    assert_eq!(subscribe(&client, "builds", "charlie"), Status::Ok);

    let res = client
        .post("/api/v1/topics/builds/publish")
        .header(ContentType::JSON)
        .body(r#"{"from": "xavier", "subject": "green", "body": "main is green again"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let receipt: serde_json::Value = res.into_json().unwrap();
    assert_eq!(receipt["recipients"], 2);

    for agent in ["alpha", "charlie"] {
        let page = inbox(&client, agent, "?state=unread");
        assert_eq!(page["count"], 1, "{agent} inbox");
        assert_eq!(page["entries"][0]["subject"], "green");
    }
    // The publisher is not subscribed, so nothing lands for xavier.
    let page = inbox(&client, "xavier", "");
    assert_eq!(page["count"], 0);

    // One publish activity event against the topic.
    let res = client.get("/api/v1/activity").dispatch();
    let events: Vec<serde_json::Value> = res.into_json().unwrap();
    let publishes: Vec<_> = events.iter().filter(|e| e["kind"] == "publish").collect();
    assert_eq!(publishes.len(), 1);
}

#[test]
fn late_subscribers_miss_earlier_publishes() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "xavier");
    create_topic(&client, "builds");

    client
        .post("/api/v1/topics/builds/publish")
        .header(ContentType::JSON)
        .body(r#"{"from": "xavier", "subject": "first", "body": "before anyone listens"}"#)
        .dispatch();

    assert_eq!(subscribe(&client, "builds", "alpha"), Status::Ok);
    let page = inbox(&client, "alpha", "");
    assert_eq!(page["count"], 0);
}

#[test]
fn unsubscribe_stops_delivery() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "xavier");
    create_topic(&client, "builds");
    subscribe(&client, "builds", "alpha");

    let res = client
        .post("/api/v1/topics/builds/unsubscribe")
        .header(ContentType::JSON)
        .body(r#"{"agent": "alpha"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    client
        .post("/api/v1/topics/builds/publish")
        .header(ContentType::JSON)
        .body(r#"{"from": "xavier", "subject": "later", "body": "after unsubscribe"}"#)
        .dispatch();
    let page = inbox(&client, "alpha", "");
    assert_eq!(page["count"], 0);
}

#[test]
fn duplicate_topic_conflicts() {
    let client = test_client();
    create_topic(&client, "builds");
    let res = client
        .post("/api/v1/topics")
        .header(ContentType::JSON)
        .body(r#"{"name": "builds"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn publish_to_unknown_topic_is_not_found() {
    let client = test_client();
    ensure_agent(&client, "xavier");
    let res = client
        .post("/api/v1/topics/ghost/publish")
        .header(ContentType::JSON)
        .body(r#"{"from": "xavier", "subject": "s", "body": "b"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn subscriber_list_round_trips() {
    let client = test_client();
    ensure_agent(&client, "alpha");
    ensure_agent(&client, "charlie");
    create_topic(&client, "builds");
    subscribe(&client, "builds", "alpha");
    subscribe(&client, "builds", "charlie");
    // Subscribing twice is harmless.
    subscribe(&client, "builds", "alpha");

    let res = client.get("/api/v1/topics/builds/subscribers").dispatch();
    let subs: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(subs.len(), 2);
}
