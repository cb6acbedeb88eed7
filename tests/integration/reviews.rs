// Review workflow tests drive a fake reviewer executable that prints the
// structured report the real one would.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rocket::http::{ContentType, Status};

use crate::common::{TestClient, ensure_agent, inbox, test_client_with_config, test_config};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Client whose review service runs the given script as its reviewer.
fn client_with_reviewer(script: &Path) -> TestClient {
    let mut config = test_config();
    config.reviewer_cmd = script.to_string_lossy().into_owned();
    test_client_with_config(config)
}

fn create_review(client: &TestClient, review_type: &str) -> serde_json::Value {
    let res = client
        .post("/api/v1/reviews")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "branch": "feat", "base_branch": "main", "commit_sha": "abc123",
                "review_type": review_type, "requester": "dev"
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

/// Poll the review until it reaches `want` or give up after ~5s.
fn wait_for_state(client: &TestClient, id: i64, want: &str) -> serde_json::Value {
    for _ in 0..100 {
        let res = client.get(format!("/api/v1/reviews/{id}")).dispatch();
        let detail: serde_json::Value = res.into_json().unwrap();
        if detail["state"] == want {
            return detail;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("review {id} never reached {want}");
}

// Review happy path: create -> under_review -> worker approves ->
// approved, iteration 1 persisted, summary mail sent.
#[test]
fn approve_happy_path() {
    let scripts = std::env::temp_dir().join(format!("courier_rev_{}", uuid::Uuid::new_v4()));
    let script = write_script(
        &scripts,
        "approve.sh",
        "#!/bin/sh\necho '{\"decision\":\"approve\",\"summary\":\"clean diff\",\"files_reviewed\":3,\"lines_analyzed\":120,\"cost_usd\":0.25}'\n",
    );
    let client = client_with_reviewer(&script);
    ensure_agent(&client, "dev");

    let review = create_review(&client, "full");
    let id = review["id"].as_i64().unwrap();
    // Create returns once the worker is dispatched.
    assert_eq!(review["state"], "under_review");

    let detail = wait_for_state(&client, id, "approved");
    let iterations = detail["iterations"].as_array().unwrap();
    assert_eq!(iterations.len(), 1);
    assert_eq!(iterations[0]["iteration"], 1);
    assert_eq!(iterations[0]["decision"], "approve");
    assert_eq!(iterations[0]["summary"], "clean diff");
    assert_eq!(iterations[0]["files_reviewed"], 3);
    assert!((iterations[0]["cost_usd"].as_f64().unwrap() - 0.25).abs() < 1e-9);

    // Summary mail lands in the requester's inbox from the courier agent.
    for _ in 0..100 {
        let page = inbox(&client, "dev", "");
        if page["count"] == 1 {
            assert_eq!(page["entries"][0]["sender"], "courier");
            assert!(
                page["entries"][0]["subject"]
                    .as_str()
                    .unwrap()
                    .contains("approved")
            );
            let _ = std::fs::remove_dir_all(&scripts);
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("requester never received the summary mail");
}

// Rejection + resubmit: iteration numbers stay dense (1, 2).
#[test]
fn request_changes_then_resubmit_approves() {
    let scripts = std::env::temp_dir().join(format!("courier_rev_{}", uuid::Uuid::new_v4()));
    let marker = scripts.join("ran-once");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::write(
        scripts.join("changes.json"),
        serde_json::json!({
            "decision": "request_changes",
            "summary": "two problems",
            "issues": [
                {"severity": "high", "category": "correctness", "file_path": "src/a.rs",
                 "line_start": 3, "line_end": 9, "description": "unchecked index",
                 "suggestion": "use get()"},
                {"severity": "low", "category": "style", "file_path": "src/b.rs",
                 "line_start": 1, "line_end": 1, "description": "stale comment"}
            ]
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        scripts.join("approve.json"),
        serde_json::json!({"decision": "approve", "summary": "both fixed"}).to_string(),
    )
    .unwrap();
    let script = write_script(
        &scripts,
        "reviewer.sh",
        &format!(
            "#!/bin/sh\nif [ -f {marker} ]; then cat {approve}; else touch {marker}; cat {changes}; fi\n",
            marker = marker.display(),
            approve = scripts.join("approve.json").display(),
            changes = scripts.join("changes.json").display(),
        ),
    );
    let client = client_with_reviewer(&script);
    ensure_agent(&client, "dev");

    let review = create_review(&client, "full");
    let id = review["id"].as_i64().unwrap();

    let detail = wait_for_state(&client, id, "changes_requested");
    assert_eq!(detail["iterations"].as_array().unwrap().len(), 1);

    let res = client
        .get(format!("/api/v1/reviews/{id}/issues"))
        .dispatch();
    let issues: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0]["severity"], "high");
    assert_eq!(issues[0]["status"], "open");

    let res = client
        .post(format!("/api/v1/reviews/{id}/resubmit"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let detail = wait_for_state(&client, id, "approved");
    let iterations = detail["iterations"].as_array().unwrap();
    assert_eq!(iterations.len(), 2);
    assert_eq!(iterations[0]["iteration"], 1);
    assert_eq!(iterations[1]["iteration"], 2);
    assert_eq!(iterations[1]["decision"], "approve");

    let _ = std::fs::remove_dir_all(&scripts);
}

#[test]
fn worker_failure_is_an_inconclusive_iteration() {
    let scripts = std::env::temp_dir().join(format!("courier_rev_{}", uuid::Uuid::new_v4()));
    let script = write_script(&scripts, "broken.sh", "#!/bin/sh\nexit 1\n");
    let client = client_with_reviewer(&script);
    ensure_agent(&client, "dev");

    let review = create_review(&client, "performance");
    let id = review["id"].as_i64().unwrap();

    let detail = wait_for_state(&client, id, "changes_requested");
    let iterations = detail["iterations"].as_array().unwrap();
    assert_eq!(iterations.len(), 1);
    assert_eq!(iterations[0]["decision"], "inconclusive");

    let _ = std::fs::remove_dir_all(&scripts);
}

#[test]
fn cancel_abandons_the_inflight_worker() {
    let scripts = std::env::temp_dir().join(format!("courier_rev_{}", uuid::Uuid::new_v4()));
    let script = write_script(&scripts, "slow.sh", "#!/bin/sh\nsleep 30\n");
    let client = client_with_reviewer(&script);
    ensure_agent(&client, "dev");

    let review = create_review(&client, "security");
    let id = review["id"].as_i64().unwrap();
    assert_eq!(review["state"], "under_review");

    let res = client.post(format!("/api/v1/reviews/{id}/cancel")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let cancelled: serde_json::Value = res.into_json().unwrap();
    assert_eq!(cancelled["state"], "cancelled");

    // The abandoned round leaves no iteration row behind.
    std::thread::sleep(Duration::from_millis(200));
    let res = client.get(format!("/api/v1/reviews/{id}")).dispatch();
    let detail: serde_json::Value = res.into_json().unwrap();
    assert_eq!(detail["state"], "cancelled");
    assert_eq!(detail["iterations"].as_array().unwrap().len(), 0);

    let _ = std::fs::remove_dir_all(&scripts);
}

#[test]
fn terminal_states_reject_further_events() {
    let scripts = std::env::temp_dir().join(format!("courier_rev_{}", uuid::Uuid::new_v4()));
    let script = write_script(
        &scripts,
        "approve.sh",
        "#!/bin/sh\necho '{\"decision\":\"approve\"}'\n",
    );
    let client = client_with_reviewer(&script);
    ensure_agent(&client, "dev");

    let review = create_review(&client, "full");
    let id = review["id"].as_i64().unwrap();
    wait_for_state(&client, id, "approved");

    let res = client
        .post(format!("/api/v1/reviews/{id}/resubmit"))
        .dispatch();
    assert_eq!(res.status(), Status::UnprocessableEntity);
    let res = client.post(format!("/api/v1/reviews/{id}/cancel")).dispatch();
    assert_eq!(res.status(), Status::UnprocessableEntity);

    let _ = std::fs::remove_dir_all(&scripts);
}

#[test]
fn resubmit_is_rejected_while_worker_in_flight() {
    let scripts = std::env::temp_dir().join(format!("courier_rev_{}", uuid::Uuid::new_v4()));
    let script = write_script(&scripts, "slow.sh", "#!/bin/sh\nsleep 30\n");
    let client = client_with_reviewer(&script);
    ensure_agent(&client, "dev");

    let review = create_review(&client, "architecture");
    let id = review["id"].as_i64().unwrap();

    let res = client
        .post(format!("/api/v1/reviews/{id}/resubmit"))
        .dispatch();
    assert_eq!(res.status(), Status::UnprocessableEntity);

    // Clean up the hanging worker.
    client.post(format!("/api/v1/reviews/{id}/cancel")).dispatch();
    let _ = std::fs::remove_dir_all(&scripts);
}

#[test]
fn issue_status_updates() {
    let scripts = std::env::temp_dir().join(format!("courier_rev_{}", uuid::Uuid::new_v4()));
    let script = write_script(
        &scripts,
        "one-issue.sh",
        "#!/bin/sh\necho '{\"decision\":\"request_changes\",\"issues\":[{\"severity\":\"medium\",\"file_path\":\"src/x.rs\",\"line_start\":5,\"line_end\":5,\"description\":\"off by one\"}]}'\n",
    );
    let client = client_with_reviewer(&script);
    ensure_agent(&client, "dev");

    let review = create_review(&client, "full");
    let id = review["id"].as_i64().unwrap();
    wait_for_state(&client, id, "changes_requested");

    let res = client
        .get(format!("/api/v1/reviews/{id}/issues"))
        .dispatch();
    let issues: Vec<serde_json::Value> = res.into_json().unwrap();
    let issue_id = issues[0]["id"].as_i64().unwrap();

    let res = client
        .post(format!("/api/v1/issues/{issue_id}/status"))
        .header(ContentType::JSON)
        .body(r#"{"status": "fixed"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get(format!("/api/v1/reviews/{id}/issues"))
        .dispatch();
    let issues: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(issues[0]["status"], "fixed");

    let _ = std::fs::remove_dir_all(&scripts);
}

#[test]
fn create_requires_known_requester() {
    let client = test_client_with_config(test_config());
    let res = client
        .post("/api/v1/reviews")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "branch": "feat", "base_branch": "main", "commit_sha": "abc",
                "review_type": "full", "requester": "nobody"
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
