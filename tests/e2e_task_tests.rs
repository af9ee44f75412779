//! End-to-end tests for task submission, execution and cancellation
//!
//! Every test spawns a real server with running workers and drives it over
//! HTTP.

mod common;

use chrono::DateTime;
use common::{TestClient, TestServer, AGENT_ID, SNAPSHOT_TASK};
use reqwest::StatusCode;
use serde_json::{json, Value};

fn snapshot_with_priority(priority: &str) -> Value {
    json!({
        "owner_id": AGENT_ID,
        "task_type": SNAPSHOT_TASK,
        "params": {"readings": [1.0]},
        "priority": priority,
    })
}

fn slow_snapshot(delay_ms: u64) -> Value {
    json!({
        "owner_id": AGENT_ID,
        "task_type": SNAPSHOT_TASK,
        "params": {"readings": [50.0], "delay_ms": delay_ms},
    })
}

#[tokio::test]
async fn test_submitted_task_completes_with_history() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.submit_snapshot(&[20.0, 30.0, 40.0]).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "pending");
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert!(task_id.starts_with("agent-task-"));

    let task = client.wait_for_status(&task_id, "completed").await;
    assert_eq!(task["progress_percentage"], 100);
    assert_eq!(task["result"]["percentage"], 30.0);
    assert_eq!(task["result"]["sample_count"], 3);
    assert!(task["started_at"].is_string());
    assert!(task["completed_at"].is_string());

    let response = client.get_history(AGENT_ID, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let history: Vec<Value> = response.json().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["percentage"], 30.0);
}

#[tokio::test]
async fn test_overrunning_task_times_out() {
    let server = TestServer::spawn_with(|settings| settings.worker.task_timeout_sec = 1).await;
    let client = TestClient::new(server.base_url.clone());

    let task_id = client.submit_ok(slow_snapshot(10_000)).await;

    let task = client.wait_for_status(&task_id, "timeout").await;
    assert!(task["error"].as_str().unwrap().contains("timeout"));
    assert!(task["result"].is_null());

    let history: Vec<Value> = client.get_history(AGENT_ID, &[]).await.json().await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_cancel_running_task() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let task_id = client.submit_ok(slow_snapshot(3000)).await;
    client.wait_for_status(&task_id, "running").await;

    let response = client.cancel_task(&task_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["cancellation_requested"], true);

    let task = client.wait_for_status(&task_id, "cancelled").await;
    assert!(task["completed_at"].is_string());

    let history: Vec<Value> = client.get_history(AGENT_ID, &[]).await.json().await.unwrap();
    assert!(history.is_empty());

    // Repeating the request is a no-op
    let response = client.cancel_task(&task_id).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cancel_queued_task_never_runs() {
    let server = TestServer::spawn_with(|settings| settings.worker.count = 1).await;
    let client = TestClient::new(server.base_url.clone());

    // Keep the only worker busy
    let blocker = client.submit_ok(slow_snapshot(1000)).await;
    client.wait_for_status(&blocker, "running").await;

    let queued = client.submit_ok(slow_snapshot(0)).await;
    let response = client.cancel_task(&queued).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "cancelled");
    assert!(body["started_at"].is_null());

    client.wait_for_status(&blocker, "completed").await;
    let task: Value = client.get_task(&queued).await.json().await.unwrap();
    assert_eq!(task["status"], "cancelled");
    assert!(task["started_at"].is_null());
}

#[tokio::test]
async fn test_cancel_completed_task_conflicts() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let task_id = client
        .submit_ok(json!({
            "owner_id": AGENT_ID,
            "task_type": SNAPSHOT_TASK,
            "params": {"readings": [1.0]},
        }))
        .await;
    client.wait_for_status(&task_id, "completed").await;

    let response = client.cancel_task(&task_id).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let task: Value = client.get_task(&task_id).await.json().await.unwrap();
    assert_eq!(task["status"], "completed");
}

#[tokio::test]
async fn test_high_priority_runs_first() {
    let server = TestServer::spawn_with(|settings| settings.worker.count = 1).await;
    let client = TestClient::new(server.base_url.clone());

    let blocker = client.submit_ok(slow_snapshot(500)).await;
    client.wait_for_status(&blocker, "running").await;

    let low = client.submit_ok(snapshot_with_priority("low")).await;
    let normal = client.submit_ok(snapshot_with_priority("normal")).await;
    let high = client.submit_ok(snapshot_with_priority("high")).await;

    let started_at = |task: &Value| {
        DateTime::parse_from_rfc3339(task["started_at"].as_str().unwrap()).unwrap()
    };
    let low_task = client.wait_for_status(&low, "completed").await;
    let normal_task = client.wait_for_status(&normal, "completed").await;
    let high_task = client.wait_for_status(&high, "completed").await;

    assert!(started_at(&high_task) <= started_at(&normal_task));
    assert!(started_at(&normal_task) <= started_at(&low_task));
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let invalid = [
        json!({"owner_id": "", "task_type": SNAPSHOT_TASK, "params": {"readings": [1.0]}}),
        json!({"owner_id": AGENT_ID, "task_type": "unknown", "params": {}}),
        json!({"owner_id": AGENT_ID, "task_type": SNAPSHOT_TASK, "params": {"readings": []}}),
        json!({
            "owner_id": AGENT_ID,
            "task_type": SNAPSHOT_TASK,
            "params": {"readings": [1.0]},
            "webhook_url": "not a url",
        }),
        json!({"task_type": SNAPSHOT_TASK}),
    ];
    for body in invalid {
        let response = client.submit(body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "accepted {}", body);
    }

    let queue: Value = client.get_queue().await.json().await.unwrap();
    assert_eq!(queue["total"], 0);
    assert_eq!(queue["tasks"], json!({}));
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    assert_eq!(
        client.get_task("agent-task-does-not-exist").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        client.cancel_task("agent-task-does-not-exist").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_out_of_range_measurement_fails_task() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let task_id = client
        .submit_ok(json!({
            "owner_id": AGENT_ID,
            "task_type": SNAPSHOT_TASK,
            "params": {"readings": [120.0]},
        }))
        .await;

    let task = client.wait_for_status(&task_id, "failed").await;
    assert!(task["error"].as_str().unwrap().contains("percentage"));
    let history: Vec<Value> = client.get_history(AGENT_ID, &[]).await.json().await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_history_limit_and_order() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    for value in [10.0, 20.0, 30.0] {
        let task_id = client
            .submit_ok(json!({
                "owner_id": AGENT_ID,
                "task_type": SNAPSHOT_TASK,
                "params": {"readings": [value]},
            }))
            .await;
        // Sequential so timestamps are ordered
        client.wait_for_status(&task_id, "completed").await;
    }

    let history: Vec<Value> = client
        .get_history(AGENT_ID, &[("limit", "2")])
        .await
        .json()
        .await
        .unwrap();
    let percentages: Vec<f64> = history
        .iter()
        .map(|r| r["percentage"].as_f64().unwrap())
        .collect();
    assert_eq!(percentages, vec![30.0, 20.0]);

    let other: Vec<Value> = client
        .get_history("someone-else", &[])
        .await
        .json()
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn test_metrics_endpoint_reports_tasks() {
    agent_task_server::server::metrics::init_metrics();
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let task_id = client.submit_ok(slow_snapshot(0)).await;
    client.wait_for_status(&task_id, "completed").await;

    let response = client.get_metrics().await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = response.text().await.unwrap();
    assert!(text.contains("agent_tasks_submitted_total"));
}
