//! HTTP client for end-to-end tests
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub async fn submit(&self, body: Value) -> Response {
        self.client
            .post(format!("{}/v1/tasks", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("Submit request failed")
    }

    pub async fn submit_snapshot(&self, readings: &[f64]) -> Response {
        self.submit(json!({
            "owner_id": AGENT_ID,
            "task_type": SNAPSHOT_TASK,
            "params": {"readings": readings},
        }))
        .await
    }

    /// Submits and returns the new task id, asserting 202.
    pub async fn submit_ok(&self, body: Value) -> String {
        let response = self.submit(body).await;
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        let body: Value = response.json().await.expect("Invalid submission body");
        body["task_id"]
            .as_str()
            .expect("Missing task_id")
            .to_string()
    }

    pub async fn get_task(&self, task_id: &str) -> Response {
        self.client
            .get(format!("{}/v1/tasks/{}", self.base_url, task_id))
            .send()
            .await
            .expect("Get task request failed")
    }

    pub async fn cancel_task(&self, task_id: &str) -> Response {
        self.client
            .post(format!("{}/v1/tasks/{}/cancel", self.base_url, task_id))
            .send()
            .await
            .expect("Cancel request failed")
    }

    /// Polls the task until its status equals `status`, returning the snapshot.
    pub async fn wait_for_status(&self, task_id: &str, status: &str) -> Value {
        let start = std::time::Instant::now();
        loop {
            let body: Value = self
                .get_task(task_id)
                .await
                .json()
                .await
                .expect("Invalid task body");
            if body["status"] == status {
                return body;
            }
            if start.elapsed() > Duration::from_millis(STATUS_WAIT_TIMEOUT_MS) {
                panic!("Task {} never reached {}, last seen {}", task_id, status, body);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // ========================================================================
    // Queue and history
    // ========================================================================

    pub async fn get_queue(&self) -> Response {
        self.client
            .get(format!("{}/v1/queue", self.base_url))
            .send()
            .await
            .expect("Queue request failed")
    }

    pub async fn get_history(&self, owner_id: &str, query: &[(&str, &str)]) -> Response {
        self.client
            .get(format!("{}/v1/history/{}", self.base_url, owner_id))
            .query(query)
            .send()
            .await
            .expect("History request failed")
    }

    pub async fn get_metrics(&self) -> Response {
        self.client
            .get(format!("{}/metrics", self.base_url))
            .send()
            .await
            .expect("Metrics request failed")
    }
}
