//! Signed, retried webhook delivery.

use super::retry_policy::RetryPolicy;
use super::signature::{canonical_json, sign, SIGNATURE_HEADER};
use crate::config::WebhookSettings;
use crate::server::metrics;
use crate::task_store::{TaskRecord, TaskStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Body posted to a task's webhook URL once it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub task_id: String,
    /// The owner of the task.
    pub agent_id: String,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WebhookPayload {
    pub fn from_record(record: &TaskRecord) -> Self {
        WebhookPayload {
            task_id: record.task_id.clone(),
            agent_id: record.owner_id.clone(),
            status: record.status,
            result: record.result.clone(),
            completed_at: record.completed_at,
        }
    }
}

/// What happened during one `deliver` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub delivered: bool,
    pub attempts: u32,
    /// Waits performed between attempts, in order.
    pub backoffs: Vec<Duration>,
    pub last_status: Option<u16>,
}

enum AttemptOutcome {
    Delivered(StatusCode),
    /// Non-retryable response, e.g. 4xx.
    Rejected(StatusCode),
    /// 5xx, connection failure or timeout.
    Transient(String, Option<StatusCode>),
}

#[derive(Clone)]
pub struct WebhookDeliveryService {
    client: Client,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl WebhookDeliveryService {
    pub fn new(settings: &WebhookSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("agent-task-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self::with_client(
            client,
            RetryPolicy::new(settings),
            settings.attempt_timeout(),
        ))
    }

    pub fn with_client(client: Client, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        WebhookDeliveryService {
            client,
            policy,
            attempt_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Posts `payload` to `url`. Returns true on a 2xx response.
    ///
    /// Never fails: every error ends up logged and reported as false.
    pub async fn deliver<T: Serialize>(&self, url: &str, payload: &T, secret: Option<&str>) -> bool {
        self.deliver_with_report(url, payload, secret)
            .await
            .delivered
    }

    pub async fn deliver_with_report<T: Serialize>(
        &self,
        url: &str,
        payload: &T,
        secret: Option<&str>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let url = match Url::parse(url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                warn!("Webhook URL {} has unsupported scheme, not delivering", url);
                metrics::record_webhook_delivery("invalid", 0);
                return report;
            }
            Err(e) => {
                warn!("Invalid webhook URL {:?}: {}", url, e);
                metrics::record_webhook_delivery("invalid", 0);
                return report;
            }
        };

        let body = match canonical_json(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode webhook payload for {}: {}", url, e);
                metrics::record_webhook_delivery("invalid", 0);
                return report;
            }
        };
        let signature = secret.map(|secret| sign(secret, body.as_bytes()));

        for retry_index in 0..self.policy.max_attempts {
            report.attempts += 1;
            match self.attempt(&url, &body, signature.as_deref()).await {
                AttemptOutcome::Delivered(status) => {
                    debug!(
                        attempt = report.attempts,
                        "Webhook delivered to {} ({})", url, status
                    );
                    report.delivered = true;
                    report.last_status = Some(status.as_u16());
                    break;
                }
                AttemptOutcome::Rejected(status) => {
                    warn!(
                        attempt = report.attempts,
                        "Webhook rejected by {} with {}, not retrying", url, status
                    );
                    report.last_status = Some(status.as_u16());
                    break;
                }
                AttemptOutcome::Transient(reason, status) => {
                    report.last_status = status.map(|s| s.as_u16());
                    if !self.policy.has_next_attempt(retry_index) {
                        warn!(
                            attempt = report.attempts,
                            "Webhook delivery to {} failed: {}, giving up", url, reason
                        );
                        break;
                    }
                    let backoff = self.policy.backoff(retry_index);
                    info!(
                        attempt = report.attempts,
                        "Webhook delivery to {} failed: {}, retrying in {:?}", url, reason, backoff
                    );
                    report.backoffs.push(backoff);
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        let outcome = if report.delivered {
            "delivered"
        } else if report.last_status.is_some_and(|s| (400..500).contains(&s)) {
            "rejected"
        } else {
            "failed"
        };
        metrics::record_webhook_delivery(outcome, report.attempts);
        report
    }

    async fn attempt(&self, url: &Url, body: &str, signature: Option<&str>) -> AttemptOutcome {
        let mut request = self
            .client
            .post(url.clone())
            .timeout(self.attempt_timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_owned());
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    AttemptOutcome::Delivered(status)
                } else if status.is_server_error() {
                    AttemptOutcome::Transient(format!("HTTP {}", status), Some(status))
                } else {
                    AttemptOutcome::Rejected(status)
                }
            }
            Err(e) if e.is_timeout() => AttemptOutcome::Transient(
                format!("timed out after {:?}", self.attempt_timeout),
                None,
            ),
            Err(e) => AttemptOutcome::Transient(e.to_string(), None),
        }
    }
}
