use super::delivery::{WebhookDeliveryService, WebhookPayload};
use crate::task_store::TaskRecord;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Fire-and-forget delivery of terminal task notifications.
///
/// Deliveries run on their own tasks so a slow endpoint never holds up a
/// worker. Their outcome is logged and never touches the task record.
#[derive(Clone)]
pub struct WebhookNotifier {
    delivery: WebhookDeliveryService,
    secret: Option<String>,
    tracker: TaskTracker,
}

impl WebhookNotifier {
    pub fn new(delivery: WebhookDeliveryService, secret: Option<String>) -> Self {
        WebhookNotifier {
            delivery,
            secret,
            tracker: TaskTracker::new(),
        }
    }

    /// Schedules a delivery if the record carries a webhook URL.
    pub fn notify(&self, record: &TaskRecord) {
        let Some(url) = record.webhook_url.clone() else {
            return;
        };
        let payload = WebhookPayload::from_record(record);
        let delivery = self.delivery.clone();
        let secret = self.secret.clone();

        self.tracker.spawn(async move {
            let delivered = delivery.deliver(&url, &payload, secret.as_deref()).await;
            if delivered {
                debug!(task_id = %payload.task_id, "Webhook notification delivered");
            } else {
                warn!(task_id = %payload.task_id, "Webhook notification to {} not delivered", url);
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits up to `grace` for pending deliveries. Returns false on timeout.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                "{} webhook deliveries still pending after {:?}",
                self.tracker.len(),
                grace
            );
        }
        drained
    }
}
