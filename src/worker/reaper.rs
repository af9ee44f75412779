//! Fails running tasks whose worker stopped renewing its lease.
//!
//! Tasks are never redelivered: a worker may have crashed after partial side
//! effects, so a lapsed lease always ends in `failed`.

use crate::config::LeaseSettings;
use crate::server::metrics;
use crate::task_store::{TaskRecord, TaskStatus, TaskStore};
use crate::webhook::WebhookNotifier;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const LEASE_EXPIRED_ERROR: &str = "worker lease expired";

pub struct LeaseReaper {
    task_store: Arc<dyn TaskStore>,
    notifier: WebhookNotifier,
    settings: LeaseSettings,
}

impl LeaseReaper {
    pub fn new(task_store: Arc<dyn TaskStore>, notifier: WebhookNotifier, settings: LeaseSettings) -> Self {
        LeaseReaper {
            task_store,
            notifier,
            settings,
        }
    }

    /// One sweep. Returns the records that were failed.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>> {
        let stale_after = chrono::Duration::from_std(self.settings.stale_after())?;
        let expired = self
            .task_store
            .fail_expired_leases(now - stale_after, now, LEASE_EXPIRED_ERROR)?;

        for record in &expired {
            warn!(
                task_id = %record.task_id,
                worker_id = record.worker_id.as_deref().unwrap_or("-"),
                "Lease expired, task marked failed"
            );
            metrics::record_task_finished(&record.task_type, TaskStatus::Failed, None);
            self.notifier.notify(record);
        }
        if !expired.is_empty() {
            metrics::record_leases_expired(expired.len());
        }
        Ok(expired)
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Sweeps at startup and then every reap interval until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Lease reaper starting (stale_after={}s, interval={}s)",
            self.settings.stale_after_sec, self.settings.reap_interval_sec
        );
        let mut ticker = tokio::time::interval(self.settings.reap_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(Utc::now()) {
                        error!("Lease sweep failed: {:#}", e);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("Lease reaper stopped");
    }
}
