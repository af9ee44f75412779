//! The per-worker processing loop.
//!
//! Each iteration dequeues at most one task, claims it, races the work unit
//! against the task timeout, records the terminal status and hands the
//! record to the webhook notifier. The timer is authoritative: when it fires
//! the work unit future is dropped and its eventual result is never seen.

use super::work_unit::{TaskContext, WorkOutcome, WorkUnitRegistry};
use crate::config::WorkerSettings;
use crate::error::{TaskError, TaskResult};
use crate::history::HistoryStore;
use crate::job_queue::{QueueEntry, TaskQueue};
use crate::server::metrics;
use crate::task_store::{Completion, TaskRecord, TaskStatus, TaskStore};
use crate::webhook::WebhookNotifier;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared collaborators of every worker in a pool.
pub struct WorkerDeps {
    pub queue: Arc<TaskQueue>,
    pub task_store: Arc<dyn TaskStore>,
    pub history: Arc<dyn HistoryStore>,
    pub registry: Arc<WorkUnitRegistry>,
    pub notifier: WebhookNotifier,
}

/// Result of one loop iteration that dequeued something.
#[derive(Debug, Clone, PartialEq)]
pub enum Iteration {
    /// The task reached a terminal status.
    Finished { task_id: String, status: TaskStatus },
    /// The entry had no usable pending record and was discarded.
    Dropped { task_id: String },
    /// The worker was stopped mid-execution. The record is left as it was.
    Interrupted { task_id: String },
}

pub struct TaskWorker {
    id: String,
    deps: Arc<WorkerDeps>,
    settings: WorkerSettings,
}

impl TaskWorker {
    pub fn new(id: impl Into<String>, deps: Arc<WorkerDeps>, settings: WorkerSettings) -> Self {
        TaskWorker {
            id: id.into(),
            deps,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Runs until `shutdown` is cancelled. Never returns early on errors.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.id,
            "Worker starting (idle_poll={}ms, task_timeout={}s)",
            self.settings.idle_poll_ms,
            self.settings.task_timeout_sec
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let pause = match self.run_once(&shutdown).await {
                Ok(Some(Iteration::Interrupted { .. })) => break,
                Ok(Some(_)) => None,
                Ok(None) => Some(self.settings.idle_poll()),
                Err(e) => {
                    error!(worker_id = %self.id, "Worker iteration failed: {}", e);
                    metrics::record_worker_backend_error();
                    Some(self.settings.backend_retry())
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes at most one queued task. `Ok(None)` means the queue was empty.
    pub async fn run_once(&self, shutdown: &CancellationToken) -> TaskResult<Option<Iteration>> {
        let Some(entry) = self.deps.queue.dequeue()? else {
            return Ok(None);
        };
        self.process(entry, shutdown).await.map(Some)
    }

    async fn process(&self, entry: QueueEntry, shutdown: &CancellationToken) -> TaskResult<Iteration> {
        let task_id = entry.job_id;
        let store = &self.deps.task_store;

        let Some(record) = store.get(&task_id).map_err(TaskError::backend)? else {
            warn!(worker_id = %self.id, task_id = %task_id, "Dequeued task has no record, dropping");
            return Ok(Iteration::Dropped { task_id });
        };
        if record.status != TaskStatus::Pending {
            warn!(
                worker_id = %self.id,
                task_id = %task_id,
                "Dequeued task is {}, not pending, dropping",
                record.status
            );
            return Ok(Iteration::Dropped { task_id });
        }
        if record.task_type != entry.command_id {
            debug!(
                task_id = %task_id,
                "Queue entry command {} differs from record type {}, using the record",
                entry.command_id,
                record.task_type
            );
        }

        if entry.payload != record.params {
            warn!(
                worker_id = %self.id,
                task_id = %task_id,
                "Queue entry payload differs from the stored params, running the payload"
            );
        }

        if !store
            .claim(&task_id, &self.id, Utc::now())
            .map_err(TaskError::backend)?
        {
            return self.resolve_unclaimable(&record).await;
        }
        let _running = metrics::track_running_task();
        info!(worker_id = %self.id, task_id = %task_id, task_type = %record.task_type, "Task claimed");

        let started = Instant::now();
        let completion = match self.execute(&record, entry.payload, shutdown).await {
            Some(completion) => completion,
            None => {
                info!(
                    worker_id = %self.id,
                    task_id = %task_id,
                    "Worker stopping, leaving running task for the lease reaper"
                );
                return Ok(Iteration::Interrupted { task_id });
            }
        };

        let status = completion.status;
        let recorded = store
            .finish(&task_id, &completion, Utc::now())
            .map_err(TaskError::backend)?;
        metrics::record_task_finished(&record.task_type, status, Some(started.elapsed()));
        if !recorded {
            warn!(
                worker_id = %self.id,
                task_id = %task_id,
                "Task was finalized elsewhere before {} could be recorded",
                status
            );
        }

        let final_record = store.get(&task_id).map_err(TaskError::backend)?;
        let final_status = final_record.as_ref().map(|r| r.status).unwrap_or(status);
        if recorded {
            if let Some(record) = &final_record {
                self.deps.notifier.notify(record);
            }
        }
        info!(
            worker_id = %self.id,
            task_id = %task_id,
            "Task finished with status {} after {:?}",
            final_status,
            started.elapsed()
        );
        Ok(Iteration::Finished {
            task_id,
            status: final_status,
        })
    }

    /// The conditional claim was refused. Cancels the task if that was
    /// because cancellation had been requested.
    async fn resolve_unclaimable(&self, record: &TaskRecord) -> TaskResult<Iteration> {
        let store = &self.deps.task_store;
        let task_id = record.task_id.clone();

        let requested = store
            .is_cancellation_requested(&task_id)
            .map_err(TaskError::backend)?;
        if requested && store.cancel_pending(&task_id, Utc::now()).map_err(TaskError::backend)? {
            info!(worker_id = %self.id, task_id = %task_id, "Task cancelled before it started");
            metrics::record_task_finished(&record.task_type, TaskStatus::Cancelled, None);
            if let Some(cancelled) = store.get(&task_id).map_err(TaskError::backend)? {
                self.deps.notifier.notify(&cancelled);
            }
            return Ok(Iteration::Finished {
                task_id,
                status: TaskStatus::Cancelled,
            });
        }

        warn!(worker_id = %self.id, task_id = %task_id, "Task could not be claimed, dropping");
        Ok(Iteration::Dropped { task_id })
    }

    /// Runs the work unit under the task timeout while renewing the lease.
    /// Returns None if the worker was stopped first.
    async fn execute(
        &self,
        record: &TaskRecord,
        params: serde_json::Value,
        shutdown: &CancellationToken,
    ) -> Option<Completion> {
        let Some(unit) = self.deps.registry.get(&record.task_type).cloned() else {
            warn!(task_id = %record.task_id, "No work unit registered for {}", record.task_type);
            return Some(Completion::failed(format!(
                "no work unit registered for task type '{}'",
                record.task_type
            )));
        };

        let ctx = TaskContext::new(
            record.task_id.clone(),
            record.owner_id.clone(),
            self.deps.task_store.clone(),
            self.deps.history.clone(),
            shutdown.clone(),
        );
        let timeout = self.settings.task_timeout();
        let execution = tokio::time::timeout(timeout, unit.execute(&ctx, params));
        tokio::pin!(execution);

        let interval = self.settings.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                result = &mut execution => break result,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.deps.task_store.heartbeat(&record.task_id, &self.id, Utc::now()) {
                        warn!(task_id = %record.task_id, "Failed to renew lease: {:#}", e);
                    }
                }
            }
        };

        Some(match result {
            Err(_elapsed) => {
                warn!(task_id = %record.task_id, "Task exceeded its {:?} budget", timeout);
                Completion::timed_out(self.settings.task_timeout_sec)
            }
            Ok(WorkOutcome::Completed(value)) => Completion::completed(value),
            Ok(WorkOutcome::Failed(reason)) => Completion::failed(reason),
            Ok(WorkOutcome::TimedOut) => Completion::timed_out(self.settings.task_timeout_sec),
            Ok(WorkOutcome::Cancelled) => Completion::cancelled(),
        })
    }
}
