//! Submission, status and cancellation of background tasks, plus the
//! lifecycle of the workers that run them.

use crate::config::{AppConfig, ServiceSettings};
use crate::error::{TaskError, TaskResult};
use crate::history::{HistoryQuery, HistoryRecord, HistoryStore, SqliteHistoryStore};
use crate::job_queue::{QueueBackend, QueueSizes, SqliteQueueBackend, TaskQueue};
use crate::server::metrics;
use crate::task_store::{Completion, SqliteTaskStore, TaskPriority, TaskRecord, TaskStatus, TaskStore};
use crate::webhook::{WebhookDeliveryService, WebhookNotifier};
use crate::worker::{LeaseReaper, WorkerDeps, WorkerPool, WorkUnitRegistry};
use anyhow::Context;
use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const WORKER_JOIN_GRACE: Duration = Duration::from_secs(30);
const WEBHOOK_DRAIN_GRACE: Duration = Duration::from_secs(30);

/// A task submission as accepted by `TaskService::enqueue`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTask {
    pub owner_id: String,
    pub task_type: String,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
}

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub task_id: String,
    pub status: TaskStatus,
    /// Rough number of tasks ahead at submission time.
    pub estimated_position: usize,
}

struct Running {
    shutdown: CancellationToken,
    pool: WorkerPool,
    reaper: JoinHandle<()>,
}

pub struct TaskService {
    settings: ServiceSettings,
    task_store: Arc<dyn TaskStore>,
    history: Arc<dyn HistoryStore>,
    queue: Arc<TaskQueue>,
    registry: Arc<WorkUnitRegistry>,
    notifier: WebhookNotifier,
    running: Mutex<Option<Running>>,
}

impl TaskService {
    pub fn new(
        settings: ServiceSettings,
        task_store: Arc<dyn TaskStore>,
        queue_backend: Arc<dyn QueueBackend>,
        history: Arc<dyn HistoryStore>,
        registry: WorkUnitRegistry,
    ) -> anyhow::Result<Self> {
        let delivery = WebhookDeliveryService::new(&settings.webhook)?;
        let notifier = WebhookNotifier::new(delivery, settings.webhook.secret.clone());
        let queue = Arc::new(TaskQueue::new(queue_backend, settings.namespace.clone()));
        Ok(TaskService {
            settings,
            task_store,
            history,
            queue,
            registry: Arc::new(registry),
            notifier,
            running: Mutex::new(None),
        })
    }

    /// Opens the SQLite databases under `config.db_dir`.
    pub fn open(config: &AppConfig, registry: WorkUnitRegistry) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.db_dir)
            .with_context(|| format!("Failed to create db dir {:?}", config.db_dir))?;
        let task_store = SqliteTaskStore::new(config.tasks_db_path())?;
        let queue_backend = SqliteQueueBackend::new(config.queue_db_path())?;
        let history = SqliteHistoryStore::new(config.history_db_path())?;
        Self::new(
            config.service.clone(),
            Arc::new(task_store),
            Arc::new(queue_backend),
            Arc::new(history),
            registry,
        )
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn registry(&self) -> &WorkUnitRegistry {
        &self.registry
    }

    fn new_task_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.settings.namespace,
            self.settings.task_kind,
            Uuid::new_v4()
        )
    }

    fn validate(&self, submit: &SubmitTask) -> TaskResult<()> {
        if submit.owner_id.trim().is_empty() {
            return Err(TaskError::Validation("owner_id must not be empty".into()));
        }
        let Some(unit) = self.registry.get(&submit.task_type) else {
            return Err(TaskError::Validation(format!(
                "unknown task type '{}'",
                submit.task_type
            )));
        };
        if !submit.params.is_object() {
            return Err(TaskError::Validation("params must be a JSON object".into()));
        }
        if let Some(url) = &submit.webhook_url {
            match Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => {
                    return Err(TaskError::Validation(format!(
                        "webhook_url must be an http(s) URL, got '{}'",
                        url
                    )))
                }
            }
        }
        unit.validate_params(&submit.params)
            .map_err(TaskError::Validation)
    }

    /// Accepts a task: persists it as pending, then queues it.
    pub fn enqueue(&self, submit: SubmitTask) -> TaskResult<Submission> {
        self.validate(&submit)?;

        let task_id = self.new_task_id();
        let record = TaskRecord::new_pending(
            task_id.clone(),
            submit.owner_id,
            submit.task_type,
            submit.params,
            submit.priority,
            submit.webhook_url,
        );
        self.task_store.insert(&record).map_err(TaskError::backend)?;

        let estimated_position = self
            .queue
            .estimated_position(record.priority)
            .unwrap_or_else(|e| {
                warn!(task_id = %task_id, "Could not estimate queue position: {}", e);
                0
            });

        if let Err(e) = self.queue.enqueue(
            &task_id,
            &record.task_type,
            record.params.clone(),
            record.priority,
        )
        {
            warn!(task_id = %task_id, "Failed to queue task: {}", e);
            let completion = Completion::failed(e.to_string());
            let store = &self.task_store;
            if store.claim(&task_id, "submission", Utc::now()).unwrap_or(false) {
                if let Err(finish_err) = store.finish(&task_id, &completion, Utc::now()) {
                    warn!(task_id = %task_id, "Failed to mark unqueued task failed: {:#}", finish_err);
                }
            }
            return Err(e);
        }

        metrics::record_task_submitted(&record.task_type);
        info!(
            task_id = %task_id,
            task_type = %record.task_type,
            priority = record.priority.as_str(),
            "Task submitted"
        );
        Ok(Submission {
            task_id,
            status: TaskStatus::Pending,
            estimated_position,
        })
    }

    pub fn get(&self, task_id: &str) -> TaskResult<TaskRecord> {
        self.task_store
            .get(task_id)
            .map_err(TaskError::backend)?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    /// Requests cancellation of a task.
    ///
    /// Already cancelled tasks are returned unchanged. A pending task still
    /// in the queue is removed and cancelled right away. Otherwise only the
    /// flag is set and the worker honours it at claim time or cooperatively
    /// during execution.
    pub fn request_cancel(&self, task_id: &str) -> TaskResult<TaskRecord> {
        let record = self.get(task_id)?;
        match record.status {
            TaskStatus::Cancelled => return Ok(record),
            status if status.is_terminal() => {
                return Err(TaskError::NotCancellable {
                    task_id: task_id.to_string(),
                    status,
                })
            }
            _ => {}
        }

        let flagged = self
            .task_store
            .request_cancellation(task_id)
            .map_err(TaskError::backend)?;
        if !flagged {
            // Finished between the read and the update
            let current = self.get(task_id)?;
            return match current.status {
                TaskStatus::Cancelled => Ok(current),
                status => Err(TaskError::NotCancellable {
                    task_id: task_id.to_string(),
                    status,
                }),
            };
        }
        info!(task_id = %task_id, "Cancellation requested");

        if record.status == TaskStatus::Pending && self.queue.remove(task_id)? {
            let cancelled = self
                .task_store
                .cancel_pending(task_id, Utc::now())
                .map_err(TaskError::backend)?;
            if cancelled {
                metrics::record_task_finished(&record.task_type, TaskStatus::Cancelled, None);
                let current = self.get(task_id)?;
                self.notifier.notify(&current);
                return Ok(current);
            }
        }
        self.get(task_id)
    }

    pub fn queue_sizes(&self) -> TaskResult<QueueSizes> {
        let sizes = self.queue.sizes()?;
        metrics::record_queue_sizes(&sizes);
        Ok(sizes)
    }

    pub fn status_counts(&self) -> TaskResult<Vec<(TaskStatus, usize)>> {
        self.task_store.count_by_status().map_err(TaskError::backend)
    }

    pub fn history(&self, owner_id: &str, query: &HistoryQuery) -> TaskResult<Vec<HistoryRecord>> {
        self.history.query(owner_id, query)
    }

    /// Spawns the worker pool and the lease reaper. No-op if already running.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            warn!("Task service already started");
            return;
        }

        let shutdown = CancellationToken::new();
        let deps = Arc::new(WorkerDeps {
            queue: self.queue.clone(),
            task_store: self.task_store.clone(),
            history: self.history.clone(),
            registry: self.registry.clone(),
            notifier: self.notifier.clone(),
        });
        let pool = WorkerPool::start(deps, &self.settings.worker, shutdown.child_token());
        let reaper = LeaseReaper::new(
            self.task_store.clone(),
            self.notifier.clone(),
            self.settings.lease.clone(),
        )
        .spawn(shutdown.child_token());

        info!(
            "Task service started (namespace={}, workers={})",
            self.settings.namespace,
            pool.len()
        );
        *running = Some(Running {
            shutdown,
            pool,
            reaper,
        });
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    /// Stops workers and the reaper, then waits for pending webhooks.
    /// Tasks that were mid-execution stay `running`.
    pub async fn shutdown(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(running) = running else {
            return;
        };

        info!("Shutting down task service...");
        running.shutdown.cancel();
        running.pool.join(WORKER_JOIN_GRACE).await;
        let _ = tokio::time::timeout(WORKER_JOIN_GRACE, running.reaper).await;
        self.notifier.drain(WEBHOOK_DRAIN_GRACE).await;
        info!("Task service shutdown complete");
    }
}
