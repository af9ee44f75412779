use super::task_worker::{TaskWorker, WorkerDeps};
use crate::config::WorkerSettings;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A fixed set of workers sharing one queue and one stop signal.
pub struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    /// Spawns `settings.count` workers named `worker-0..n`.
    pub fn start(deps: Arc<WorkerDeps>, settings: &WorkerSettings, shutdown: CancellationToken) -> Self {
        let handles = (0..settings.count)
            .map(|i| {
                let worker = TaskWorker::new(format!("worker-{}", i), deps.clone(), settings.clone());
                let id = worker.id().to_string();
                (id, worker.spawn(shutdown.clone()))
            })
            .collect::<Vec<_>>();
        info!("Started {} task workers", handles.len());
        WorkerPool { shutdown, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signals every worker to stop after its current step.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Stops the pool and waits up to `grace` for the workers to exit.
    pub async fn join(self, grace: Duration) {
        self.stop();
        let waits = self.handles.into_iter().map(|(id, handle)| async move {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(worker_id = %id, "Worker task ended abnormally: {}", e),
                Err(_) => warn!(worker_id = %id, "Worker did not stop within {:?}", grace),
            }
        });
        join_all(waits).await;
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::SqliteHistoryStore;
    use crate::job_queue::{SqliteQueueBackend, TaskQueue};
    use crate::task_store::{SqliteTaskStore, TaskPriority, TaskRecord, TaskStatus, TaskStore};
    use crate::webhook::{RetryPolicy, WebhookDeliveryService, WebhookNotifier};
    use crate::worker::{TaskContext, WorkOutcome, WorkUnit, WorkUnitRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};

    struct Nap;

    #[async_trait]
    impl WorkUnit for Nap {
        fn task_type(&self) -> &'static str {
            "nap"
        }

        async fn execute(&self, _ctx: &TaskContext, _params: JsonValue) -> WorkOutcome {
            tokio::time::sleep(Duration::from_millis(200)).await;
            WorkOutcome::Completed(json!(null))
        }
    }

    #[tokio::test]
    async fn test_pool_runs_tasks_concurrently() {
        let mut registry = WorkUnitRegistry::new();
        registry.register(Arc::new(Nap)).unwrap();
        let store = Arc::new(SqliteTaskStore::in_memory().unwrap());
        let deps = Arc::new(WorkerDeps {
            queue: Arc::new(TaskQueue::new(
                Arc::new(SqliteQueueBackend::in_memory().unwrap()),
                "pool",
            )),
            task_store: store.clone(),
            history: Arc::new(SqliteHistoryStore::in_memory().unwrap()),
            registry: Arc::new(registry),
            notifier: WebhookNotifier::new(
                WebhookDeliveryService::with_client(
                    reqwest::Client::new(),
                    RetryPolicy::default(),
                    Duration::from_secs(1),
                ),
                None,
            ),
        });

        let ids: Vec<String> = (0..4).map(|i| format!("nap-{}", i)).collect();
        for id in &ids {
            store
                .insert(&TaskRecord::new_pending(
                    id.clone(),
                    "agent-1".into(),
                    "nap".into(),
                    json!({}),
                    TaskPriority::Normal,
                    None,
                ))
                .unwrap();
            deps.queue
                .enqueue(id, "nap", json!({}), TaskPriority::Normal)
                .unwrap();
        }

        let settings = WorkerSettings {
            count: 4,
            idle_poll_ms: 10,
            backend_retry_ms: 10,
            task_timeout_sec: 5,
            heartbeat_interval_sec: 1,
        };
        let started = std::time::Instant::now();
        let pool = WorkerPool::start(deps, &settings, CancellationToken::new());
        assert_eq!(pool.len(), 4);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !ids
                .iter()
                .all(|id| store.get(id).unwrap().unwrap().status == TaskStatus::Completed)
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        // Four 200ms naps on four workers finish well under the serial time
        assert!(started.elapsed() < Duration::from_millis(750));

        pool.join(Duration::from_secs(2)).await;
    }
}
