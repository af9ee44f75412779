use crate::error::{TaskError, TaskResult};
use crate::history::HistoryStore;
use crate::task_store::TaskStore;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How a work unit finished. The worker maps each variant to a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    Completed(JsonValue),
    Failed(String),
    /// The unit gave up on its own deadline. The worker's timer also produces
    /// this status when the unit overruns the task budget.
    TimedOut,
    /// The unit observed `cancellation_requested()` and stopped.
    Cancelled,
}

impl WorkOutcome {
    pub fn failed(reason: impl fmt::Display) -> Self {
        WorkOutcome::Failed(reason.to_string())
    }
}

/// Handle given to a running work unit.
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    owner_id: String,
    task_store: Arc<dyn TaskStore>,
    history: Arc<dyn HistoryStore>,
    shutdown: CancellationToken,
}

impl TaskContext {
    pub fn new(
        task_id: impl Into<String>,
        owner_id: impl Into<String>,
        task_store: Arc<dyn TaskStore>,
        history: Arc<dyn HistoryStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            owner_id: owner_id.into(),
            task_store,
            history,
            shutdown,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Persists progress immediately. Values above 100 are clamped and a value
    /// lower than the stored one leaves it unchanged.
    pub fn report_progress(&self, percentage: u8) -> TaskResult<()> {
        self.task_store
            .update_progress(&self.task_id, percentage.min(100))
            .map_err(TaskError::backend)?;
        Ok(())
    }

    /// Reads the cancellation flag from the store. A read failure is logged
    /// and treated as "not requested".
    pub fn cancellation_requested(&self) -> bool {
        match self.task_store.is_cancellation_requested(&self.task_id) {
            Ok(requested) => requested,
            Err(e) => {
                warn!(task_id = %self.task_id, "Failed to read cancellation flag: {:#}", e);
                false
            }
        }
    }

    /// True once the worker pool is stopping.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }
}

/// A domain computation executed by the workers.
#[async_trait]
pub trait WorkUnit: Send + Sync {
    /// Submission `task_type` this unit handles.
    fn task_type(&self) -> &'static str;

    /// Checks submitted parameters before a task is accepted.
    fn validate_params(&self, _params: &JsonValue) -> Result<(), String> {
        Ok(())
    }

    async fn execute(&self, ctx: &TaskContext, params: JsonValue) -> WorkOutcome;
}

#[derive(Default)]
pub struct WorkUnitRegistry {
    units: HashMap<&'static str, Arc<dyn WorkUnit>>,
}

impl WorkUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, unit: Arc<dyn WorkUnit>) -> TaskResult<()> {
        let task_type = unit.task_type();
        if self.units.contains_key(task_type) {
            return Err(TaskError::Validation(format!(
                "work unit for task type '{}' already registered",
                task_type
            )));
        }
        self.units.insert(task_type, unit);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn WorkUnit>> {
        self.units.get(task_type)
    }

    pub fn task_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.units.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
