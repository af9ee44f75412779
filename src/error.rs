use thiserror::Error;

use crate::task_store::TaskStatus;

/// Errors surfaced by the task service and the worker loop.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Bad input, rejected before anything is persisted.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {task_id} is not cancellable (status: {status})")]
    NotCancellable { task_id: String, status: TaskStatus },

    /// Queue or record store could not be reached. Retryable by the caller.
    #[error("backend unavailable: {0:#}")]
    BackendUnavailable(#[source] anyhow::Error),
}

impl TaskError {
    pub fn backend(err: anyhow::Error) -> Self {
        TaskError::BackendUnavailable(err)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::BackendUnavailable(_))
    }
}

pub type TaskResult<T> = std::result::Result<T, TaskError>;
