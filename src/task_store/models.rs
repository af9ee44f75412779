//! Task record and lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed, // terminal
    Failed,    // terminal
    Timeout,   // terminal
    Cancelled, // terminal
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Timeout,
        TaskStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running)
            | (TaskStatus::Pending, TaskStatus::Cancelled) => true,
            (TaskStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "timeout" => Some(TaskStatus::Timeout),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission priority. Maps onto the queue lanes high/medium/low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "high" => Some(TaskPriority::High),
            "normal" => Some(TaskPriority::Normal),
            "low" => Some(TaskPriority::Low),
            _ => None,
        }
    }
}

/// Durable record of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub owner_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_percentage: u8,
    pub cancellation_requested: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub webhook_url: Option<String>,
    /// Worker currently holding the lease, set on claim.
    pub worker_id: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new_pending(
        task_id: String,
        owner_id: String,
        task_type: String,
        params: serde_json::Value,
        priority: TaskPriority,
        webhook_url: Option<String>,
    ) -> Self {
        TaskRecord {
            task_id,
            owner_id,
            task_type,
            status: TaskStatus::Pending,
            priority,
            params,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress_percentage: 0,
            cancellation_requested: false,
            result: None,
            error: None,
            webhook_url,
            worker_id: None,
            heartbeat_at: None,
        }
    }
}

/// Terminal outcome written by `TaskStore::finish`.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Completion {
    pub fn completed(result: serde_json::Value) -> Self {
        Completion {
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Completion {
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn timed_out(timeout_secs: u64) -> Self {
        Completion {
            status: TaskStatus::Timeout,
            result: None,
            error: Some(format!("timeout after {}s", timeout_secs)),
        }
    }

    pub fn cancelled() -> Self {
        Completion {
            status: TaskStatus::Cancelled,
            result: None,
            error: None,
        }
    }
}
