//! Three-lane priority queue over a `QueueBackend`.
//!
//! Lanes are drained strictly in order high, medium, low. Within a lane the
//! order is FIFO. Low lane entries can starve while higher lanes stay busy.

use super::backend::QueueBackend;
use crate::error::{TaskError, TaskResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    High,
    Medium,
    Low,
}

impl Lane {
    /// Lanes in dequeue order.
    pub const ALL: [Lane; 3] = [Lane::High, Lane::Medium, Lane::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::High => "high",
            Lane::Medium => "medium",
            Lane::Low => "low",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of queued work, serialized as JSON into the backend list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: String,
    /// Selects the work unit that handles this entry.
    pub command_id: String,
    pub payload: serde_json::Value,
    pub priority: Lane,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(
        job_id: impl Into<String>,
        command_id: impl Into<String>,
        payload: serde_json::Value,
        priority: Lane,
    ) -> Self {
        QueueEntry {
            job_id: job_id.into(),
            command_id: command_id.into(),
            payload,
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

pub struct PriorityJobQueue {
    backend: Arc<dyn QueueBackend>,
    key_prefix: String,
}

impl PriorityJobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self::with_key_prefix(backend, "queue")
    }

    /// Lane lists are stored under `<key_prefix>:<lane>`.
    pub fn with_key_prefix(backend: Arc<dyn QueueBackend>, key_prefix: impl Into<String>) -> Self {
        PriorityJobQueue {
            backend,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn lane_key(&self, lane: Lane) -> String {
        format!("{}:{}", self.key_prefix, lane)
    }

    /// Appends `entry` to the tail of `lane`. The entry's own `priority`
    /// field is overwritten with `lane`.
    pub fn enqueue(&self, lane: Lane, mut entry: QueueEntry) -> TaskResult<()> {
        entry.priority = lane;
        let raw = serde_json::to_string(&entry)
            .map_err(|e| TaskError::Validation(format!("unserializable queue entry: {}", e)))?;
        self.backend
            .push_back(&self.lane_key(lane), &raw)
            .map_err(TaskError::backend)
    }

    /// Pops the head of the highest non-empty lane. Malformed entries are
    /// logged and dropped.
    pub fn dequeue(&self) -> TaskResult<Option<QueueEntry>> {
        for lane in Lane::ALL {
            let key = self.lane_key(lane);
            while let Some(raw) = self.backend.pop_front(&key).map_err(TaskError::backend)? {
                match serde_json::from_str::<QueueEntry>(&raw) {
                    Ok(entry) => return Ok(Some(entry)),
                    Err(e) => {
                        warn!("Dropping malformed entry from lane {}: {}", lane, e);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Approximate, may be stale by the time the caller reads it.
    pub fn size(&self, lane: Lane) -> TaskResult<usize> {
        self.backend
            .len(&self.lane_key(lane))
            .map_err(TaskError::backend)
    }

    /// Best-effort removal by job id across all lanes.
    ///
    /// Returns false if no lane holds the job, including when a worker popped
    /// it between the scan and the delete.
    pub fn remove(&self, job_id: &str) -> TaskResult<bool> {
        for lane in Lane::ALL {
            let key = self.lane_key(lane);
            let entries = self.backend.entries(&key).map_err(TaskError::backend)?;
            for (entry_id, raw) in entries {
                let entry = match serde_json::from_str::<QueueEntry>(&raw) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Skipping malformed entry {} in lane {}: {}", entry_id, lane, e);
                        continue;
                    }
                };
                if entry.job_id == job_id
                    && self
                        .backend
                        .delete_entry(&key, entry_id)
                        .map_err(TaskError::backend)?
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
