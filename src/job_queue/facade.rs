use super::backend::QueueBackend;
use super::priority_queue::{Lane, PriorityJobQueue, QueueEntry};
use crate::error::TaskResult;
use crate::task_store::TaskPriority;
use serde::Serialize;
use std::sync::Arc;

impl From<TaskPriority> for Lane {
    fn from(priority: TaskPriority) -> Self {
        match priority {
            TaskPriority::High => Lane::High,
            TaskPriority::Normal => Lane::Medium,
            TaskPriority::Low => Lane::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSizes {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl QueueSizes {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }

    pub fn get(&self, lane: Lane) -> usize {
        match lane {
            Lane::High => self.high,
            Lane::Medium => self.medium,
            Lane::Low => self.low,
        }
    }
}

/// Task-family view of a `PriorityJobQueue`.
///
/// Lane keys are prefixed with `<namespace>:queue`, so producers of unrelated
/// job families can share one backend.
pub struct TaskQueue {
    namespace: String,
    queue: PriorityJobQueue,
}

impl TaskQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let queue = PriorityJobQueue::with_key_prefix(backend, format!("{}:queue", namespace));
        TaskQueue { namespace, queue }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn enqueue(
        &self,
        task_id: &str,
        task_type: &str,
        payload: serde_json::Value,
        priority: TaskPriority,
    ) -> TaskResult<()> {
        let lane = Lane::from(priority);
        self.queue
            .enqueue(lane, QueueEntry::new(task_id, task_type, payload, lane))
    }

    pub fn dequeue(&self) -> TaskResult<Option<QueueEntry>> {
        self.queue.dequeue()
    }

    pub fn remove(&self, task_id: &str) -> TaskResult<bool> {
        self.queue.remove(task_id)
    }

    pub fn sizes(&self) -> TaskResult<QueueSizes> {
        Ok(QueueSizes {
            high: self.queue.size(Lane::High)?,
            medium: self.queue.size(Lane::Medium)?,
            low: self.queue.size(Lane::Low)?,
        })
    }

    /// Rough count of tasks ahead of a new task at `priority`: every task in
    /// higher lanes plus half of its own lane. Diagnostic only.
    pub fn estimated_position(&self, priority: TaskPriority) -> TaskResult<usize> {
        let sizes = self.sizes()?;
        let own = Lane::from(priority);
        let ahead: usize = Lane::ALL
            .iter()
            .take_while(|lane| **lane != own)
            .map(|lane| sizes.get(*lane))
            .sum();
        Ok(ahead + sizes.get(own) / 2)
    }
}
