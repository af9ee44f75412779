//! Durable task records and the task lifecycle state machine.

mod models;
mod schema;
mod store;

pub use models::{Completion, TaskPriority, TaskRecord, TaskStatus};
pub use schema::TASKS_VERSIONED_SCHEMAS;
pub use store::{SqliteTaskStore, TaskStore};
