//! Agent Task Server Library
//!
//! Background task processing: a priority queue, a persisted task state
//! machine, a worker pool, signed webhook delivery and a measurement
//! history, exposed over HTTP.

pub mod config;
pub mod error;
pub mod history;
pub mod job_queue;
pub mod server;
pub mod service;
pub mod sqlite_persistence;
pub mod task_store;
pub mod webhook;
pub mod work_units;
pub mod worker;

// Re-export commonly used types for convenience
pub use error::{TaskError, TaskResult};
pub use server::{run_server, RequestsLoggingLevel};
pub use service::{SubmitTask, Submission, TaskService};
pub use task_store::{TaskPriority, TaskRecord, TaskStatus};
