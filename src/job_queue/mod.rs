//! Priority job queue with high, medium and low lanes.

mod backend;
mod facade;
mod priority_queue;
mod schema;

pub use backend::{QueueBackend, SqliteQueueBackend};
pub use facade::{QueueSizes, TaskQueue};
pub use priority_queue::{Lane, PriorityJobQueue, QueueEntry};
pub use schema::QUEUE_VERSIONED_SCHEMAS;
