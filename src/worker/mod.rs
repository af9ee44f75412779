//! Task execution: work units, the worker loop, the pool and the lease reaper.

mod pool;
mod reaper;
mod task_worker;
mod work_unit;

pub use pool::WorkerPool;
pub use reaper::{LeaseReaper, LEASE_EXPIRED_ERROR};
pub use task_worker::{Iteration, TaskWorker, WorkerDeps};
pub use work_unit::{TaskContext, WorkOutcome, WorkUnit, WorkUnitRegistry};
