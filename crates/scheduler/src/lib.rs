//! Task scheduling - admission, readiness, bounded concurrent execution.
//!
//! The scheduler owns the task registry and is the sole writer of task
//! status. Each tick it polls the liveness monitor for stuck tasks,
//! launches ready tasks up to the concurrency cap (asking the budget
//! ledger to approve estimated costs first), and reaps finished
//! executions. Handlers are pluggable async callables resolved by the
//! `task_type` key.

#![warn(missing_docs)]

mod handler;
mod scheduler;
mod status;

pub use handler::{handler_fn, HandlerRegistry, TaskHandler};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError, StartBlock};
pub use status::{SystemStatus, TaskSnapshot};
