//! Foreman core data models.
//!
//! This crate defines the fundamental data structures shared by the
//! scheduler, the budget ledger, and the liveness monitor.

#![warn(missing_docs)]

mod cost;
mod id;
mod task;

pub use cost::{CostCategory, CostEntry, UnknownCategory};
pub use id::TaskId;
pub use task::{SpecError, Task, TaskPriority, TaskSpec, TaskStatus};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
