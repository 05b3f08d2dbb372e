//! Liveness monitoring - stall and overrun detection for in-flight tasks.
//!
//! The monitor keeps its own mirrored, simplified view of the task
//! graph so that diagnosing why something is stuck never requires the
//! scheduler to expose internal state. It tracks wall-clock start and
//! last-progress times per task, flags tasks that exceed an absolute
//! timeout or an idle-progress timeout, and scans its diagnostic
//! dependency graph for cycles and blocked tasks.

#![warn(missing_docs)]

mod graph;
mod monitor;

pub use graph::{BlockReason, BlockedTask};
pub use monitor::{LivenessMonitor, MonitorConfig, MonitorStatus, TaskHealth};
