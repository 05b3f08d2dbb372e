//! Read-only status snapshots, designed to be polled by dashboards.

use foreman_core::{Task, TaskId, TaskPriority, TaskStatus, Time};
use foreman_ledger::LedgerStatus;
use foreman_liveness::MonitorStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task id
    pub id: TaskId,
    /// Human-readable name
    pub name: String,
    /// Handler type key
    pub task_type: String,
    /// Current status
    pub status: TaskStatus,
    /// Scheduling priority
    pub priority: TaskPriority,
    /// Admission time
    pub created_at: Time,
    /// First launch time
    pub started_at: Option<Time>,
    /// Completion time
    pub completed_at: Option<Time>,
    /// Retries consumed
    pub retry_count: u32,
    /// Retry limit
    pub max_retries: u32,
    /// Estimated cost
    pub estimated_cost: f64,
    /// Cost actually committed
    pub actual_cost: f64,
    /// Last error, if any
    pub error_message: Option<String>,
    /// Dependency ids
    pub dependencies: Vec<TaskId>,
    /// Metadata map
    pub metadata: HashMap<String, String>,
    /// Result recorded on completion
    pub result: Option<serde_json::Value>,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        let mut dependencies: Vec<_> = task.dependencies.iter().copied().collect();
        dependencies.sort();
        Self {
            id: task.id,
            name: task.name.clone(),
            task_type: task.task_type.clone(),
            status: task.status,
            priority: task.priority,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            estimated_cost: task.estimated_cost,
            actual_cost: task.actual_cost,
            error_message: task.error_message.clone(),
            dependencies,
            metadata: task.metadata.clone(),
            result: task.result.clone(),
        }
    }
}

/// Snapshot of the whole system: scheduler, monitor, and ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Whether the tick loop is active
    pub active: bool,
    /// Whether new launches are paused
    pub paused: bool,
    /// Total admitted tasks
    pub total_tasks: usize,
    /// Executions currently in flight
    pub running_tasks: usize,
    /// Concurrency cap
    pub max_concurrent: usize,
    /// Task count per status
    pub task_counts: HashMap<TaskStatus, usize>,
    /// Liveness monitor snapshot
    pub monitor: MonitorStatus,
    /// Budget ledger snapshot
    pub ledger: LedgerStatus,
}
