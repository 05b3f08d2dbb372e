//! Task model - the unit of schedulable work.

use crate::{CostCategory, TaskId, Time};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Task priority, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Background work
    Low,
    /// Normal work
    #[default]
    Medium,
    /// Time-sensitive work
    High,
    /// Drop-everything work
    Critical,
}

/// Task status state machine.
///
/// Transitions only move forward, with one exception: a failed handler
/// attempt moves a task from `Running` back to `Pending` while retries
/// remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted, waiting to be selected
    Pending,
    /// Handler in flight
    Running,
    /// Held by the budget ledger; requires explicit resume
    Paused,
    /// Handler succeeded
    Completed,
    /// Retries exhausted, or cancelled as stuck
    Failed,
    /// Explicitly cancelled
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Paused)
                | (Running, Cancelled)
                | (Running, Pending) // retry edge
                | (Paused, Pending)
                | (Paused, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A task admitted to the scheduler.
///
/// The scheduler exclusively owns tasks and is the sole writer of
/// `status`; other components see read-only snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, generated at admission
    pub id: TaskId,

    /// Human-readable name
    pub name: String,

    /// Handler type key
    pub task_type: String,

    /// Scheduling priority
    pub priority: TaskPriority,

    /// Current status
    pub status: TaskStatus,

    /// When the task was admitted
    pub created_at: Time,

    /// When the handler was first invoked
    pub started_at: Option<Time>,

    /// When the handler succeeded
    pub completed_at: Option<Time>,

    /// Tasks that must be completed before this one starts
    pub dependencies: HashSet<TaskId>,

    /// Estimated cost, committed against the budget at launch
    pub estimated_cost: f64,

    /// Cost actually committed
    pub actual_cost: f64,

    /// Cost category charged for this task
    pub cost_category: CostCategory,

    /// Retries consumed so far
    pub retry_count: u32,

    /// Retry limit
    pub max_retries: u32,

    /// Per-task timeout override for the liveness monitor
    pub timeout: Option<Duration>,

    /// Free-form metadata; carries the `task_type` key
    pub metadata: HashMap<String, String>,

    /// Last handler or scheduler error
    pub error_message: Option<String>,

    /// Opaque result recorded on completion
    pub result: Option<serde_json::Value>,
}

impl Task {
    /// Build a task from a validated spec.
    pub fn from_spec(spec: TaskSpec) -> Self {
        let mut metadata = spec.metadata;
        metadata.insert("task_type".to_string(), spec.task_type.clone());

        Self {
            id: TaskId::new(),
            name: spec.name,
            task_type: spec.task_type,
            priority: spec.priority,
            status: TaskStatus::Pending,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            dependencies: spec.dependencies,
            estimated_cost: spec.estimated_cost,
            actual_cost: 0.0,
            cost_category: spec.cost_category.unwrap_or(CostCategory::Compute),
            retry_count: 0,
            max_retries: spec.max_retries,
            timeout: spec.timeout,
            metadata,
            error_message: None,
            result: None,
        }
    }
}

/// Errors rejected synchronously at admission.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpecError {
    /// Task name is empty
    #[error("task name must not be empty")]
    EmptyName,

    /// Task type is empty
    #[error("task type must not be empty")]
    EmptyType,

    /// Estimated cost is negative or not finite
    #[error("invalid estimated cost: {0}")]
    InvalidCost(f64),
}

/// Admission input for a new task.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    /// Human-readable name
    pub name: String,
    /// Handler type key
    pub task_type: String,
    /// Scheduling priority
    pub priority: TaskPriority,
    /// Dependency task ids; forward references are legal
    pub dependencies: HashSet<TaskId>,
    /// Estimated cost committed at launch
    pub estimated_cost: f64,
    /// Retry limit
    pub max_retries: u32,
    /// Cost category (defaults to compute)
    pub cost_category: Option<CostCategory>,
    /// Per-task timeout override
    pub timeout: Option<Duration>,
    /// Free-form metadata
    pub metadata: HashMap<String, String>,
}

impl TaskSpec {
    /// Create a spec with the default retry limit of 3.
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            max_retries: 3,
            ..Default::default()
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependency set.
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    /// Set the estimated cost.
    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    /// Set the retry limit.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the cost category.
    pub fn with_cost_category(mut self, category: CostCategory) -> Self {
        self.cost_category = Some(category);
        self
    }

    /// Set the timeout override.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validate the spec. Called by the scheduler at admission.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }
        if self.task_type.trim().is_empty() {
            return Err(SpecError::EmptyType);
        }
        if !self.estimated_cost.is_finite() || self.estimated_cost < 0.0 {
            return Err(SpecError::InvalidCost(self.estimated_cost));
        }
        Ok(())
    }
}
