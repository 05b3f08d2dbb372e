//! Per-task monitoring records and the stuck check.

use crate::graph::{self, BlockedTask};
use foreman_core::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Monitoring record for one tracked task.
///
/// Exists exactly while the task is monitored: created on `register`,
/// destroyed on `complete`.
#[derive(Debug, Clone)]
pub(crate) struct TaskMonitor {
    pub(crate) start_time: Instant,
    pub(crate) last_progress: Instant,
    pub(crate) timeout_threshold: Duration,
    pub(crate) max_idle_time: Duration,
    /// Diagnostic dependency edges, separate from the scheduler's own
    /// dependency gating.
    pub(crate) dependencies: HashSet<TaskId>,
}

/// Monitor configuration.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Absolute timeout applied when a task declares none
    pub default_timeout: Duration,
    /// Maximum time without a progress call
    pub max_idle_time: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(600),
            max_idle_time: Duration::from_secs(60),
        }
    }
}

impl MonitorConfig {
    /// Set the default absolute timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the maximum idle time.
    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = idle;
        self
    }
}

/// Health of one monitored task, as exposed in status snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHealth {
    /// Seconds since the task was registered or re-armed
    pub running_secs: f64,
    /// Seconds since the last progress call
    pub idle_secs: f64,
    /// Whether the task is currently flagged stuck
    pub is_stuck: bool,
}

/// Monitor snapshot, polled by dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    /// Number of monitored tasks
    pub monitored_tasks: usize,
    /// Number of tasks currently flagged stuck
    pub stuck_tasks: usize,
    /// Per-task health
    pub tasks: HashMap<TaskId, TaskHealth>,
}

struct MonitorState {
    monitors: HashMap<TaskId, TaskMonitor>,
    stuck: HashSet<TaskId>,
}

/// Tracks start and last-progress times per task and flags tasks that
/// overrun their timeout or stall without progress.
pub struct LivenessMonitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl LivenessMonitor {
    /// Create a monitor with the given configuration.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState {
                monitors: HashMap::new(),
                stuck: HashSet::new(),
            }),
        }
    }

    /// Start (or re-arm) monitoring for a task.
    ///
    /// Re-registering an already monitored task resets both clocks and
    /// clears a stale stuck flag; the scheduler uses this to re-arm the
    /// clock when a task actually launches.
    pub async fn register(
        &self,
        task_id: TaskId,
        timeout: Option<Duration>,
        dependencies: HashSet<TaskId>,
    ) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.monitors.insert(
            task_id,
            TaskMonitor {
                start_time: now,
                last_progress: now,
                timeout_threshold: timeout.unwrap_or(self.config.default_timeout),
                max_idle_time: self.config.max_idle_time,
                dependencies,
            },
        );
        state.stuck.remove(&task_id);
        debug!(task_id = %task_id, "task registered with liveness monitor");
    }

    /// Record progress: resets the idle clock and clears the stuck
    /// flag if set. Idle-reset takes precedence over the absolute
    /// timeout for flag clearing.
    pub async fn update_progress(&self, task_id: TaskId) {
        let mut state = self.state.lock().await;
        if let Some(monitor) = state.monitors.get_mut(&task_id) {
            monitor.last_progress = Instant::now();
            if state.stuck.remove(&task_id) {
                info!(task_id = %task_id, "task resumed progress, stuck flag cleared");
            }
        }
    }

    /// Stop monitoring a task and forget any stuck flag.
    pub async fn complete(&self, task_id: TaskId) {
        let mut state = self.state.lock().await;
        if state.monitors.remove(&task_id).is_some() {
            debug!(task_id = %task_id, "task removed from liveness monitor");
        }
        state.stuck.remove(&task_id);
    }

    /// Evaluate every monitored task and return the ids that became
    /// stuck since the last check. Already-flagged ids stay flagged
    /// but are not re-reported.
    pub async fn check_stuck(&self) -> HashSet<TaskId> {
        self.check_stuck_at(Instant::now()).await
    }

    async fn check_stuck_at(&self, now: Instant) -> HashSet<TaskId> {
        let mut state = self.state.lock().await;
        let mut newly_stuck = HashSet::new();

        for (task_id, monitor) in &state.monitors {
            let since_start = now.saturating_duration_since(monitor.start_time);
            let since_progress = now.saturating_duration_since(monitor.last_progress);
            let is_stuck = since_start > monitor.timeout_threshold
                || since_progress > monitor.max_idle_time;

            if is_stuck && !state.stuck.contains(task_id) {
                warn!(
                    task_id = %task_id,
                    running_secs = since_start.as_secs_f64(),
                    idle_secs = since_progress.as_secs_f64(),
                    "task appears stuck"
                );
                newly_stuck.insert(*task_id);
            }
        }

        state.stuck.extend(newly_stuck.iter().copied());
        newly_stuck
    }

    /// All currently flagged tasks.
    pub async fn stuck_tasks(&self) -> HashSet<TaskId> {
        self.state.lock().await.stuck.clone()
    }

    /// Administrative override: flag a monitored task as stuck.
    /// Returns `false` if the task is not monitored.
    pub async fn force_timeout(&self, task_id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        if state.monitors.contains_key(&task_id) {
            state.stuck.insert(task_id);
            warn!(task_id = %task_id, "forced timeout applied");
            true
        } else {
            false
        }
    }

    /// Whether a task is currently monitored.
    pub async fn is_monitored(&self, task_id: TaskId) -> bool {
        self.state.lock().await.monitors.contains_key(&task_id)
    }

    /// Find dependency cycles in the diagnostic graph. Each cycle is
    /// reported once as the list of task ids on it.
    pub async fn detect_dependency_cycles(&self) -> Vec<Vec<TaskId>> {
        let state = self.state.lock().await;
        graph::detect_cycles(&state.monitors)
    }

    /// Find monitored tasks blocked on a stuck or overrunning
    /// dependency.
    pub async fn detect_blocked_tasks(&self) -> Vec<BlockedTask> {
        let state = self.state.lock().await;
        graph::detect_blocked(&state.monitors, &state.stuck, Instant::now())
    }

    /// Monitor snapshot.
    pub async fn status(&self) -> MonitorStatus {
        let state = self.state.lock().await;
        let now = Instant::now();
        MonitorStatus {
            monitored_tasks: state.monitors.len(),
            stuck_tasks: state.stuck.len(),
            tasks: state
                .monitors
                .iter()
                .map(|(id, monitor)| {
                    (
                        *id,
                        TaskHealth {
                            running_secs: now
                                .saturating_duration_since(monitor.start_time)
                                .as_secs_f64(),
                            idle_secs: now
                                .saturating_duration_since(monitor.last_progress)
                                .as_secs_f64(),
                            is_stuck: state.stuck.contains(id),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
