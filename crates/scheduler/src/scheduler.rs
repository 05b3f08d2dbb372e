//! The scheduler: task registry, readiness evaluation, tick loop.

use crate::{HandlerRegistry, SystemStatus, TaskHandler, TaskSnapshot};
use foreman_core::{SpecError, Task, TaskId, TaskSpec, TaskStatus};
use foreman_ledger::CostLedger;
use foreman_liveness::{LivenessMonitor, MonitorConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Hard cap on in-flight handler executions
    pub max_concurrent_tasks: usize,
    /// Fixed interval between scheduler passes
    pub tick_interval: Duration,
    /// Interval between cycle/blocked-task scans; coarser than the
    /// tick because the scan is O(V+E) over all monitored tasks
    pub graph_scan_interval: Duration,
    /// Liveness monitor configuration
    pub monitor: MonitorConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            tick_interval: Duration::from_secs(1),
            graph_scan_interval: Duration::from_secs(120),
            monitor: MonitorConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Set the concurrency cap.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the graph scan interval.
    pub fn with_graph_scan_interval(mut self, interval: Duration) -> Self {
        self.graph_scan_interval = interval;
        self
    }

    /// Set the liveness monitor configuration.
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }
}

/// Errors rejected synchronously by scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Malformed task definition
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),

    /// Task id not present in the registry
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
}

/// Why a pending task was not launched this pass.
///
/// These are expected, non-fatal conditions that defer a task; they
/// are logged for diagnostics and never raised as failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartBlock {
    /// New launches are globally paused
    SchedulerPaused,
    /// All concurrency slots are occupied
    ConcurrencyFull,
    /// The budget ledger holds this task
    PausedByLedger,
    /// A dependency id is not in the registry
    DependencyMissing(TaskId),
    /// A dependency has not completed
    DependencyIncomplete(TaskId),
    /// No handler registered for the task type
    NoHandler(String),
}

impl std::fmt::Display for StartBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartBlock::SchedulerPaused => f.write_str("scheduler is paused"),
            StartBlock::ConcurrencyFull => f.write_str("maximum concurrent tasks reached"),
            StartBlock::PausedByLedger => f.write_str("task paused by budget ledger"),
            StartBlock::DependencyMissing(id) => write!(f, "dependency {id} not found"),
            StartBlock::DependencyIncomplete(id) => write!(f, "dependency {id} not completed"),
            StartBlock::NoHandler(t) => write!(f, "no handler registered for task type: {t}"),
        }
    }
}

struct SchedulerState {
    tasks: HashMap<TaskId, Task>,
    running: HashMap<TaskId, JoinHandle<anyhow::Result<serde_json::Value>>>,
    handlers: HandlerRegistry,
    paused: bool,
    active: bool,
    shutdown: bool,
    last_graph_scan: Instant,
}

/// Owns the task registry and drives the tick loop.
///
/// The scheduler is the sole writer of task status. Tasks are never
/// deleted; terminal tasks remain queryable until the scheduler is
/// dropped.
pub struct Scheduler {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    monitor: Arc<LivenessMonitor>,
    ledger: Arc<CostLedger>,
}

impl Scheduler {
    /// Create a scheduler with its own monitor and a default ledger.
    pub fn new(config: SchedulerConfig) -> Self {
        let monitor = Arc::new(LivenessMonitor::new(config.monitor));
        Self::with_components(config, monitor, Arc::new(CostLedger::new()))
    }

    /// Create a scheduler around existing components.
    pub fn with_components(
        config: SchedulerConfig,
        monitor: Arc<LivenessMonitor>,
        ledger: Arc<CostLedger>,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(SchedulerState {
                tasks: HashMap::new(),
                running: HashMap::new(),
                handlers: HandlerRegistry::new(),
                paused: false,
                active: false,
                shutdown: false,
                last_graph_scan: Instant::now(),
            }),
            monitor,
            ledger,
        }
    }

    /// The liveness monitor this scheduler polls.
    pub fn monitor(&self) -> Arc<LivenessMonitor> {
        Arc::clone(&self.monitor)
    }

    /// The budget ledger this scheduler asks for approvals.
    pub fn ledger(&self) -> Arc<CostLedger> {
        Arc::clone(&self.ledger)
    }

    /// Register (or replace) the handler for a task type.
    pub async fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.state.lock().await.handlers.register(task_type, handler);
    }

    /// Admit a new task.
    ///
    /// Fails only on malformed input; dependency existence is checked
    /// at readiness time, so forward-referenced dependencies are
    /// legal. The task is registered with the liveness monitor
    /// immediately.
    pub async fn create_task(&self, spec: TaskSpec) -> Result<TaskId, SchedulerError> {
        spec.validate()?;
        let task = Task::from_spec(spec);
        let id = task.id;
        let timeout = task.timeout;
        let dependencies = task.dependencies.clone();

        self.state.lock().await.tasks.insert(id, task);
        self.monitor.register(id, timeout, dependencies).await;

        info!(task_id = %id, "task created");
        Ok(id)
    }

    /// Evaluate the readiness predicate, in order; the first failing
    /// reason wins and is used for diagnostics.
    async fn readiness(&self, state: &SchedulerState, id: TaskId) -> Result<(), StartBlock> {
        let Some(task) = state.tasks.get(&id) else {
            // Unreachable from the tick loop; treated as missing.
            return Err(StartBlock::DependencyMissing(id));
        };

        if state.paused {
            return Err(StartBlock::SchedulerPaused);
        }
        if state.running.len() >= self.config.max_concurrent_tasks {
            return Err(StartBlock::ConcurrencyFull);
        }
        if self.ledger.is_task_paused(id).await {
            return Err(StartBlock::PausedByLedger);
        }
        for dep in &task.dependencies {
            match state.tasks.get(dep) {
                None => return Err(StartBlock::DependencyMissing(*dep)),
                Some(d) if d.status != TaskStatus::Completed => {
                    return Err(StartBlock::DependencyIncomplete(*dep))
                }
                Some(_) => {}
            }
        }
        if !state.handlers.contains(&task.task_type) {
            return Err(StartBlock::NoHandler(task.task_type.clone()));
        }
        Ok(())
    }

    /// Launch one ready task: commit the budget, spawn the handler.
    async fn launch(&self, state: &mut SchedulerState, id: TaskId) {
        let Some(task) = state.tasks.get_mut(&id) else {
            return;
        };

        task.status = TaskStatus::Running;
        task.started_at.get_or_insert_with(chrono::Utc::now);

        // Re-arm the monitor so the timeout measures actual run time,
        // not time spent waiting in the pending queue.
        self.monitor
            .register(id, task.timeout, task.dependencies.clone())
            .await;

        if task.estimated_cost > 0.0 {
            let approved = self
                .ledger
                .record_cost(
                    task.cost_category,
                    task.estimated_cost,
                    &format!("task: {}", task.name),
                    Some(id),
                )
                .await;
            if !approved {
                task.status = TaskStatus::Paused;
                task.error_message = Some("task paused due to budget constraints".to_string());
                self.monitor.complete(id).await;
                warn!(task_id = %id, "budget rejected, task paused");
                return;
            }
            task.actual_cost += task.estimated_cost;
        }

        let Some(handler) = state.handlers.get(&task.task_type) else {
            // Readiness guarantees a handler; nothing to launch if it
            // was unregistered in between.
            task.status = TaskStatus::Pending;
            return;
        };

        info!(task_id = %id, name = %task.name, "task started");
        let snapshot = task.clone();
        let handle = tokio::spawn(async move { handler.run(snapshot).await });
        state.running.insert(id, handle);
    }

    /// Deterministic selection: priority descending, then creation
    /// time ascending.
    async fn launch_ready(&self, state: &mut SchedulerState) {
        let mut pending: Vec<_> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| (t.id, t.priority, t.created_at))
            .collect();
        pending.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.2.cmp(&b.2)));

        for (id, _, _) in pending {
            if state.running.len() >= self.config.max_concurrent_tasks {
                break;
            }
            match self.readiness(state, id).await {
                Ok(()) => self.launch(state, id).await,
                Err(block) => debug!(task_id = %id, reason = %block, "task not ready"),
            }
        }
    }

    /// Apply a failed attempt. Returns `true` if the task failed
    /// permanently.
    fn apply_failure(task: &mut Task, message: String) -> bool {
        task.error_message = Some(message);
        if task.retry_count < task.max_retries {
            task.retry_count += 1;
            task.status = TaskStatus::Pending;
            warn!(
                task_id = %task.id,
                retry = task.retry_count,
                max_retries = task.max_retries,
                "task failed, will retry"
            );
            false
        } else {
            task.status = TaskStatus::Failed;
            error!(
                task_id = %task.id,
                retries = task.retry_count,
                "task failed permanently"
            );
            true
        }
    }

    /// Collect finished executions and apply their outcomes.
    async fn reap_finished(&self, state: &mut SchedulerState) {
        let finished: Vec<TaskId> = state
            .running
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for id in finished {
            let Some(handle) = state.running.remove(&id) else {
                continue;
            };
            let outcome = handle.await;
            let Some(task) = state.tasks.get_mut(&id) else {
                continue;
            };

            match outcome {
                Ok(Ok(value)) => {
                    self.monitor.update_progress(id).await;
                    task.result = Some(value);
                    task.status = TaskStatus::Completed;
                    task.completed_at = Some(chrono::Utc::now());
                    info!(task_id = %id, name = %task.name, "task completed");
                    self.monitor.complete(id).await;
                }
                Ok(Err(err)) => {
                    if Self::apply_failure(task, err.to_string()) {
                        self.monitor.complete(id).await;
                    }
                }
                Err(join_err) => {
                    // Aborted handles are removed at cancel time, so a
                    // join error here means the handler panicked.
                    let message = format!("handler panicked: {join_err}");
                    if Self::apply_failure(task, message) {
                        self.monitor.complete(id).await;
                    }
                }
            }
        }
    }

    /// One scheduler pass: cancel stuck tasks, launch ready tasks,
    /// reap finished executions, and periodically scan the dependency
    /// graph. Driven by [`Scheduler::run`] at the tick interval.
    pub async fn tick(&self) {
        let stuck = self.monitor.check_stuck().await;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        for id in stuck {
            if let Some(handle) = state.running.remove(&id) {
                handle.abort();
                if let Some(task) = state.tasks.get_mut(&id) {
                    // Stuck tasks are never retried: a stall likely
                    // has a systemic cause and is surfaced instead.
                    task.status = TaskStatus::Failed;
                    task.error_message = Some("task cancelled due to timeout".to_string());
                }
                error!(task_id = %id, "stuck task cancelled");
                self.monitor.complete(id).await;
            } else {
                debug!(task_id = %id, "stuck task has no running execution");
            }
        }

        if !state.paused {
            self.launch_ready(state).await;
        }

        self.reap_finished(state).await;

        if state.last_graph_scan.elapsed() >= self.config.graph_scan_interval {
            state.last_graph_scan = Instant::now();
            for cycle in self.monitor.detect_dependency_cycles().await {
                let ids: Vec<String> = cycle.iter().map(|id| id.to_string()).collect();
                warn!(cycle = ?ids, "dependency cycle detected");
            }
            for blocked in self.monitor.detect_blocked_tasks().await {
                warn!(
                    task_id = %blocked.task_id,
                    blocked_on = %blocked.blocked_on,
                    "task blocked on unhealthy dependency"
                );
            }
        }
    }

    /// Run the tick loop until shutdown, then cancel in-flight work
    /// and drain.
    pub async fn run(&self) {
        {
            let mut state = self.state.lock().await;
            if state.active {
                warn!("scheduler already running");
                return;
            }
            state.active = true;
            state.shutdown = false;
        }
        info!(
            max_concurrent = self.config.max_concurrent_tasks,
            "scheduler started"
        );

        loop {
            if self.state.lock().await.shutdown {
                break;
            }
            self.tick().await;
            tokio::time::sleep(self.config.tick_interval).await;
        }

        self.drain().await;
        self.state.lock().await.active = false;
        info!("scheduler stopped");
    }

    /// Cancel all in-flight executions and wait for them to settle.
    async fn drain(&self) {
        let mut handles = Vec::new();
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let ids: Vec<TaskId> = state.running.keys().copied().collect();
            for id in ids {
                if let Some(handle) = state.running.remove(&id) {
                    handle.abort();
                    handles.push(handle);
                }
                if let Some(task) = state.tasks.get_mut(&id) {
                    if !task.status.is_terminal() {
                        task.status = TaskStatus::Cancelled;
                        task.error_message = Some("cancelled at shutdown".to_string());
                    }
                }
                self.monitor.complete(id).await;
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Stop launching new tasks; in-flight tasks finish. Idempotent.
    pub async fn pause(&self) {
        self.state.lock().await.paused = true;
        info!("scheduler paused");
    }

    /// Resume launching tasks. Idempotent.
    pub async fn resume(&self) {
        self.state.lock().await.paused = false;
        info!("scheduler resumed");
    }

    /// Request shutdown; the run loop drains and returns. Idempotent.
    pub async fn shutdown(&self) {
        self.state.lock().await.shutdown = true;
        info!("scheduler shutdown requested");
    }

    /// Cancel one task. Aborts its execution if running; a no-op for
    /// tasks already terminal. Returns `false` if the id is unknown.
    pub async fn cancel_task(&self, id: TaskId) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(task) = state.tasks.get_mut(&id) else {
            return false;
        };
        if task.status.is_terminal() {
            return true;
        }
        if let Some(handle) = state.running.remove(&id) {
            handle.abort();
        }
        task.status = TaskStatus::Cancelled;
        self.monitor.complete(id).await;
        info!(task_id = %id, "task cancelled");
        true
    }

    /// Release a budget-paused task back to pending. Budget pauses are
    /// never auto-resumed; this is the explicit operator resume.
    /// Returns `false` if the id is unknown.
    pub async fn resume_task(&self, id: TaskId) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(task) = state.tasks.get_mut(&id) else {
            return false;
        };
        self.ledger.resume_task(id).await;
        if task.status == TaskStatus::Paused {
            task.status = TaskStatus::Pending;
            task.error_message = None;
            self.monitor
                .register(id, task.timeout, task.dependencies.clone())
                .await;
            info!(task_id = %id, "task resumed");
        }
        true
    }

    /// Snapshot one task.
    pub async fn get_task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.state.lock().await.tasks.get(&id).map(TaskSnapshot::from)
    }

    /// Snapshot the whole system. Read-only and safe to call
    /// concurrently with the tick loop.
    pub async fn get_system_status(&self) -> SystemStatus {
        let (active, paused, total_tasks, running_tasks, task_counts) = {
            let state = self.state.lock().await;
            let mut counts: HashMap<TaskStatus, usize> =
                TaskStatus::ALL.iter().map(|s| (*s, 0)).collect();
            for task in state.tasks.values() {
                *counts.entry(task.status).or_insert(0) += 1;
            }
            (
                state.active,
                state.paused,
                state.tasks.len(),
                state.running.len(),
                counts,
            )
        };

        SystemStatus {
            active,
            paused,
            total_tasks,
            running_tasks,
            max_concurrent: self.config.max_concurrent_tasks,
            task_counts,
            monitor: self.monitor.status().await,
            ledger: self.ledger.status().await,
        }
    }
}
