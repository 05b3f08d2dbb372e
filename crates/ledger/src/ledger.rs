//! The cost ledger: budget enforcement, audit log, paused-task holds.

use crate::{BudgetStatus, CostReport, LedgerStatus};
use foreman_core::{CostCategory, CostEntry, TaskId};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default rolling budget period (daily).
pub const DEFAULT_BUDGET_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Fraction of the limit at which a one-shot warning is emitted.
const WARN_THRESHOLD: f64 = 0.8;

/// One rolling-window budget.
#[derive(Debug, Clone)]
struct Budget {
    limit: f64,
    period: Duration,
    current_usage: f64,
    last_reset: Instant,
    /// One-shot latch for the 80% warning; re-armed on reset.
    warned: bool,
}

impl Budget {
    fn new(limit: f64, period: Duration, now: Instant) -> Self {
        Self {
            limit,
            period,
            current_usage: 0.0,
            last_reset: now,
            warned: false,
        }
    }

    /// Usage as it should be displayed at `now`, honoring an elapsed
    /// period without mutating anything.
    fn effective_usage(&self, now: Instant) -> f64 {
        if now.duration_since(self.last_reset) >= self.period {
            0.0
        } else {
            self.current_usage
        }
    }

    fn snapshot(&self, category: CostCategory, now: Instant) -> BudgetStatus {
        let usage = self.effective_usage(now);
        let elapsed = now.duration_since(self.last_reset);
        let until_reset = if elapsed >= self.period {
            Duration::ZERO
        } else {
            self.period - elapsed
        };
        BudgetStatus {
            category,
            limit: self.limit,
            current_usage: usage,
            remaining: self.limit - usage,
            usage_percent: if self.limit > 0.0 {
                usage / self.limit * 100.0
            } else {
                0.0
            },
            period_secs: self.period.as_secs(),
            time_until_reset_secs: until_reset.as_secs(),
        }
    }
}

struct LedgerState {
    budgets: HashMap<CostCategory, Budget>,
    history: Vec<CostEntry>,
    paused: HashSet<TaskId>,
    alerts: Vec<String>,
}

impl LedgerState {
    /// Apply a lazy period reset. Only the mutating paths call this;
    /// queries use [`Budget::effective_usage`] instead.
    fn reset_if_elapsed(&mut self, category: CostCategory, now: Instant) {
        if let Some(budget) = self.budgets.get_mut(&category) {
            if now.duration_since(budget.last_reset) >= budget.period {
                budget.current_usage = 0.0;
                budget.last_reset = now;
                budget.warned = false;
                debug!(category = %category, "budget period elapsed, usage reset");
            }
        }
    }
}

/// Tracks spend per cost category against rolling-window budgets,
/// approves or rejects cost commitments, and holds paused tasks.
pub struct CostLedger {
    state: Mutex<LedgerState>,
}

impl CostLedger {
    /// Create a ledger seeded with the default daily budgets.
    pub fn new() -> Self {
        let defaults = [
            (CostCategory::ApiCalls, 100.0),
            (CostCategory::Compute, 50.0),
            (CostCategory::Storage, 10.0),
            (CostCategory::Bandwidth, 25.0),
            (CostCategory::ModelInference, 200.0),
        ];
        Self::with_limits(defaults)
    }

    /// Create a ledger with explicit per-category limits, each on the
    /// default daily period. Categories not listed get no budget and
    /// are approved unconditionally.
    pub fn with_limits(limits: impl IntoIterator<Item = (CostCategory, f64)>) -> Self {
        let now = Instant::now();
        let budgets = limits
            .into_iter()
            .map(|(category, limit)| (category, Budget::new(limit, DEFAULT_BUDGET_PERIOD, now)))
            .collect();
        Self {
            state: Mutex::new(LedgerState {
                budgets,
                history: Vec::new(),
                paused: HashSet::new(),
                alerts: Vec::new(),
            }),
        }
    }

    /// Re-arm a fresh budget for a category, discarding prior usage.
    pub async fn set_budget(&self, category: CostCategory, limit: f64, period: Duration) {
        let mut state = self.state.lock().await;
        state
            .budgets
            .insert(category, Budget::new(limit, period, Instant::now()));
        info!(category = %category, limit, period_secs = period.as_secs(), "budget set");
    }

    /// Record a cost commitment.
    ///
    /// Returns `true` if the commitment was approved and logged. On
    /// rejection the named task (if any) is added to the paused set.
    pub async fn record_cost(
        &self,
        category: CostCategory,
        amount: f64,
        description: &str,
        task_id: Option<TaskId>,
    ) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Instant::now();
        state.reset_if_elapsed(category, now);

        if let Some(budget) = state.budgets.get(&category) {
            if budget.current_usage + amount > budget.limit {
                let alert = format!(
                    "budget exceeded: {category} needs {amount:.2}, only {:.2} remaining",
                    budget.limit - budget.current_usage
                );
                warn!(category = %category, amount, "{alert}");
                state.alerts.push(alert);
                if let Some(id) = task_id {
                    state.paused.insert(id);
                    info!(task_id = %id, "task paused by budget ledger");
                }
                return false;
            }
        }

        state.history.push(CostEntry {
            timestamp: chrono::Utc::now(),
            category,
            amount,
            description: description.to_string(),
            task_id,
        });

        if let Some(budget) = state.budgets.get_mut(&category) {
            budget.current_usage += amount;
            if amount > 0.0
                && !budget.warned
                && budget.limit > 0.0
                && budget.current_usage >= WARN_THRESHOLD * budget.limit
            {
                budget.warned = true;
                let alert = format!(
                    "warning: {category} at {:.1}% of budget",
                    budget.current_usage / budget.limit * 100.0
                );
                warn!(category = %category, "{alert}");
                state.alerts.push(alert);
            }
        }

        debug!(category = %category, amount, description, "cost recorded");
        true
    }

    /// Hold a task, independent of any cost rejection.
    pub async fn pause_task(&self, task_id: TaskId, reason: &str) {
        let mut state = self.state.lock().await;
        state.paused.insert(task_id);
        let alert = format!("task {task_id} paused: {reason}");
        info!("{alert}");
        state.alerts.push(alert);
    }

    /// Release a held task. Returns `false` if it was not held.
    pub async fn resume_task(&self, task_id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        let released = state.paused.remove(&task_id);
        if released {
            info!(task_id = %task_id, "task resumed");
        }
        released
    }

    /// Whether a task is currently held by the ledger.
    pub async fn is_task_paused(&self, task_id: TaskId) -> bool {
        self.state.lock().await.paused.contains(&task_id)
    }

    /// All held tasks, in id order.
    pub async fn paused_tasks(&self) -> Vec<TaskId> {
        let state = self.state.lock().await;
        let mut ids: Vec<_> = state.paused.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Total approved cost, optionally restricted to a category and a
    /// trailing window.
    pub async fn total_costs(
        &self,
        category: Option<CostCategory>,
        window: Option<Duration>,
    ) -> f64 {
        let state = self.state.lock().await;
        let now = chrono::Utc::now();
        state
            .history
            .iter()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .filter(|e| Self::in_window(now, e, window))
            .map(|e| e.amount)
            .sum()
    }

    /// Approved cost per category over a trailing window.
    pub async fn cost_breakdown(&self, window: Duration) -> HashMap<CostCategory, f64> {
        let state = self.state.lock().await;
        let now = chrono::Utc::now();
        let mut breakdown: HashMap<CostCategory, f64> =
            CostCategory::ALL.iter().map(|c| (*c, 0.0)).collect();
        for entry in state
            .history
            .iter()
            .filter(|e| Self::in_window(now, e, Some(window)))
        {
            *breakdown.entry(entry.category).or_insert(0.0) += entry.amount;
        }
        breakdown
    }

    /// Snapshot of one category budget. `None` if no budget is set.
    pub async fn budget_status(&self, category: CostCategory) -> Option<BudgetStatus> {
        let state = self.state.lock().await;
        let now = Instant::now();
        state.budgets.get(&category).map(|b| b.snapshot(category, now))
    }

    /// Overall ledger snapshot.
    pub async fn status(&self) -> LedgerStatus {
        let state = self.state.lock().await;
        let now = Instant::now();
        let now_utc = chrono::Utc::now();
        let mut paused: Vec<_> = state.paused.iter().copied().collect();
        paused.sort();
        LedgerStatus {
            total_costs_24h: state
                .history
                .iter()
                .filter(|e| Self::in_window(now_utc, e, Some(DEFAULT_BUDGET_PERIOD)))
                .map(|e| e.amount)
                .sum(),
            paused_tasks: paused,
            recent_alerts: state
                .alerts
                .iter()
                .rev()
                .take(10)
                .rev()
                .cloned()
                .collect(),
            budgets: state
                .budgets
                .iter()
                .map(|(category, b)| (*category, b.snapshot(*category, now)))
                .collect(),
        }
    }

    /// Export a full report over a trailing window.
    pub async fn export_report(&self, window: Duration) -> CostReport {
        let state = self.state.lock().await;
        let now = Instant::now();
        let now_utc = chrono::Utc::now();
        let entries: Vec<CostEntry> = state
            .history
            .iter()
            .filter(|e| Self::in_window(now_utc, e, Some(window)))
            .cloned()
            .collect();
        let mut breakdown: HashMap<CostCategory, f64> =
            CostCategory::ALL.iter().map(|c| (*c, 0.0)).collect();
        for entry in &entries {
            *breakdown.entry(entry.category).or_insert(0.0) += entry.amount;
        }
        CostReport {
            generated_at: now_utc,
            period_secs: window.as_secs(),
            total_cost: entries.iter().map(|e| e.amount).sum(),
            breakdown,
            budget_status: state
                .budgets
                .iter()
                .map(|(category, b)| (*category, b.snapshot(*category, now)))
                .collect(),
            entries,
        }
    }

    fn in_window(now: foreman_core::Time, entry: &CostEntry, window: Option<Duration>) -> bool {
        match window {
            None => true,
            Some(window) => now
                .signed_duration_since(entry.timestamp)
                .to_std()
                .map_or(true, |age| age <= window),
        }
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_cover_every_category() {
        let ledger = CostLedger::new();
        for category in CostCategory::ALL {
            assert!(ledger.budget_status(category).await.is_some());
        }
    }

    #[tokio::test]
    async fn zero_amount_is_idempotent_and_never_warns() {
        let ledger = CostLedger::with_limits([(CostCategory::Compute, 10.0)]);
        assert!(ledger.record_cost(CostCategory::Compute, 9.0, "near limit", None).await);
        let before = ledger.budget_status(CostCategory::Compute).await.unwrap();
        let alerts_before = ledger.status().await.recent_alerts.len();

        assert!(ledger.record_cost(CostCategory::Compute, 0.0, "noop", None).await);
        let after = ledger.budget_status(CostCategory::Compute).await.unwrap();
        assert_eq!(before.current_usage, after.current_usage);
        assert_eq!(ledger.status().await.recent_alerts.len(), alerts_before);
    }

    #[tokio::test]
    async fn rejection_pauses_the_named_task_without_logging_the_cost() {
        let ledger = CostLedger::with_limits([(CostCategory::Compute, 100.0)]);
        let id = TaskId::new();
        assert!(!ledger.record_cost(CostCategory::Compute, 150.0, "too big", Some(id)).await);
        assert!(ledger.is_task_paused(id).await);
        assert_eq!(ledger.total_costs(None, None).await, 0.0);

        assert!(ledger.resume_task(id).await);
        assert!(!ledger.resume_task(id).await);
        assert!(!ledger.is_task_paused(id).await);
    }

    #[tokio::test]
    async fn warning_fires_once_per_crossing() {
        let ledger = CostLedger::with_limits([(CostCategory::ApiCalls, 10.0)]);
        assert!(ledger.record_cost(CostCategory::ApiCalls, 8.5, "first", None).await);
        let warnings = |alerts: &[String]| {
            alerts.iter().filter(|a| a.starts_with("warning")).count()
        };
        assert_eq!(warnings(&ledger.status().await.recent_alerts), 1);

        assert!(ledger.record_cost(CostCategory::ApiCalls, 1.0, "second", None).await);
        assert_eq!(warnings(&ledger.status().await.recent_alerts), 1);
    }

    #[tokio::test]
    async fn elapsed_period_resets_before_the_next_charge() {
        let ledger = CostLedger::new();
        ledger
            .set_budget(CostCategory::Storage, 10.0, Duration::from_millis(20))
            .await;
        assert!(ledger.record_cost(CostCategory::Storage, 6.0, "first period", None).await);

        tokio::time::sleep(Duration::from_millis(50)).await;

        // Query shows the lazy reset without mutating the budget.
        let status = ledger.budget_status(CostCategory::Storage).await.unwrap();
        assert_eq!(status.current_usage, 0.0);

        // The next charge resets first, then applies the new amount.
        assert!(ledger.record_cost(CostCategory::Storage, 6.0, "second period", None).await);
        let status = ledger.budget_status(CostCategory::Storage).await.unwrap();
        assert_eq!(status.current_usage, 6.0);
    }

    #[tokio::test]
    async fn totals_and_breakdown_filter_by_category() {
        let ledger = CostLedger::new();
        assert!(ledger.record_cost(CostCategory::Compute, 5.0, "a", None).await);
        assert!(ledger.record_cost(CostCategory::ApiCalls, 2.5, "b", None).await);

        assert_eq!(ledger.total_costs(None, None).await, 7.5);
        assert_eq!(ledger.total_costs(Some(CostCategory::Compute), None).await, 5.0);

        let breakdown = ledger.cost_breakdown(Duration::from_secs(3600)).await;
        assert_eq!(breakdown[&CostCategory::Compute], 5.0);
        assert_eq!(breakdown[&CostCategory::ApiCalls], 2.5);
        assert_eq!(breakdown[&CostCategory::Storage], 0.0);
    }

    #[tokio::test]
    async fn report_includes_only_entries_in_the_window() {
        let ledger = CostLedger::new();
        assert!(ledger.record_cost(CostCategory::Compute, 1.0, "recent", Some(TaskId::new())).await);

        let report = ledger.export_report(Duration::from_secs(3600)).await;
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.total_cost, 1.0);
        assert!(report.budget_status.contains_key(&CostCategory::Compute));
    }
}
