//! Read-only ledger snapshots and the exportable cost report.

use foreman_core::{CostCategory, CostEntry, TaskId, Time};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of a single category budget.
///
/// Usage figures reflect a lazy period reset: if the rolling period has
/// elapsed, usage reads as zero even though the stored budget has not
/// been mutated yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    /// Budget category
    pub category: CostCategory,

    /// Spending limit for one period
    pub limit: f64,

    /// Usage accumulated in the current period
    pub current_usage: f64,

    /// Limit minus usage
    pub remaining: f64,

    /// Usage as a percentage of the limit
    pub usage_percent: f64,

    /// Period length in seconds
    pub period_secs: u64,

    /// Seconds until the next reset
    pub time_until_reset_secs: u64,
}

/// Overall ledger snapshot, polled by dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStatus {
    /// Total approved cost over the trailing 24 hours
    pub total_costs_24h: f64,

    /// Tasks currently held by the ledger
    pub paused_tasks: Vec<TaskId>,

    /// Most recent alerts, newest last (at most ten)
    pub recent_alerts: Vec<String>,

    /// Per-category budget snapshots
    pub budgets: HashMap<CostCategory, BudgetStatus>,
}

/// Exportable cost report over a trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostReport {
    /// When the report was generated
    pub generated_at: Time,

    /// Window length in seconds
    pub period_secs: u64,

    /// Total approved cost in the window
    pub total_cost: f64,

    /// Approved cost per category in the window
    pub breakdown: HashMap<CostCategory, f64>,

    /// Budget snapshots at generation time
    pub budget_status: HashMap<CostCategory, BudgetStatus>,

    /// Audit entries that fall inside the window
    pub entries: Vec<CostEntry>,
}
