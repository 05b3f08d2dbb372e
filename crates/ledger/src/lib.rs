//! Budget ledger - rolling-window cost budgets per category.
//!
//! The ledger approves or rejects cost commitments before the scheduler
//! launches a task, keeps an append-only audit log of approved costs,
//! and holds a set of tasks paused for budget (or manual) reasons.

#![warn(missing_docs)]

mod ledger;
mod report;

pub use ledger::{CostLedger, DEFAULT_BUDGET_PERIOD};
pub use report::{BudgetStatus, CostReport, LedgerStatus};
