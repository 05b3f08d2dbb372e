//! Cost categories and the append-only cost audit record.

use crate::{TaskId, Time};
use serde::{Deserialize, Serialize};

/// A closed set of cost categories tracked by the budget ledger.
///
/// Unknown category names are an explicit error path at admission time
/// rather than an open string space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    /// Outbound API calls
    ApiCalls,
    /// Compute time
    Compute,
    /// Storage usage
    Storage,
    /// Network bandwidth
    Bandwidth,
    /// Model inference
    ModelInference,
}

impl CostCategory {
    /// All known categories, in display order.
    pub const ALL: [CostCategory; 5] = [
        CostCategory::ApiCalls,
        CostCategory::Compute,
        CostCategory::Storage,
        CostCategory::Bandwidth,
        CostCategory::ModelInference,
    ];

    /// Snake-case name used in reports and metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            CostCategory::ApiCalls => "api_calls",
            CostCategory::Compute => "compute",
            CostCategory::Storage => "storage",
            CostCategory::Bandwidth => "bandwidth",
            CostCategory::ModelInference => "model_inference",
        }
    }
}

impl std::fmt::Display for CostCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a category name is not one of the known set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cost category: {0}")]
pub struct UnknownCategory(pub String);

impl std::str::FromStr for CostCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_calls" => Ok(CostCategory::ApiCalls),
            "compute" => Ok(CostCategory::Compute),
            "storage" => Ok(CostCategory::Storage),
            "bandwidth" => Ok(CostCategory::Bandwidth),
            "model_inference" => Ok(CostCategory::ModelInference),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Immutable audit record of an approved cost commitment.
///
/// Entries are append-only; the ledger never mutates or removes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    /// When the commitment was approved
    pub timestamp: Time,

    /// Cost category charged
    pub category: CostCategory,

    /// Amount committed
    pub amount: f64,

    /// Human-readable description
    pub description: String,

    /// Task the cost was committed for, if any
    pub task_id: Option<TaskId>,
}
