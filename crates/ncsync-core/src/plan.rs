use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::change::Conflict;
use crate::operation::SyncOperation;

/// Bytes per second assumed when estimating a plan's duration (spec.md §4.F: "≈ 1 MiB/s").
pub const ESTIMATED_BYTES_PER_SEC: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTotals {
    pub total_files: usize,
    pub total_size: u64,
    pub estimated_duration: Duration,
}

impl PlanTotals {
    pub fn compute(ops: &[SyncOperation]) -> Self {
        let total_files = ops.iter().filter(|op| !op.is_mkdir()).count();
        let total_size: u64 = ops.iter().map(|op| op.size).sum();
        let estimated_secs = (total_size / ESTIMATED_BYTES_PER_SEC).max(1);
        PlanTotals {
            total_files,
            total_size,
            estimated_duration: Duration::from_secs(estimated_secs),
        }
    }
}

/// The ordered, dependency-wired unit of work for one sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPlan {
    pub operations: Vec<SyncOperation>,
    pub conflicts: Vec<Conflict>,
    pub totals: PlanTotals,
}

impl SyncPlan {
    pub fn new(operations: Vec<SyncOperation>, conflicts: Vec<Conflict>) -> Self {
        let totals = PlanTotals::compute(&operations);
        SyncPlan {
            operations,
            conflicts,
            totals,
        }
    }
}
