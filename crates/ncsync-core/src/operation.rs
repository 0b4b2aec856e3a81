use serde::{Deserialize, Serialize};

use crate::change::{ChangeType, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    CreateOrUpdate,
    Delete,
    Move,
    MakeDirectory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// An executable unit produced by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: u64,
    pub op_type: OperationType,
    /// `Create` vs `Update` for a `CreateOrUpdate` op, so the executor can sort
    /// the result into `created_files`/`updated_files` without a redundant
    /// existence check; `None` for op types where the distinction doesn't apply.
    pub change_type: ChangeType,
    pub direction: Direction,
    pub source_path: String,
    pub target_path: String,
    pub size: u64,
    pub priority: i32,
    /// ids of operations that must reach `Completed` before this one is eligible.
    pub dependencies: Vec<u64>,
    #[serde(skip)]
    pub state: OperationState,
}

impl SyncOperation {
    pub fn new(
        id: u64,
        op_type: OperationType,
        change_type: ChangeType,
        direction: Direction,
        source_path: impl Into<String>,
        target_path: impl Into<String>,
        size: u64,
        priority: i32,
    ) -> Self {
        SyncOperation {
            id,
            op_type,
            change_type,
            direction,
            source_path: source_path.into(),
            target_path: target_path.into(),
            size,
            priority,
            dependencies: Vec::new(),
            state: OperationState::Pending,
        }
    }

    pub fn is_mkdir(&self) -> bool {
        matches!(self.op_type, OperationType::MakeDirectory)
    }
}
