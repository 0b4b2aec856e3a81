use serde::{Deserialize, Serialize};

use crate::metadata::FileMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    None,
    Create,
    Update,
    Delete,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    None,
    LocalToRemote,
    RemoteToLocal,
    Bidirectional,
}

/// One classified difference between the local and remote trees at a path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub change_type: ChangeType,
    pub direction: Direction,
    pub local_meta: Option<FileMetadata>,
    pub remote_meta: Option<FileMetadata>,
    pub reason: String,
    pub priority: i32,
}

impl Change {
    pub fn none(path: impl Into<String>) -> Self {
        Change {
            path: path.into(),
            change_type: ChangeType::None,
            direction: Direction::None,
            local_meta: None,
            remote_meta: None,
            reason: String::new(),
            priority: 0,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.change_type != ChangeType::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    ContentChanged,
    DeletedChanged,
    TypeChanged,
    PermissionDenied,
    StorageError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionAction {
    LocalWins,
    RemoteWins,
    Skip,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub action: ResolutionAction,
    pub path: String,
    pub reason: String,
    pub timestamp: crate::metadata::Timestamp,
}

/// A diagnosed disagreement, not yet an executable operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub path: String,
    pub kind: ConflictKind,
    pub local_meta: Option<FileMetadata>,
    pub remote_meta: Option<FileMetadata>,
    pub description: String,
    pub timestamp: crate::metadata::Timestamp,
    pub resolution: Option<ConflictResolution>,
}
