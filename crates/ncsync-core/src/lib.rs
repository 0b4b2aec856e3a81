//! Shared data model for the ncsync workspace: the types that flow between
//! the matcher, URL model, WebDAV transport, journal, tree builder, and
//! planner/executor without any of them depending on each other directly.

pub mod change;
pub mod config;
pub mod error;
pub mod metadata;
pub mod operation;
pub mod plan;
pub mod result;

pub use change::{Change, ChangeType, Conflict, ConflictKind, ConflictResolution, Direction, ResolutionAction};
pub use config::{ConflictPolicy, Credentials, SyncConfig, SyncDirection};
pub use error::{format_op_error, ErrorKind};
pub use metadata::{FileMetadata, Timestamp};
pub use operation::{OperationState, OperationType, SyncOperation};
pub use plan::{PlanTotals, SyncPlan};
pub use result::{SkippedEntry, SyncResult};
