//! Snapshotting both sides of a sync run into `FileTree`s and diffing them
//! into changes and conflicts (spec.md §4.E).

pub mod diff;
pub mod local;
pub mod remote;
pub mod tree;

pub use diff::{detect_changes, files_equal, priority, ComparisonOptions};
pub use local::build_local_tree;
pub use remote::build_remote_tree;
pub use tree::{FileNode, FileTree};
