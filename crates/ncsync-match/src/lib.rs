//! gitignore-style exclusion pattern compiler and filtered directory walk.

pub mod defaults;
pub mod matcher;
pub mod rule;
pub mod walk;

pub use defaults::{assemble_patterns, default_rules, read_nextcloudignore};
pub use matcher::Matcher;
pub use rule::Rule;
pub use walk::{filtered_walk, WalkEntry};
