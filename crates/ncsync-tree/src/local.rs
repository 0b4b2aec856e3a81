use std::path::Path;

use anyhow::{Context, Result};
use ncsync_core::{FileMetadata, Timestamp};
use ncsync_match::{filtered_walk, Matcher};

use crate::tree::FileTree;

/// Snapshots the local filesystem rooted at `root`, consulting `matcher` at
/// every entry (spec.md §4.E: "the builder drives a recursive walk rooted at
/// the source"). Directories are pruned wholesale when excluded; surviving
/// files are dropped individually.
pub fn build_local_tree(root: &Path, matcher: &Matcher) -> Result<FileTree> {
    let entries = filtered_walk(root, matcher).with_context(|| format!("walking {}", root.display()))?;

    let mut tree = FileTree::new();
    for entry in entries {
        let parent = parent_path(&entry.relative_path);

        let (size, modified) = if entry.is_directory {
            (0, Timestamp::UNIX_EPOCH)
        } else {
            let meta = std::fs::metadata(&entry.absolute_path)
                .with_context(|| format!("stat {}", entry.absolute_path.display()))?;
            let modified = meta
                .modified()
                .map(Timestamp::from_system_time)
                .unwrap_or(Timestamp::UNIX_EPOCH);
            (meta.len(), modified)
        };

        let name = entry.relative_path.rsplit('/').next().unwrap_or(&entry.relative_path).to_string();

        tree.insert(
            FileMetadata {
                path: entry.relative_path,
                name,
                size,
                modified,
                etag: String::new(),
                is_directory: entry.is_directory,
            },
            Some(parent),
        );
    }

    Ok(tree)
}

/// `filtered_walk` yields entries in `WalkDir`'s depth-first order, which is
/// always parent-before-children, so by the time a path is inserted its
/// parent directory entry (or the tree's root) is already present.
fn parent_path(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncsync_match::default_rules;
    use std::fs;

    #[test]
    fn builds_tree_with_parent_child_invariant() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/a.txt"), b"hello").unwrap();
        fs::write(dir.path().join("root.txt"), b"hi").unwrap();

        let matcher = Matcher::compile(&default_rules()).unwrap();
        let tree = build_local_tree(dir.path(), &matcher).unwrap();

        assert!(tree.contains("docs"));
        assert!(tree.contains("docs/a.txt"));
        assert!(tree.contains("root.txt"));
        assert_eq!(tree.get("docs/a.txt").unwrap().size, 5);
        assert!(tree.check_invariant().is_ok());
    }

    #[test]
    fn excluded_directory_subtree_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/pkg.js"), b"x").unwrap();

        let matcher = Matcher::compile(&default_rules()).unwrap();
        let tree = build_local_tree(dir.path(), &matcher).unwrap();

        assert!(!tree.contains("node_modules"));
        assert!(!tree.contains("node_modules/pkg.js"));
    }
}
