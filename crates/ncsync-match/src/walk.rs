use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::matcher::Matcher;

/// One surviving entry from a filtered walk, path relative to `root` and
/// forward-slash normalized.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub relative_path: String,
    pub is_directory: bool,
    pub absolute_path: std::path::PathBuf,
}

/// Walks `root` depth-first, consulting `matcher` at every entry. When a
/// directory is excluded its entire subtree is pruned (spec.md §4.A, §4.E —
/// "For directories the walk skips the subtree outright; for files the
/// entry is dropped"). The root itself is never excluded or yielded.
pub fn filtered_walk(root: &Path, matcher: &Matcher) -> Result<Vec<WalkEntry>> {
    let mut entries = Vec::new();
    let mut walker = WalkDir::new(root).follow_links(true).into_iter();

    loop {
        let entry = match walker.next() {
            None => break,
            Some(Ok(entry)) => entry,
            Some(Err(err)) => {
                return Err(err).with_context(|| format!("walking {}", root.display()));
            }
        };

        if entry.depth() == 0 {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} is not under {}", entry.path().display(), root.display()))?;
        let relative_path = to_forward_slash(relative);

        let is_directory = entry.file_type().is_dir();

        if escapes_root(root, entry.path()) {
            if is_directory {
                walker.skip_current_dir();
            }
            continue;
        }

        if matcher.is_excluded(&relative_path, is_directory) {
            if is_directory {
                walker.skip_current_dir();
            }
            continue;
        }

        if is_directory || entry.file_type().is_file() {
            entries.push(WalkEntry {
                relative_path,
                is_directory,
                absolute_path: entry.path().to_path_buf(),
            });
        }
    }

    Ok(entries)
}

fn to_forward_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// A followed symlink that resolves outside the source tree is treated as
/// excluded (spec.md §6, local filesystem interface).
fn escapes_root(root: &Path, path: &Path) -> bool {
    match (root.canonicalize(), path.canonicalize()) {
        (Ok(root), Ok(path)) => !path.starts_with(&root),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::default_rules;
    use std::fs;

    #[test]
    fn prunes_excluded_directory_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/leftpad.js"), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"hello").unwrap();

        let matcher = Matcher::compile(&default_rules()).unwrap();
        let entries = filtered_walk(dir.path(), &matcher).unwrap();

        assert!(entries.iter().all(|e| !e.relative_path.starts_with("node_modules")));
        assert!(entries.iter().any(|e| e.relative_path == "keep.txt"));
    }

    #[test]
    fn user_pattern_with_negation_applies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.log"), b"x").unwrap();
        fs::write(dir.path().join("keep.log"), b"x").unwrap();
        fs::write(dir.path().join("b.txt"), b"x").unwrap();

        let patterns = vec!["*.log".to_string(), "!keep.log".to_string()];
        let matcher = Matcher::compile(&patterns).unwrap();
        let mut names: Vec<_> = filtered_walk(dir.path(), &matcher)
            .unwrap()
            .into_iter()
            .map(|e| e.relative_path)
            .collect();
        names.sort();

        assert_eq!(names, vec!["b.txt".to_string(), "keep.log".to_string()]);
    }
}
