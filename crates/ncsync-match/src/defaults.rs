use std::path::Path;

/// OS cruft and VCS metadata merged ahead of user rules (spec.md §4.A).
/// An optional `.nextcloudignore` is merged after these, before CLI-supplied
/// rules; the caller is responsible for that ordering when assembling the
/// final pattern list passed to `Matcher::compile`.
pub fn default_rules() -> Vec<String> {
    [
        ".DS_Store",
        "Thumbs.db",
        "desktop.ini",
        "*.tmp",
        "*.temp",
        "*~",
        "*.swp",
        "*.swo",
        ".git/",
        ".svn/",
        ".hg/",
        "node_modules/",
        ".nextcloudsync.log",
        ".sync.ffs_db",
        ".csync_journal.db*",
        ".owncloudsync.log",
        ".ncsync-journal/",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Reads `.nextcloudignore` from the local source root, if present. One
/// rule per line; blank lines and `#`-comments are skipped, matching
/// gitignore conventions (spec.md §4.A).
pub fn read_nextcloudignore(source_root: &Path) -> std::io::Result<Vec<String>> {
    let path = source_root.join(".nextcloudignore");
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Assembles the full exclusion pattern list in the order spec.md §4.A
/// requires: built-in defaults, then an optional `.nextcloudignore` from
/// the local source, then CLI-supplied patterns.
pub fn assemble_patterns(source_root: &Path, cli_patterns: &[String]) -> std::io::Result<Vec<String>> {
    let mut patterns = default_rules();
    patterns.extend(read_nextcloudignore(source_root)?);
    patterns.extend(cli_patterns.iter().cloned());
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;

    #[test]
    fn default_rules_compile_and_exclude_known_cruft() {
        let matcher = Matcher::compile(&default_rules()).unwrap();
        assert!(matcher.is_excluded(".DS_Store", false));
        assert!(matcher.is_excluded(".git", true));
        assert!(matcher.is_excluded("node_modules", true));
        assert!(matcher.is_excluded(".ncsync-journal", true));
        assert!(!matcher.is_excluded("src/main.rs", false));
    }

    #[test]
    fn missing_nextcloudignore_yields_no_extra_rules() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_nextcloudignore(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn nextcloudignore_skips_blank_lines_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".nextcloudignore"), "# comment\n\n*.bak\n!keep.bak\n").unwrap();
        let rules = read_nextcloudignore(dir.path()).unwrap();
        assert_eq!(rules, vec!["*.bak".to_string(), "!keep.bak".to_string()]);
    }

    #[test]
    fn assemble_patterns_orders_defaults_then_nextcloudignore_then_cli() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".nextcloudignore"), "*.bak\n").unwrap();
        let patterns = assemble_patterns(dir.path(), &["!keep.bak".to_string()]).unwrap();
        assert_eq!(patterns[patterns.len() - 2], "*.bak");
        assert_eq!(patterns[patterns.len() - 1], "!keep.bak");
        assert!(patterns.contains(&".DS_Store".to_string()));
    }
}
