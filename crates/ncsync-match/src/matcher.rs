use anyhow::Result;

use crate::rule::Rule;

/// Compiles an ordered rule list and tests paths against it.
///
/// Declaration order matters: the result of testing a path is the sign of
/// the *last* rule that matched, mirroring canonical gitignore semantics
/// (spec.md §4.A, property 1 in spec.md §8).
pub struct Matcher {
    rules: Vec<Rule>,
}

impl Matcher {
    pub fn compile(patterns: &[String]) -> Result<Self> {
        let rules = patterns
            .iter()
            .map(|p| Rule::compile(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Matcher { rules })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// `path` is forward-slash normalized and relative to the sync root.
    pub fn is_excluded(&self, path: &str, is_directory: bool) -> bool {
        let mut excluded = false;
        for rule in &self.rules {
            if let Some(verdict) = rule.test(path, is_directory) {
                excluded = verdict;
            }
        }
        excluded
    }
}
