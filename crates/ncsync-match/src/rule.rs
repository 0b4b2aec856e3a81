use anyhow::{Context, Result};
use regex::Regex;

/// One compiled gitignore-style rule (spec.md §4.A).
#[derive(Debug)]
pub struct Rule {
    pub raw: String,
    pub negated: bool,
    pub dir_only: bool,
    pub recursive: bool,
    regex: Regex,
}

impl Rule {
    pub fn compile(raw: &str) -> Result<Self> {
        let mut rest = raw;

        let negated = rest.starts_with('!');
        if negated {
            rest = &rest[1..];
        }

        let absolute = rest.starts_with('/');
        if absolute {
            rest = &rest[1..];
        }

        let dir_only = rest.ends_with('/') && rest.len() > 1;
        let body_src = if dir_only { &rest[..rest.len() - 1] } else { rest };

        let recursive = body_src.contains("**");

        let translated = translate_glob(body_src);
        let anchor_prefix = if absolute { "^" } else { "(?:^|/)" };
        let anchor_suffix = if dir_only { "/?$" } else { "(?:/|$)" };
        let pattern = format!("{anchor_prefix}{translated}{anchor_suffix}");

        let regex = Regex::new(&pattern)
            .with_context(|| format!("invalid exclusion rule {raw:?} (compiled to {pattern:?})"))?;

        Ok(Rule {
            raw: raw.to_string(),
            negated,
            dir_only,
            recursive,
            regex,
        })
    }

    /// Does this rule apply to an entry of this directory-ness at all, per
    /// the "dir_only rules never match non-directories; non-dir_only,
    /// non-recursive rules never match directories" clause.
    fn applies_to(&self, is_directory: bool) -> bool {
        if self.dir_only && !is_directory {
            return false;
        }
        if !self.dir_only && !self.recursive && is_directory {
            return false;
        }
        true
    }

    /// `Some(true)` = this rule excludes the path, `Some(false)` = it
    /// re-includes (negated match), `None` = rule does not match at all.
    pub fn test(&self, path: &str, is_directory: bool) -> Option<bool> {
        if !self.applies_to(is_directory) {
            return None;
        }
        if self.regex.is_match(path) {
            Some(!self.negated)
        } else {
            None
        }
    }
}

/// Characters that are regex metacharacters and are not given special
/// handling elsewhere in `translate_glob`.
fn is_plain_regex_meta(c: char) -> bool {
    matches!(c, '\\' | '^' | '$' | '|' | '+' | '(' | ')' | '[' | ']' | '{' | '}')
}

/// Translates a gitignore-style glob body (rule markers already stripped)
/// into a regex fragment, per the translation table in spec.md §4.A.
fn translate_glob(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    if chars.get(i + 2) == Some(&'/') {
                        out.push_str("(?:.*/)?");
                        i += 3;
                    } else {
                        out.push_str(".*");
                        i += 2;
                    }
                } else {
                    out.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '.' => {
                out.push_str("\\.");
                i += 1;
            }
            c if is_plain_regex_meta(c) => {
                out.push('\\');
                out.push(c);
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_does_not_cross_segment_boundary() {
        let rule = Rule::compile("*.log").unwrap();
        assert_eq!(rule.test("a.log", false), Some(true));
        assert_eq!(rule.test("dir/a.log", false), Some(true));
        assert_eq!(rule.test("a.logx", false), None);
    }

    #[test]
    fn double_star_crosses_segments() {
        let rule = Rule::compile("**/build").unwrap();
        assert_eq!(rule.test("a/b/build", true), Some(true));
        assert_eq!(rule.test("build", true), Some(true));
    }

    #[test]
    fn negated_rule_marks_re_include() {
        let rule = Rule::compile("!keep.log").unwrap();
        assert_eq!(rule.test("keep.log", false), Some(false));
    }

    #[test]
    fn dir_only_rule_skips_files() {
        let rule = Rule::compile("node_modules/").unwrap();
        assert_eq!(rule.test("node_modules", true), Some(true));
        assert_eq!(rule.test("node_modules", false), None);
    }

    #[test]
    fn non_dir_only_non_recursive_rule_skips_directories() {
        let rule = Rule::compile("*.tmp").unwrap();
        assert_eq!(rule.test("cache.tmp", true), None);
        assert_eq!(rule.test("cache.tmp", false), Some(true));
    }

    #[test]
    fn absolute_rule_anchors_at_root() {
        let rule = Rule::compile("/only-root.txt").unwrap();
        assert_eq!(rule.test("only-root.txt", false), Some(true));
        assert_eq!(rule.test("nested/only-root.txt", false), None);
    }
}
