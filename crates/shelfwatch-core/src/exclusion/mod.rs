//! Exclusion rules: an ordered set of matchers deciding which files the
//! scanner ignores.
//!
//! Rules are evaluated by priority, highest first, and the first match
//! wins. A rule whose pattern cannot be compiled never matches, so a bad
//! rule can hide nothing and never aborts a scan.

pub mod rules;

use crate::storage::models::{ExclusionRule, RuleType};
use crate::storage::Database;
use glob::Pattern;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

enum Matcher {
    FolderPath(Pattern),
    FolderName(String),
    Filename(Pattern),
    SizeMin(u64),
    SizeMax(u64),
    Regex(Regex),
    Never,
}

struct CompiledRule {
    id: i64,
    matcher: Matcher,
}

pub struct ExclusionEngine {
    rules: Vec<CompiledRule>,
}

impl ExclusionEngine {
    /// Compile the enabled rules. Invalid patterns are logged here, once, and
    /// compiled to a matcher that never matches.
    pub fn new(rules: &[ExclusionRule]) -> Self {
        let mut enabled: Vec<&ExclusionRule> = rules.iter().filter(|r| r.enabled).collect();
        enabled.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let rules = enabled
            .into_iter()
            .map(|rule| CompiledRule {
                id: rule.id,
                matcher: compile(rule),
            })
            .collect();

        Self { rules }
    }

    pub fn load(db: &Database) -> Result<Self, crate::Error> {
        let rules = db.list_rules()?;
        let engine = Self::new(&rules);
        debug!("Loaded {} enabled exclusion rules", engine.rules.len());
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The id of the first rule matching this file, if any. Folder names are
    /// looked up below `root` only, so a root living inside an excluded
    /// folder still gets scanned.
    pub fn matches(&self, path: &Path, root: Option<&Path>, size: u64) -> Option<i64> {
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(path, root, size))
            .map(|rule| rule.id)
    }
}

impl Matcher {
    fn is_match(&self, path: &Path, root: Option<&Path>, size: u64) -> bool {
        match self {
            Matcher::FolderPath(pattern) => path
                .parent()
                .is_some_and(|parent| pattern.matches_path(parent)),
            Matcher::FolderName(name) => {
                let relative = root
                    .and_then(|root| path.strip_prefix(root).ok())
                    .unwrap_or(path);
                relative.parent().is_some_and(|parent| {
                    parent
                        .components()
                        .any(|component| component.as_os_str() == name.as_str())
                })
            }
            Matcher::Filename(pattern) => path
                .file_name()
                .is_some_and(|name| pattern.matches(&name.to_string_lossy())),
            Matcher::SizeMin(min) => size < *min,
            Matcher::SizeMax(max) => size > *max,
            Matcher::Regex(re) => re.is_match(&path.to_string_lossy()),
            Matcher::Never => false,
        }
    }
}

fn compile(rule: &ExclusionRule) -> Matcher {
    match compile_pattern(rule.rule_type, &rule.pattern) {
        Ok(matcher) => matcher,
        Err(reason) => {
            warn!(
                "Exclusion rule {} ({} '{}') disabled: {}",
                rule.id, rule.rule_type, rule.pattern, reason
            );
            Matcher::Never
        }
    }
}

fn compile_pattern(rule_type: RuleType, pattern: &str) -> Result<Matcher, String> {
    match rule_type {
        RuleType::FolderPath => Pattern::new(pattern)
            .map(Matcher::FolderPath)
            .map_err(|e| e.to_string()),
        RuleType::Filename => Pattern::new(pattern)
            .map(Matcher::Filename)
            .map_err(|e| e.to_string()),
        RuleType::FolderName => Ok(Matcher::FolderName(pattern.to_string())),
        RuleType::SizeMin => parse_size(pattern).map(Matcher::SizeMin),
        RuleType::SizeMax => parse_size(pattern).map(Matcher::SizeMax),
        RuleType::Regex => Regex::new(pattern)
            .map(Matcher::Regex)
            .map_err(|e| e.to_string()),
    }
}

fn parse_size(pattern: &str) -> Result<u64, String> {
    pattern
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("'{}' is not a byte count", pattern))
}

/// Check that a pattern compiles for its rule type.
pub fn validate_pattern(rule_type: RuleType, pattern: &str) -> Result<(), crate::Error> {
    if pattern.trim().is_empty() {
        return Err(crate::Error::validation("pattern must not be empty"));
    }
    compile_pattern(rule_type, pattern)
        .map(|_| ())
        .map_err(|reason| crate::Error::Validation(format!("invalid {} pattern: {}", rule_type, reason)))
}

/// Per-rule match counts accumulated during a scan and flushed in batches.
#[derive(Debug, Default)]
pub struct MatchCounter {
    counts: HashMap<i64, i64>,
}

impl MatchCounter {
    pub fn record(&mut self, rule_id: i64) {
        *self.counts.entry(rule_id).or_default() += 1;
    }

    /// Write the counts to the rules table. Failures are logged and dropped.
    pub fn flush(&mut self, db: &Database) {
        for (rule_id, count) in self.counts.drain() {
            if let Err(e) = db.record_rule_matches(rule_id, count) {
                warn!("Could not update match counter for rule {}: {}", rule_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, rule_type: RuleType, pattern: &str, priority: i64) -> ExclusionRule {
        ExclusionRule {
            id,
            rule_type,
            pattern: pattern.to_string(),
            description: String::new(),
            priority,
            enabled: true,
            is_default: false,
            files_excluded: 0,
            last_matched_at: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_filename_glob() {
        let engine = ExclusionEngine::new(&[rule(1, RuleType::Filename, "*.tmp", 90)]);
        assert_eq!(engine.matches(Path::new("/lib/a/file.tmp"), None, 50_000), Some(1));
        assert_eq!(engine.matches(Path::new("/lib/a/file.pdf"), None, 50_000), None);
    }

    #[test]
    fn test_folder_path_glob_matches_parent() {
        let engine = ExclusionEngine::new(&[rule(1, RuleType::FolderPath, "/lib/*/drafts", 50)]);
        assert_eq!(engine.matches(Path::new("/lib/x/drafts/a.pdf"), None, 1), Some(1));
        assert_eq!(engine.matches(Path::new("/lib/x/final/a.pdf"), None, 1), None);
    }

    #[test]
    fn test_folder_name_any_depth() {
        let engine = ExclusionEngine::new(&[rule(1, RuleType::FolderName, "__MACOSX", 100)]);
        assert_eq!(engine.matches(Path::new("/lib/__MACOSX/a.pdf"), None, 1), Some(1));
        assert_eq!(engine.matches(Path::new("/lib/a/b/__MACOSX/c/d.pdf"), None, 1), Some(1));
        assert_eq!(engine.matches(Path::new("/lib/__MACOSX_notes/a.pdf"), None, 1), None);
    }

    #[test]
    fn test_folder_name_ignores_components_above_root() {
        let engine = ExclusionEngine::new(&[rule(1, RuleType::FolderName, "@eaDir", 100)]);
        let root = Path::new("/volume1/@eaDir/lib");
        assert_eq!(
            engine.matches(Path::new("/volume1/@eaDir/lib/book.epub"), Some(root), 1),
            None
        );
        assert_eq!(
            engine.matches(Path::new("/volume1/@eaDir/lib/@eaDir/thumb.jpg"), Some(root), 1),
            Some(1)
        );
        // Without a root the whole path counts.
        assert_eq!(
            engine.matches(Path::new("/volume1/@eaDir/lib/book.epub"), None, 1),
            Some(1)
        );
    }

    #[test]
    fn test_size_bounds() {
        let engine = ExclusionEngine::new(&[
            rule(1, RuleType::SizeMin, "10240", 10),
            rule(2, RuleType::SizeMax, "1000000", 10),
        ]);
        assert_eq!(engine.matches(Path::new("/a.pdf"), None, 100), Some(1));
        assert_eq!(engine.matches(Path::new("/a.pdf"), None, 10_240), None);
        assert_eq!(engine.matches(Path::new("/a.pdf"), None, 2_000_000), Some(2));
    }

    #[test]
    fn test_non_numeric_size_never_matches() {
        let engine = ExclusionEngine::new(&[rule(1, RuleType::SizeMin, "ten kb", 10)]);
        assert_eq!(engine.matches(Path::new("/a.pdf"), None, 0), None);
    }

    #[test]
    fn test_invalid_regex_fails_open() {
        let engine = ExclusionEngine::new(&[
            rule(1, RuleType::Regex, "([unclosed", 100),
            rule(2, RuleType::Regex, r"\.bak$", 10),
        ]);
        assert_eq!(engine.matches(Path::new("/a/b.bak"), None, 1), Some(2));
        assert_eq!(engine.matches(Path::new("/a/([unclosed"), None, 1), None);
    }

    #[test]
    fn test_priority_order_first_match_wins() {
        let engine = ExclusionEngine::new(&[
            rule(1, RuleType::Filename, "*.pdf", 50),
            rule(2, RuleType::FolderName, "scratch", 100),
        ]);
        assert_eq!(engine.matches(Path::new("/scratch/a.pdf"), None, 1), Some(2));
    }

    #[test]
    fn test_disabled_rules_ignored() {
        let mut disabled = rule(1, RuleType::Filename, "*", 100);
        disabled.enabled = false;
        let engine = ExclusionEngine::new(&[disabled]);
        assert!(engine.is_empty());
        assert_eq!(engine.matches(Path::new("/a.pdf"), None, 1), None);
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern(RuleType::SizeMin, "1024").is_ok());
        assert!(validate_pattern(RuleType::SizeMax, "big").is_err());
        assert!(validate_pattern(RuleType::Regex, "(").is_err());
        assert!(validate_pattern(RuleType::Filename, "[").is_err());
        assert!(validate_pattern(RuleType::FolderName, "  ").is_err());
    }
}
