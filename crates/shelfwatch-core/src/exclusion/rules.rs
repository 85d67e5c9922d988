use super::{validate_pattern, ExclusionEngine};
use crate::config::ScanConfig;
use crate::scanner::walk;
use crate::storage::models::{ExclusionRule, NewExclusionRule, RuleType};
use crate::storage::Database;
use crate::Error;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const TEST_SAMPLE_LIMIT: usize = 20;

/// Junk folders and files every platform leaves behind, plus a minimum size
/// below which files are most likely truncated or corrupt.
pub fn default_rules() -> Vec<NewExclusionRule> {
    let folder_names = [
        ".git",
        "__MACOSX",
        ".Trash",
        ".Trashes",
        "$RECYCLE.BIN",
        "System Volume Information",
        "@eaDir",
    ];
    let filenames = [".DS_Store", "Thumbs.db", "desktop.ini", "._*"];

    let mut rules: Vec<NewExclusionRule> = folder_names
        .iter()
        .map(|name| NewExclusionRule {
            rule_type: RuleType::FolderName,
            pattern: name.to_string(),
            description: format!("System folder {}", name),
            priority: 100,
            enabled: true,
        })
        .collect();

    rules.extend(filenames.iter().map(|name| NewExclusionRule {
        rule_type: RuleType::Filename,
        pattern: name.to_string(),
        description: format!("System file {}", name),
        priority: 100,
        enabled: true,
    }));

    rules.push(NewExclusionRule {
        rule_type: RuleType::SizeMin,
        pattern: "10240".to_string(),
        description: "Files under 10 KB are likely corrupt".to_string(),
        priority: 10,
        enabled: true,
    });

    rules
}

/// Insert the default rules that are not present yet. Returns how many were added.
pub fn seed_defaults(db: &Database) -> Result<usize, Error> {
    let inserted = db.in_transaction(|db| {
        let mut inserted = 0;
        for rule in default_rules() {
            if db.insert_rule_if_absent(&rule, true)? {
                inserted += 1;
            }
        }
        Ok::<_, Error>(inserted)
    })?;
    if inserted > 0 {
        info!("Seeded {} default exclusion rules", inserted);
    }
    Ok(inserted)
}

pub fn create_rule(db: &Database, rule: &NewExclusionRule) -> Result<ExclusionRule, Error> {
    validate_pattern(rule.rule_type, &rule.pattern)?;
    let id = db.insert_rule(rule, false).map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Validation(format!(
                "a {} rule with pattern '{}' already exists",
                rule.rule_type, rule.pattern
            ))
        }
        other => other.into(),
    })?;
    db.get_rule(id)?.ok_or(Error::not_found("exclusion rule", id))
}

pub fn update_rule(db: &Database, id: i64, rule: &NewExclusionRule) -> Result<ExclusionRule, Error> {
    validate_pattern(rule.rule_type, &rule.pattern)?;
    if !db.update_rule_fields(id, rule)? {
        return Err(Error::not_found("exclusion rule", id));
    }
    db.get_rule(id)?.ok_or(Error::not_found("exclusion rule", id))
}

pub fn delete_rule(db: &Database, id: i64) -> Result<(), Error> {
    if !db.delete_rule(id)? {
        return Err(Error::not_found("exclusion rule", id));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct RuleTestResult {
    pub files_checked: usize,
    pub matched: usize,
    /// Up to 20 matching paths.
    pub sample: Vec<String>,
}

/// Dry-run a candidate rule against the files under every enabled root.
/// Nothing is persisted.
pub fn test_rule(
    db: &Database,
    rule_type: RuleType,
    pattern: &str,
    scan: &ScanConfig,
) -> Result<RuleTestResult, Error> {
    validate_pattern(rule_type, pattern)?;
    let candidate = ExclusionRule {
        id: 0,
        rule_type,
        pattern: pattern.to_string(),
        description: String::new(),
        priority: 0,
        enabled: true,
        is_default: false,
        files_excluded: 0,
        last_matched_at: None,
        created_at: String::new(),
    };
    let engine = ExclusionEngine::new(std::slice::from_ref(&candidate));

    let mut result = RuleTestResult::default();
    for root in db.list_roots()?.into_iter().filter(|r| r.enabled) {
        let root_path = Path::new(&root.path);
        if !root_path.is_dir() {
            debug!("Skipping missing root {} in rule test", root.path);
            continue;
        }
        for file in walk::walk_root(root_path, scan).filter_map(Result::ok) {
            result.files_checked += 1;
            if engine.matches(&file.path, Some(root_path), file.size).is_some() {
                result.matched += 1;
                if result.sample.len() < TEST_SAMPLE_LIMIT {
                    result.sample.push(file.path.to_string_lossy().into_owned());
                }
            }
        }
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub excluded: usize,
    pub cleared: usize,
}

/// Re-evaluate the rules against entries already in the catalog, flagging
/// matches and clearing flags that no longer apply. Entries with an
/// exclusion override are left alone.
pub fn apply_to_catalog(db: &Database) -> Result<ApplyOutcome, Error> {
    let engine = ExclusionEngine::load(db)?;
    let entries = db.all_entries()?;
    let roots: HashMap<i64, String> = db
        .list_roots()?
        .into_iter()
        .map(|root| (root.id, root.path))
        .collect();

    db.in_transaction(|db| {
        let mut outcome = ApplyOutcome::default();
        for entry in entries.iter().filter(|e| !e.exclusion_override) {
            let root = entry
                .root_id
                .and_then(|id| roots.get(&id))
                .map(Path::new);
            let matched = engine.matches(Path::new(&entry.path), root, entry.size.max(0) as u64);
            if matched == entry.excluded_by_rule_id && matched.is_some() == entry.is_excluded {
                continue;
            }
            db.set_entry_exclusion(entry.id, matched)?;
            if matched.is_some() {
                outcome.excluded += 1;
            } else {
                outcome.cleared += 1;
            }
        }
        info!(
            "Applied exclusion rules to catalog: {} excluded, {} cleared",
            outcome.excluded, outcome.cleared
        );
        Ok::<_, Error>(outcome)
    })
}
