//! Bulk resolution driven by the source-of-truth root.
//!
//! For each duplicate group, keep the copy that lives under the
//! source-of-truth root. Groups with no copy there keep the most recently
//! modified member, falling back to the earliest-created one on a tie.

use super::{duplicate_groups, orphan_sweep, remove_entry, set_canonical};
use crate::storage::models::{CatalogEntry, WatchedRoot};
use crate::storage::Database;
use crate::Error;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepReason {
    SourceOfTruth,
    MostRecent,
    EarliestCreated,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedGroup {
    pub fingerprint: String,
    pub keep: CatalogEntry,
    pub reason: KeepReason,
    pub remove: Vec<CatalogEntry>,
}

impl PlannedGroup {
    pub fn reclaimed_bytes(&self) -> u64 {
        self.remove.iter().map(|e| e.size.max(0) as u64).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOfTruthPlan {
    pub source_root: Option<WatchedRoot>,
    pub groups: Vec<PlannedGroup>,
}

impl SourceOfTruthPlan {
    pub fn removal_count(&self) -> usize {
        self.groups.iter().map(|g| g.remove.len()).sum()
    }

    pub fn reclaimed_bytes(&self) -> u64 {
        self.groups.iter().map(|g| g.reclaimed_bytes()).sum()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceOfTruthReport {
    pub groups: usize,
    pub removed: usize,
    pub reclaimed_bytes: u64,
    pub failures: Vec<(i64, String)>,
}

/// Choose the member to keep. `members` is ordered by (created_at, id).
fn choose_keeper(members: &[CatalogEntry], source_root: Option<i64>) -> Option<(usize, KeepReason)> {
    if let Some(root_id) = source_root {
        if let Some(idx) = members.iter().position(|e| e.root_id == Some(root_id)) {
            return Some((idx, KeepReason::SourceOfTruth));
        }
    }

    let newest = members.iter().map(|e| e.modified_at).max()?;
    let mut newest_members = members
        .iter()
        .enumerate()
        .filter(|(_, e)| e.modified_at == newest);
    let (idx, _) = newest_members.next()?;
    if newest_members.next().is_some() {
        Some((idx, KeepReason::EarliestCreated))
    } else {
        Some((idx, KeepReason::MostRecent))
    }
}

/// Compute what `execute_source_of_truth` would do. Read-only.
pub fn preview_source_of_truth(db: &Database) -> Result<SourceOfTruthPlan, Error> {
    let source_root = db.source_of_truth_root()?;
    let source_id = source_root.as_ref().map(|r| r.id);

    let mut planned = Vec::new();
    for group in duplicate_groups(db)? {
        let mut members = Vec::with_capacity(group.duplicates.len() + 1);
        members.push(group.canonical);
        members.extend(group.duplicates);
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let Some((keep_idx, reason)) = choose_keeper(&members, source_id) else {
            continue;
        };
        let keep = members.remove(keep_idx);
        planned.push(PlannedGroup {
            fingerprint: group.fingerprint,
            keep,
            reason,
            remove: members,
        });
    }

    Ok(SourceOfTruthPlan {
        source_root,
        groups: planned,
    })
}

/// Apply the source-of-truth plan: promote each keeper to canonical and
/// remove the other members. Per-entry failures are reported.
pub fn execute_source_of_truth(db: &Database, delete_files: bool) -> Result<SourceOfTruthReport, Error> {
    let plan = preview_source_of_truth(db)?;
    let mut report = SourceOfTruthReport {
        groups: plan.groups.len(),
        ..Default::default()
    };

    for group in &plan.groups {
        set_canonical(db, group.keep.id)?;
        for entry in &group.remove {
            match remove_entry(db, entry, delete_files) {
                Ok(()) => {
                    report.removed += 1;
                    report.reclaimed_bytes += entry.size.max(0) as u64;
                }
                Err(err) => {
                    warn!("Could not remove {}: {}", entry.path, err);
                    report.failures.push((entry.id, err.to_string()));
                }
            }
        }
    }

    orphan_sweep(db)?;
    info!(
        "Source-of-truth resolution: {} groups, {} entries removed, {} bytes reclaimed, {} failures",
        report.groups,
        report.removed,
        report.reclaimed_bytes,
        report.failures.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, root_id: i64, modified_at: i64) -> CatalogEntry {
        CatalogEntry {
            id,
            root_id: Some(root_id),
            path: format!("/r{}/book{}.epub", root_id, id),
            name: format!("book{}.epub", id),
            size: 2048,
            fingerprint: "2048-00000000000000ff".to_string(),
            modified_at,
            created_at: format!("2024-01-01T00:00:0{}.000000Z", id),
            updated_at: String::new(),
            is_duplicate: false,
            duplicate_of_id: None,
            duplicate_reason: None,
            is_excluded: false,
            excluded_by_rule_id: None,
            exclusion_override: false,
            is_missing: false,
            missing_since: None,
            cover_extracted: false,
            text_extracted: false,
            ocr_extracted: false,
            fts_indexed: false,
            embedded: false,
            identified: false,
        }
    }

    #[test]
    fn test_keeper_prefers_source_root() {
        let members = vec![entry(1, 1, 500), entry(2, 2, 100)];
        assert_eq!(
            choose_keeper(&members, Some(2)),
            Some((1, KeepReason::SourceOfTruth))
        );
    }

    #[test]
    fn test_keeper_falls_back_to_most_recent() {
        let members = vec![entry(1, 1, 100), entry(2, 1, 500), entry(3, 1, 300)];
        assert_eq!(
            choose_keeper(&members, Some(9)),
            Some((1, KeepReason::MostRecent))
        );
    }

    #[test]
    fn test_keeper_tie_goes_to_earliest_created() {
        let members = vec![entry(1, 1, 500), entry(2, 1, 500)];
        assert_eq!(
            choose_keeper(&members, None),
            Some((0, KeepReason::EarliestCreated))
        );
    }
}
