//! Exact-duplicate grouping over catalog entries.
//!
//! Entries sharing a fingerprint form a group with exactly one canonical
//! (non-duplicate) member; every other member points straight at it. The
//! canonical is the earliest-created member still on disk that is not already
//! marked as a duplicate, which keeps a user's `mark_canonical` choice stable
//! across scans.

pub mod source_of_truth;

use crate::storage::models::CatalogEntry;
use crate::storage::Database;
use crate::Error;
use rusqlite::params;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

pub use source_of_truth::{
    execute_source_of_truth, preview_source_of_truth, KeepReason, PlannedGroup,
    SourceOfTruthPlan, SourceOfTruthReport,
};

pub const EXACT_HASH: &str = "exact_hash";

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub fingerprint: String,
    pub canonical: CatalogEntry,
    pub duplicates: Vec<CatalogEntry>,
    /// Sum of the duplicate sizes.
    pub wasted_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateStats {
    pub groups: usize,
    pub duplicates: usize,
    pub wasted_bytes: u64,
    pub tombstones: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAction {
    Keep,
    RemoveRecord { delete_file: bool },
    MarkCanonical,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkDeleteReport {
    pub removed: Vec<i64>,
    pub failures: Vec<(i64, String)>,
}

// ── Grouping ─────────────────────────────────────────────────────

fn mark_duplicate_of(db: &Database, id: i64, canonical_id: i64) -> rusqlite::Result<()> {
    db.connection().execute(
        "UPDATE catalog_entry SET is_duplicate = 1, duplicate_of_id = ?1, duplicate_reason = ?2 \
         WHERE id = ?3",
        params![canonical_id, EXACT_HASH, id],
    )?;
    Ok(())
}

fn clear_duplicate(db: &Database, id: i64) -> rusqlite::Result<()> {
    db.connection().execute(
        "UPDATE catalog_entry SET is_duplicate = 0, duplicate_of_id = NULL, duplicate_reason = NULL \
         WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Pick the canonical of a group ordered by (created_at, id). Members still
/// on disk win over missing ones.
fn pick_canonical(members: &[CatalogEntry]) -> Option<&CatalogEntry> {
    let present = || members.iter().filter(|e| !e.is_missing);
    present()
        .find(|e| !e.is_duplicate)
        .or_else(|| present().next())
        .or_else(|| members.iter().find(|e| !e.is_duplicate))
        .or_else(|| members.first())
}

/// Point every member of `members` at `canonical_id`, writing only rows that change.
fn apply_canonical(
    db: &Database,
    members: &[CatalogEntry],
    canonical_id: i64,
) -> rusqlite::Result<()> {
    for member in members {
        if member.id == canonical_id {
            if member.is_duplicate || member.duplicate_of_id.is_some() {
                clear_duplicate(db, member.id)?;
            }
        } else if !member.is_duplicate || member.duplicate_of_id != Some(canonical_id) {
            mark_duplicate_of(db, member.id, canonical_id)?;
        }
    }
    Ok(())
}

/// Re-establish a single canonical for every entry carrying `fingerprint`.
/// Returns the canonical id, if the group has any members left.
pub fn regroup(db: &Database, fingerprint: &str) -> Result<Option<i64>, Error> {
    db.in_transaction(|db| {
        let members = db.entries_by_fingerprint(fingerprint)?;
        let Some(canonical_id) = pick_canonical(&members).map(|e| e.id) else {
            return Ok(None);
        };
        apply_canonical(db, &members, canonical_id)?;
        Ok::<_, Error>(Some(canonical_id))
    })
}

/// Group an entry with every other entry of the same fingerprint.
/// Returns true if the entry ended up a duplicate.
pub fn check_and_mark(db: &Database, entry_id: i64) -> Result<bool, Error> {
    let entry = db
        .get_entry(entry_id)?
        .ok_or(Error::not_found("catalog entry", entry_id))?;
    let canonical = regroup(db, &entry.fingerprint)?;
    let is_duplicate = canonical.is_some_and(|id| id != entry_id);
    if is_duplicate {
        debug!("{} is a duplicate of entry {:?}", entry.path, canonical);
    }
    Ok(is_duplicate)
}

/// Take an entry out of the group it belonged to under `old_fingerprint`.
/// Call after its fingerprint changed; the old group gets a new canonical if
/// it lost its previous one.
pub fn detach_from_group(db: &Database, entry_id: i64, old_fingerprint: &str) -> Result<(), Error> {
    db.in_transaction(|db| {
        clear_duplicate(db, entry_id)?;
        regroup(db, old_fingerprint)?;
        Ok::<_, Error>(())
    })
}

// ── Queries ──────────────────────────────────────────────────────

/// Every fingerprint shared by two or more present entries, largest waste first.
pub fn duplicate_groups(db: &Database) -> Result<Vec<DuplicateGroup>, Error> {
    let mut stmt = db.connection().prepare(
        "SELECT fingerprint FROM catalog_entry WHERE is_missing = 0 \
         GROUP BY fingerprint HAVING COUNT(*) >= 2",
    )?;
    let fingerprints = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups = Vec::with_capacity(fingerprints.len());
    for fingerprint in fingerprints {
        let mut members: Vec<CatalogEntry> = db
            .entries_by_fingerprint(&fingerprint)?
            .into_iter()
            .filter(|e| !e.is_missing)
            .collect();
        if members.len() < 2 {
            continue;
        }
        let canonical_idx = members.iter().position(|e| !e.is_duplicate).unwrap_or(0);
        let canonical = members.remove(canonical_idx);
        let wasted_bytes = members.iter().map(|e| e.size.max(0) as u64).sum();
        groups.push(DuplicateGroup {
            fingerprint,
            canonical,
            duplicates: members,
            wasted_bytes,
        });
    }

    groups.sort_by(|a, b| {
        b.wasted_bytes
            .cmp(&a.wasted_bytes)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    Ok(groups)
}

pub fn stats(db: &Database) -> Result<DuplicateStats, Error> {
    let groups = duplicate_groups(db)?;
    let tombstones: i64 = db.connection().query_row(
        "SELECT COUNT(*) FROM deleted_duplicate_marker",
        [],
        |row| row.get(0),
    )?;
    Ok(DuplicateStats {
        groups: groups.len(),
        duplicates: groups.iter().map(|g| g.duplicates.len()).sum(),
        wasted_bytes: groups.iter().map(|g| g.wasted_bytes).sum(),
        tombstones: tombstones.max(0) as usize,
    })
}

// ── Resolution ───────────────────────────────────────────────────

/// Make `entry_id` the canonical of its group and point every other member at it.
pub fn set_canonical(db: &Database, entry_id: i64) -> Result<(), Error> {
    db.in_transaction(|db| {
        let entry = db
            .get_entry(entry_id)?
            .ok_or(Error::not_found("catalog entry", entry_id))?;
        let members = db.entries_by_fingerprint(&entry.fingerprint)?;
        apply_canonical(db, &members, entry_id)?;
        Ok::<_, Error>(())
    })
}

/// Remove an entry from the catalog. With `delete_file` the file is unlinked
/// first and nothing is written if that fails; otherwise the path is
/// tombstoned so later scans leave it alone. The entry's group is repaired.
pub fn remove_entry(db: &Database, entry: &CatalogEntry, delete_file: bool) -> Result<(), Error> {
    if delete_file {
        match fs::remove_file(Path::new(&entry.path)) {
            Ok(()) => info!("Deleted file {}", entry.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} already gone from disk", entry.path)
            }
            Err(e) => return Err(e.into()),
        }
    }

    db.in_transaction(|db| {
        if !delete_file {
            db.insert_tombstone(&entry.path, &entry.fingerprint)?;
        }
        db.connection().execute(
            "UPDATE catalog_entry SET is_duplicate = 0, duplicate_of_id = NULL, \
             duplicate_reason = NULL WHERE duplicate_of_id = ?1",
            params![entry.id],
        )?;
        db.delete_entry_row(entry.id)?;
        regroup(db, &entry.fingerprint)?;
        Ok::<_, Error>(())
    })?;
    debug!("Removed catalog entry {} ({})", entry.id, entry.path);
    Ok(())
}

/// Act on a duplicate entry. Non-duplicates are rejected without any change.
pub fn resolve(db: &Database, entry_id: i64, action: ResolveAction) -> Result<(), Error> {
    let entry = db
        .get_entry(entry_id)?
        .ok_or(Error::not_found("catalog entry", entry_id))?;
    if !entry.is_duplicate {
        return Err(Error::validation(format!(
            "entry {} is not a duplicate",
            entry_id
        )));
    }

    match action {
        ResolveAction::Keep => {
            debug!("Keeping duplicate {}", entry.path);
            Ok(())
        }
        ResolveAction::RemoveRecord { delete_file } => remove_entry(db, &entry, delete_file),
        ResolveAction::MarkCanonical => {
            set_canonical(db, entry_id)?;
            info!("{} is now canonical", entry.path);
            Ok(())
        }
    }
}

/// Remove several entries, canonicals included. A failure on one entry is
/// recorded and the rest carry on.
pub fn bulk_delete(
    db: &Database,
    entry_ids: &[i64],
    delete_files: bool,
) -> Result<BulkDeleteReport, Error> {
    let mut report = BulkDeleteReport::default();

    for &id in entry_ids {
        let outcome = db
            .get_entry(id)
            .map_err(Error::from)
            .and_then(|entry| entry.ok_or(Error::not_found("catalog entry", id)))
            .and_then(|entry| remove_entry(db, &entry, delete_files));
        match outcome {
            Ok(()) => report.removed.push(id),
            Err(err) => {
                warn!("Could not remove entry {}: {}", id, err);
                report.failures.push((id, err.to_string()));
            }
        }
    }

    orphan_sweep(db)?;
    info!(
        "Bulk delete: {} removed, {} failed",
        report.removed.len(),
        report.failures.len()
    );
    Ok(report)
}

/// Un-mark duplicates whose canonical is gone, then regroup their
/// fingerprints. Returns how many entries were un-marked.
pub fn orphan_sweep(db: &Database) -> Result<usize, Error> {
    db.in_transaction(|db| {
        let mut stmt = db.connection().prepare(
            "SELECT e.id, e.fingerprint FROM catalog_entry e \
             WHERE e.is_duplicate = 1 AND (e.duplicate_of_id IS NULL OR NOT EXISTS \
               (SELECT 1 FROM catalog_entry c WHERE c.id = e.duplicate_of_id))",
        )?;
        let orphans = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut fingerprints = BTreeSet::new();
        for (id, fingerprint) in &orphans {
            clear_duplicate(db, *id)?;
            fingerprints.insert(fingerprint.clone());
        }
        for fingerprint in &fingerprints {
            regroup(db, fingerprint)?;
        }

        if !orphans.is_empty() {
            info!(
                "Orphan sweep: {} entries un-marked across {} groups",
                orphans.len(),
                fingerprints.len()
            );
        }
        Ok::<_, Error>(orphans.len())
    })
}
