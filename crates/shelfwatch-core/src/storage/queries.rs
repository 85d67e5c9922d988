use super::models::*;
use super::sqlite::{now, Database};
use rusqlite::{params, OptionalExtension, Result};
use std::collections::HashSet;
use tracing::debug;

/// Fields the scanner knows about a file on first sighting.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub root_id: Option<i64>,
    pub path: String,
    pub name: String,
    pub size: i64,
    pub fingerprint: String,
    pub modified_at: i64,
}

impl Database {
    // ── Watched Roots ────────────────────────────────────────────

    pub fn add_root(&self, path: &str, label: &str) -> Result<WatchedRoot> {
        self.connection().execute(
            "INSERT INTO watched_root (path, label, created_at) VALUES (?1, ?2, ?3)",
            params![path, label, now()],
        )?;
        let id = self.connection().last_insert_rowid();
        debug!("Added watched root {} ({})", id, path);
        self.connection().query_row(
            &format!("SELECT {} FROM watched_root WHERE id = ?1", WatchedRoot::COLUMNS),
            params![id],
            WatchedRoot::from_row,
        )
    }

    /// Register a root unless its path is already known. Returns true if inserted.
    pub fn ensure_root(&self, path: &str) -> Result<bool> {
        let inserted = self.connection().execute(
            "INSERT OR IGNORE INTO watched_root (path, label, created_at) VALUES (?1, '', ?2)",
            params![path, now()],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_root(&self, id: i64) -> Result<Option<WatchedRoot>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM watched_root WHERE id = ?1", WatchedRoot::COLUMNS),
                params![id],
                WatchedRoot::from_row,
            )
            .optional()
    }

    pub fn list_roots(&self) -> Result<Vec<WatchedRoot>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM watched_root ORDER BY id",
            WatchedRoot::COLUMNS
        ))?;
        let roots = stmt
            .query_map([], WatchedRoot::from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(roots)
    }

    /// Delete a root. Its entries stay in the catalog, detached from any root.
    pub fn remove_root(&self, id: i64) -> Result<bool> {
        self.in_transaction(|db| {
            db.connection().execute(
                "UPDATE catalog_entry SET root_id = NULL WHERE root_id = ?1",
                params![id],
            )?;
            let removed = db
                .connection()
                .execute("DELETE FROM watched_root WHERE id = ?1", params![id])?;
            Ok::<_, rusqlite::Error>(removed > 0)
        })
    }

    pub fn set_root_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE watched_root SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        Ok(updated > 0)
    }

    /// Designate at most one root as the source of truth. `None` clears the designation.
    pub fn set_source_of_truth(&self, id: Option<i64>) -> Result<bool> {
        if let Some(id) = id {
            if self.get_root(id)?.is_none() {
                return Ok(false);
            }
        }
        self.in_transaction(|db| {
            db.connection().execute(
                "UPDATE watched_root SET is_source_of_truth = 0 WHERE is_source_of_truth = 1",
                [],
            )?;
            match id {
                Some(id) => {
                    let updated = db.connection().execute(
                        "UPDATE watched_root SET is_source_of_truth = 1 WHERE id = ?1",
                        params![id],
                    )?;
                    Ok(updated > 0)
                }
                None => Ok::<_, rusqlite::Error>(true),
            }
        })
    }

    pub fn source_of_truth_root(&self) -> Result<Option<WatchedRoot>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM watched_root WHERE is_source_of_truth = 1",
                    WatchedRoot::COLUMNS
                ),
                [],
                WatchedRoot::from_row,
            )
            .optional()
    }

    pub fn touch_root_scanned(&self, id: i64) -> Result<()> {
        self.connection().execute(
            "UPDATE watched_root SET last_scanned_at = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        Ok(())
    }

    // ── Catalog Entries ──────────────────────────────────────────

    pub fn get_entry(&self, id: i64) -> Result<Option<CatalogEntry>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM catalog_entry WHERE id = ?1", CatalogEntry::COLUMNS),
                params![id],
                CatalogEntry::from_row,
            )
            .optional()
    }

    pub fn get_entry_by_path(&self, path: &str) -> Result<Option<CatalogEntry>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM catalog_entry WHERE path = ?1", CatalogEntry::COLUMNS),
                params![path],
                CatalogEntry::from_row,
            )
            .optional()
    }

    pub fn insert_entry(&self, entry: &NewEntry) -> Result<i64> {
        let now = now();
        self.connection().execute(
            "INSERT INTO catalog_entry \
             (root_id, path, name, size, fingerprint, modified_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                entry.root_id,
                entry.path,
                entry.name,
                entry.size,
                entry.fingerprint,
                entry.modified_at,
                now
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Store new content for an entry. Processing flags are reset because
    /// downstream work was done against the old content.
    pub fn update_entry_content(
        &self,
        id: i64,
        size: i64,
        fingerprint: &str,
        modified_at: i64,
    ) -> Result<()> {
        self.connection().execute(
            "UPDATE catalog_entry SET size = ?1, fingerprint = ?2, modified_at = ?3, \
             updated_at = ?4, is_missing = 0, missing_since = NULL, \
             cover_extracted = 0, text_extracted = 0, ocr_extracted = 0, \
             fts_indexed = 0, embedded = 0, identified = 0 \
             WHERE id = ?5",
            params![size, fingerprint, modified_at, now(), id],
        )?;
        Ok(())
    }

    /// Record that an entry was seen on disk with unchanged content.
    pub fn touch_entry_seen(&self, id: i64, root_id: Option<i64>, modified_at: i64) -> Result<()> {
        self.connection().execute(
            "UPDATE catalog_entry SET modified_at = ?1, is_missing = 0, missing_since = NULL, \
             root_id = COALESCE(?2, root_id) WHERE id = ?3",
            params![modified_at, root_id, id],
        )?;
        Ok(())
    }

    /// Every entry sharing a fingerprint, earliest-created first.
    pub fn entries_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "SELECT {} FROM catalog_entry WHERE fingerprint = ?1 ORDER BY created_at, id",
            CatalogEntry::COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![fingerprint], CatalogEntry::from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn entries_for_root(&self, root_id: i64) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM catalog_entry WHERE root_id = ?1 ORDER BY id",
            CatalogEntry::COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![root_id], CatalogEntry::from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn all_entries(&self) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM catalog_entry ORDER BY id",
            CatalogEntry::COLUMNS
        ))?;
        let entries = stmt
            .query_map([], CatalogEntry::from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn count_entries(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM catalog_entry", [], |row| row.get(0))
    }

    /// Flag entries of a root that were not seen during a complete walk.
    pub fn mark_missing_except(&self, root_id: i64, seen: &HashSet<i64>) -> Result<usize> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id FROM catalog_entry WHERE root_id = ?1 AND is_missing = 0")?;
        let ids: Vec<i64> = stmt
            .query_map(params![root_id], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;

        self.in_transaction(|db| {
            let now = now();
            let mut update = db.connection().prepare_cached(
                "UPDATE catalog_entry SET is_missing = 1, missing_since = ?1 WHERE id = ?2",
            )?;
            let mut marked = 0;
            for id in ids.iter().filter(|id| !seen.contains(id)) {
                marked += update.execute(params![now, id])?;
            }
            Ok::<_, rusqlite::Error>(marked)
        })
    }

    pub fn set_exclusion_override(&self, id: i64, include: bool) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE catalog_entry SET exclusion_override = ?1, \
             is_excluded = CASE WHEN ?1 THEN 0 ELSE is_excluded END, \
             excluded_by_rule_id = CASE WHEN ?1 THEN NULL ELSE excluded_by_rule_id END \
             WHERE id = ?2",
            params![include, id],
        )?;
        Ok(updated > 0)
    }

    pub fn set_entry_exclusion(&self, id: i64, rule_id: Option<i64>) -> Result<()> {
        self.connection().execute(
            "UPDATE catalog_entry SET is_excluded = ?1, excluded_by_rule_id = ?2 WHERE id = ?3",
            params![rule_id.is_some(), rule_id, id],
        )?;
        Ok(())
    }

    /// Remove an entry row and the queue items that reference it.
    pub(crate) fn delete_entry_row(&self, id: i64) -> Result<()> {
        self.connection()
            .execute("DELETE FROM queue_item WHERE entry_id = ?1", params![id])?;
        self.connection()
            .execute("DELETE FROM catalog_entry WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ── Tombstones ───────────────────────────────────────────────

    pub fn insert_tombstone(&self, path: &str, fingerprint: &str) -> Result<()> {
        self.connection().execute(
            "INSERT OR REPLACE INTO deleted_duplicate_marker (path, fingerprint, deleted_at) \
             VALUES (?1, ?2, ?3)",
            params![path, fingerprint, now()],
        )?;
        Ok(())
    }

    pub fn tombstoned_paths(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT path FROM deleted_duplicate_marker")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>>>()?;
        Ok(paths)
    }

    pub fn list_tombstones(&self) -> Result<Vec<DeletedDuplicateMarker>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, path, fingerprint, deleted_at FROM deleted_duplicate_marker \
             ORDER BY deleted_at DESC",
        )?;
        let markers = stmt
            .query_map([], |row| {
                Ok(DeletedDuplicateMarker {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    fingerprint: row.get(2)?,
                    deleted_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(markers)
    }

    /// Allow a tombstoned path to be imported again.
    pub fn remove_tombstone(&self, path: &str) -> Result<bool> {
        let removed = self.connection().execute(
            "DELETE FROM deleted_duplicate_marker WHERE path = ?1",
            params![path],
        )?;
        Ok(removed > 0)
    }

    // ── Exclusion Rules ──────────────────────────────────────────

    pub fn insert_rule(&self, rule: &NewExclusionRule, is_default: bool) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO exclusion_rule \
             (rule_type, pattern, description, priority, enabled, is_default, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rule.rule_type,
                rule.pattern,
                rule.description,
                rule.priority,
                rule.enabled,
                is_default,
                now()
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Insert unless a rule with the same type and pattern exists. Returns true if inserted.
    pub fn insert_rule_if_absent(&self, rule: &NewExclusionRule, is_default: bool) -> Result<bool> {
        let inserted = self.connection().execute(
            "INSERT OR IGNORE INTO exclusion_rule \
             (rule_type, pattern, description, priority, enabled, is_default, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rule.rule_type,
                rule.pattern,
                rule.description,
                rule.priority,
                rule.enabled,
                is_default,
                now()
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn update_rule_fields(&self, id: i64, rule: &NewExclusionRule) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE exclusion_rule SET rule_type = ?1, pattern = ?2, description = ?3, \
             priority = ?4, enabled = ?5 WHERE id = ?6",
            params![
                rule.rule_type,
                rule.pattern,
                rule.description,
                rule.priority,
                rule.enabled,
                id
            ],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_rule(&self, id: i64) -> Result<bool> {
        self.in_transaction(|db| {
            db.connection().execute(
                "UPDATE catalog_entry SET is_excluded = 0, excluded_by_rule_id = NULL \
                 WHERE excluded_by_rule_id = ?1",
                params![id],
            )?;
            let removed = db
                .connection()
                .execute("DELETE FROM exclusion_rule WHERE id = ?1", params![id])?;
            Ok::<_, rusqlite::Error>(removed > 0)
        })
    }

    pub fn set_rule_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE exclusion_rule SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        Ok(updated > 0)
    }

    pub fn get_rule(&self, id: i64) -> Result<Option<ExclusionRule>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM exclusion_rule WHERE id = ?1", ExclusionRule::COLUMNS),
                params![id],
                ExclusionRule::from_row,
            )
            .optional()
    }

    /// All rules in evaluation order: priority descending, then oldest first.
    pub fn list_rules(&self) -> Result<Vec<ExclusionRule>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM exclusion_rule ORDER BY priority DESC, id",
            ExclusionRule::COLUMNS
        ))?;
        let rules = stmt
            .query_map([], ExclusionRule::from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rules)
    }

    pub fn record_rule_matches(&self, rule_id: i64, count: i64) -> Result<()> {
        self.connection().execute(
            "UPDATE exclusion_rule SET files_excluded = files_excluded + ?1, \
             last_matched_at = ?2 WHERE id = ?3",
            params![count, now(), rule_id],
        )?;
        Ok(())
    }
}
