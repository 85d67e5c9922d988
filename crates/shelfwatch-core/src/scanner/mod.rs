//! Incremental catalog scanner.
//!
//! Discovery walks a root and only stats files. Processing then works in
//! batches: cheap checks (exclusions, tombstones, size and mtime) run first,
//! the survivors are fingerprinted in parallel, and the results are written
//! sequentially inside one transaction per batch.

pub mod walk;

use crate::config::AppConfig;
use crate::duplicates;
use crate::exclusion::{ExclusionEngine, MatchCounter};
use crate::hasher;
use crate::jobs::ScanCounters;
use crate::progress::ProgressReporter;
use crate::storage::models::{CatalogEntry, WatchedRoot};
use crate::storage::{Database, NewEntry};
use crate::Error;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::thread;
use tracing::{debug, error, info};
use walk::DiscoveredFile;

/// A file that has to be fingerprinted, with its current catalog row if any.
struct PendingFile {
    file: DiscoveredFile,
    path: String,
    existing: Option<CatalogEntry>,
}

pub struct CatalogScanner<'a> {
    db: &'a Database,
    config: &'a AppConfig,
    job_id: i64,
    force: bool,
    reporter: &'a dyn ProgressReporter,
    exclusions: ExclusionEngine,
    match_counter: MatchCounter,
    tombstones: HashSet<String>,
    seen: HashSet<i64>,
    counters: ScanCounters,
}

impl<'a> CatalogScanner<'a> {
    pub fn new(
        db: &'a Database,
        config: &'a AppConfig,
        job_id: i64,
        force: bool,
        reporter: &'a dyn ProgressReporter,
    ) -> Result<Self, Error> {
        Ok(Self {
            db,
            config,
            job_id,
            force,
            reporter,
            exclusions: ExclusionEngine::load(db)?,
            match_counter: MatchCounter::default(),
            tombstones: db.tombstoned_paths()?,
            seen: HashSet::new(),
            counters: ScanCounters::default(),
        })
    }

    pub fn counters(&self) -> &ScanCounters {
        &self.counters
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        if self.db.is_scan_cancelled(self.job_id)? {
            info!("Scan job {} cancelled, stopping", self.job_id);
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Enumerate the files under a root. Unreadable entries are recorded as
    /// errors; a missing root directory is fatal.
    pub fn discover(&mut self, root: &WatchedRoot) -> Result<Vec<DiscoveredFile>, Error> {
        let root_path = Path::new(&root.path);
        if !root_path.is_dir() {
            return Err(Error::RootMissing(root.path.clone()));
        }

        let batch_size = self.config.scan.batch_size.max(1);
        let mut files = Vec::new();
        for item in walk::walk_root(root_path, &self.config.scan) {
            match item {
                Ok(file) => {
                    files.push(file);
                    if files.len() % batch_size == 0 {
                        let current = files.last().map(|f| f.path.to_string_lossy());
                        self.reporter
                            .on_discovery_progress(files.len(), current.as_deref().unwrap_or(""));
                        self.check_cancelled()?;
                    }
                }
                Err(issue) => {
                    error!("{}", issue);
                    self.counters.record_error(issue.to_string());
                }
            }
        }

        debug!("Discovered {} files under {}", files.len(), root.path);
        self.counters.total_files += files.len() as i64;
        Ok(files)
    }

    /// Catalog the discovered files of a root, one committed batch at a time.
    pub fn process(&mut self, root: &WatchedRoot, files: Vec<DiscoveredFile>) -> Result<(), Error> {
        let batch_size = self.config.scan.batch_size.max(1);
        let total = self.counters.total_files.max(0) as usize;
        let mut files = files.into_iter().peekable();

        while files.peek().is_some() {
            self.check_cancelled()?;
            let batch: Vec<DiscoveredFile> = files.by_ref().take(batch_size).collect();
            let batch_len = batch.len();
            let last_path = batch
                .last()
                .map(|f| f.path.to_string_lossy().into_owned());

            self.process_batch(root, batch)?;

            self.counters.processed_files += batch_len as i64;
            self.match_counter.flush(self.db);
            self.db
                .update_scan_progress(self.job_id, &self.counters, last_path.as_deref())?;
            self.reporter
                .on_batch_complete(self.counters.processed_files.max(0) as usize, total);

            thread::yield_now();
        }
        Ok(())
    }

    fn process_batch(&mut self, root: &WatchedRoot, batch: Vec<DiscoveredFile>) -> Result<(), Error> {
        let mut pending = Vec::with_capacity(batch.len());

        let root_path = Path::new(&root.path);
        for file in batch {
            let path = file.path.to_string_lossy().into_owned();
            let existing = self.db.get_entry_by_path(&path)?;

            // Excluded paths are counted even when tombstoned.
            let overridden = existing.as_ref().is_some_and(|e| e.exclusion_override);
            if !overridden {
                if let Some(rule_id) = self.exclusions.matches(&file.path, Some(root_path), file.size)
                {
                    debug!("Excluded {} (rule {})", path, rule_id);
                    self.counters.excluded_files += 1;
                    self.match_counter.record(rule_id);
                    if let Some(entry) = &existing {
                        self.seen.insert(entry.id);
                    }
                    continue;
                }
            }

            if self.tombstones.contains(&path) {
                debug!("Skipping tombstoned path {}", path);
                if let Some(entry) = &existing {
                    self.seen.insert(entry.id);
                }
                continue;
            }

            if let Some(entry) = &existing {
                let unchanged =
                    entry.size == file.size as i64 && entry.modified_at == file.modified_at;
                if unchanged && !self.force {
                    self.seen.insert(entry.id);
                    if entry.is_missing || entry.root_id != Some(root.id) {
                        self.db
                            .touch_entry_seen(entry.id, Some(root.id), file.modified_at)?;
                    }
                    continue;
                }
            }

            pending.push(PendingFile {
                file,
                path,
                existing,
            });
        }

        if pending.is_empty() {
            return Ok(());
        }

        let fingerprints: Vec<std::io::Result<String>> = pending
            .par_iter()
            .map(|p| hasher::fingerprint(&p.file.path, p.file.size))
            .collect();

        let db = self.db;
        db.in_transaction(|db| {
            for (pending, fingerprint) in pending.iter().zip(fingerprints) {
                match fingerprint {
                    Ok(fingerprint) => self.upsert(db, root, pending, fingerprint)?,
                    Err(e) => {
                        error!("Error fingerprinting {}: {}", pending.path, e);
                        self.counters
                            .record_error(format!("{}: {}", pending.path, e));
                        if let Some(entry) = &pending.existing {
                            self.seen.insert(entry.id);
                        }
                    }
                }
            }
            Ok::<_, Error>(())
        })
    }

    fn upsert(
        &mut self,
        db: &Database,
        root: &WatchedRoot,
        pending: &PendingFile,
        fingerprint: String,
    ) -> Result<(), Error> {
        let entry_id = match &pending.existing {
            Some(entry) if entry.fingerprint == fingerprint => {
                // Only the mtime moved.
                db.touch_entry_seen(entry.id, Some(root.id), pending.file.modified_at)?;
                self.seen.insert(entry.id);
                return Ok(());
            }
            Some(entry) => {
                db.update_entry_content(
                    entry.id,
                    pending.file.size as i64,
                    &fingerprint,
                    pending.file.modified_at,
                )?;
                db.touch_entry_seen(entry.id, Some(root.id), pending.file.modified_at)?;
                duplicates::detach_from_group(db, entry.id, &entry.fingerprint)?;
                self.counters.updated_files += 1;
                debug!("Updated {}", pending.path);
                entry.id
            }
            None => {
                let name = pending
                    .file
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let id = db.insert_entry(&NewEntry {
                    root_id: Some(root.id),
                    path: pending.path.clone(),
                    name,
                    size: pending.file.size as i64,
                    fingerprint,
                    modified_at: pending.file.modified_at,
                })?;
                self.counters.new_files += 1;
                debug!("Cataloged {}", pending.path);
                id
            }
        };
        self.seen.insert(entry_id);

        if duplicates::check_and_mark(db, entry_id)? {
            self.counters.duplicate_files += 1;
        } else {
            for task in &self.config.scan.enqueue_tasks {
                db.enqueue(entry_id, *task, None, self.config.worker.max_attempts)?;
            }
        }
        Ok(())
    }

    /// Flag entries of a fully walked root that were not seen, and stamp the root.
    /// A group whose canonical went missing is handed to a member still on disk.
    pub fn finish_root(&mut self, root: &WatchedRoot) -> Result<usize, Error> {
        let vanished: Vec<CatalogEntry> = self
            .db
            .entries_for_root(root.id)?
            .into_iter()
            .filter(|e| !e.is_missing && !self.seen.contains(&e.id))
            .collect();

        let missing = self.db.mark_missing_except(root.id, &self.seen)?;
        if missing > 0 {
            info!("{} entries under {} are missing from disk", missing, root.path);
        }

        let mut fingerprints = HashSet::new();
        for entry in vanished.iter().filter(|e| !e.is_duplicate) {
            if !fingerprints.insert(entry.fingerprint.as_str()) {
                continue;
            }
            let Some(canonical_id) = duplicates::regroup(self.db, &entry.fingerprint)? else {
                continue;
            };
            if canonical_id == entry.id {
                continue;
            }
            let promoted = self.db.get_entry(canonical_id)?;
            if promoted.is_some_and(|p| !p.is_missing) {
                debug!("Entry {} replaces missing canonical {}", canonical_id, entry.id);
                for task in &self.config.scan.enqueue_tasks {
                    self.db
                        .enqueue(canonical_id, *task, None, self.config.worker.max_attempts)?;
                }
            }
        }

        self.db.touch_root_scanned(root.id)?;
        Ok(missing)
    }
}
