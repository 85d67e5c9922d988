use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

use shelfwatch_core::config::ScanConfig;
use shelfwatch_core::duplicates;
use shelfwatch_core::storage::models::{CatalogEntry, JobStatus, NewExclusionRule, RuleType};
use shelfwatch_core::{
    AppConfig, Database, Error, ProgressReporter, ScanEngine, SilentReporter, TaskType,
};

fn write_file(dir: &Path, name: &str, content: &[u8]) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
}

fn test_config() -> AppConfig {
    AppConfig {
        scan: ScanConfig {
            batch_size: 7,
            ..ScanConfig::default()
        },
        ..AppConfig::default()
    }
}

fn entry_at(db: &Database, path: &Path) -> CatalogEntry {
    db.get_entry_by_path(&path.to_string_lossy())
        .unwrap()
        .unwrap_or_else(|| panic!("no entry for {}", path.display()))
}

/// Every duplicate points at a non-duplicate with the same fingerprint, and
/// no fingerprint has two non-duplicates.
fn assert_duplicate_invariant(db: &Database) {
    let entries = db.all_entries().unwrap();
    for entry in entries.iter().filter(|e| e.is_duplicate) {
        let target_id = entry.duplicate_of_id.expect("duplicate without target");
        let target = db.get_entry(target_id).unwrap().expect("dangling duplicate_of_id");
        assert!(!target.is_duplicate, "{} points at a duplicate", entry.path);
        assert_eq!(target.fingerprint, entry.fingerprint);
    }
    let mut canonicals = std::collections::HashMap::new();
    for entry in entries.iter().filter(|e| !e.is_duplicate) {
        *canonicals.entry(entry.fingerprint.clone()).or_insert(0) += 1;
    }
    assert!(canonicals.values().all(|&n| n == 1));
}

/// 99 distinct files plus a copy of the first one.
fn create_library(root: &Path) {
    for i in 0..99 {
        write_file(
            &root.join(format!("shelf_{}", i % 5)),
            &format!("book_{:03}.epub", i),
            format!("contents of book number {}", i).as_bytes(),
        );
    }
    write_file(&root.join("zz_copies"), "book_000_copy.epub", b"contents of book number 0");
}

#[test]
fn test_scan_catalogs_library_with_one_duplicate_pair() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);

    let db = Database::open_in_memory().unwrap();
    let root_row = db.add_root(&root.to_string_lossy(), "library").unwrap();
    let engine = ScanEngine::new(test_config());

    let job = engine.scan(&db, Some(root_row.id), false, &SilentReporter).unwrap();

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.total_files, 100);
    assert_eq!(job.processed_files, 100);
    assert_eq!(job.new_files, 100);
    assert_eq!(job.duplicate_files, 1);
    assert!((job.progress() - 1.0).abs() < f64::EPSILON);

    let entries = db.all_entries().unwrap();
    assert_eq!(entries.len(), 100);
    assert_eq!(entries.iter().filter(|e| !e.is_duplicate).count(), 99);

    let original = entry_at(&db, &root.join("shelf_0").join("book_000.epub"));
    let copy = entry_at(&db, &root.join("zz_copies").join("book_000_copy.epub"));
    assert!(!original.is_duplicate);
    assert!(copy.is_duplicate);
    assert_eq!(copy.duplicate_of_id, Some(original.id));
    assert_eq!(copy.duplicate_reason.as_deref(), Some("exact_hash"));

    let stats = duplicates::stats(&db).unwrap();
    assert_eq!(stats.groups, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.wasted_bytes, copy.size as u64);

    assert_duplicate_invariant(&db);
}

#[test]
fn test_rescan_of_unchanged_root_is_idempotent() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);

    let db = Database::open_in_memory().unwrap();
    let root_row = db.add_root(&root.to_string_lossy(), "").unwrap();
    let engine = ScanEngine::new(test_config());

    engine.scan(&db, Some(root_row.id), false, &SilentReporter).unwrap();
    let queued_before = db.queue_stats().unwrap().pending;
    // Default tasks for 99 canonical entries.
    assert_eq!(queued_before, 99 * 2);

    let job = engine.scan(&db, Some(root_row.id), false, &SilentReporter).unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.new_files, 0);
    assert_eq!(job.updated_files, 0);
    assert_eq!(job.duplicate_files, 0);
    assert_eq!(db.count_entries().unwrap(), 100);
    assert_eq!(db.queue_stats().unwrap().pending, queued_before);
}

#[test]
fn test_forced_rescan_rehashes_without_counting_updates() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    write_file(&root, "a.pdf", b"alpha");
    write_file(&root, "b.pdf", b"beta");

    let db = Database::open_in_memory().unwrap();
    db.add_root(&root.to_string_lossy(), "").unwrap();
    let engine = ScanEngine::new(test_config());
    engine.scan(&db, None, false, &SilentReporter).unwrap();

    let job = engine.scan(&db, None, true, &SilentReporter).unwrap();
    assert!(job.force);
    assert_eq!(job.new_files, 0);
    assert_eq!(job.updated_files, 0);
}

#[test]
fn test_changed_file_is_updated_and_requeued() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    write_file(&root, "notes.txt", b"first draft");

    let db = Database::open_in_memory().unwrap();
    db.add_root(&root.to_string_lossy(), "").unwrap();
    let engine = ScanEngine::new(test_config());
    engine.scan(&db, None, false, &SilentReporter).unwrap();

    let before = entry_at(&db, &root.join("notes.txt"));
    let item = db.claim_next().unwrap().unwrap();
    db.complete_item(&item).unwrap();

    write_file(&root, "notes.txt", b"second draft, considerably longer");
    let job = engine.scan(&db, None, false, &SilentReporter).unwrap();
    assert_eq!(job.updated_files, 1);
    assert_eq!(job.new_files, 0);

    let after = entry_at(&db, &root.join("notes.txt"));
    assert_eq!(after.id, before.id);
    assert_ne!(after.fingerprint, before.fingerprint);
    assert!(!after.cover_extracted);
    assert!(!after.text_extracted);

    // The completed task can be queued again; the still pending one is not duplicated.
    let stats = db.queue_stats().unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.completed, 1);
}

#[test]
fn test_changed_canonical_hands_group_to_remaining_copy() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    write_file(&root, "a.epub", b"same bytes");
    write_file(&root, "b.epub", b"same bytes");
    write_file(&root, "c.epub", b"same bytes");

    let db = Database::open_in_memory().unwrap();
    db.add_root(&root.to_string_lossy(), "").unwrap();
    let engine = ScanEngine::new(test_config());
    engine.scan(&db, None, false, &SilentReporter).unwrap();

    let a = entry_at(&db, &root.join("a.epub"));
    assert!(!a.is_duplicate);

    write_file(&root, "a.epub", b"now something else entirely");
    engine.scan(&db, None, false, &SilentReporter).unwrap();

    let a = entry_at(&db, &root.join("a.epub"));
    let b = entry_at(&db, &root.join("b.epub"));
    let c = entry_at(&db, &root.join("c.epub"));
    assert!(!a.is_duplicate);
    assert!(!b.is_duplicate);
    assert_eq!(c.duplicate_of_id, Some(b.id));
    assert_duplicate_invariant(&db);
}

#[test]
fn test_excluded_file_is_not_cataloged() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    write_file(&root, "scratch.tmp", b"temporary");
    write_file(&root, "novel.epub", b"a novel");

    let db = Database::open_in_memory().unwrap();
    db.add_root(&root.to_string_lossy(), "").unwrap();
    let rule_id = db
        .insert_rule(
            &NewExclusionRule {
                rule_type: RuleType::Filename,
                pattern: "*.tmp".to_string(),
                description: String::new(),
                priority: 90,
                enabled: true,
            },
            false,
        )
        .unwrap();

    let job = ScanEngine::new(test_config())
        .scan(&db, None, false, &SilentReporter)
        .unwrap();

    assert_eq!(job.excluded_files, 1);
    assert_eq!(db.count_entries().unwrap(), 1);
    assert!(db
        .get_entry_by_path(&root.join("scratch.tmp").to_string_lossy())
        .unwrap()
        .is_none());
    assert_eq!(db.get_rule(rule_id).unwrap().unwrap().files_excluded, 1);
}

#[test]
fn test_exclusion_override_keeps_entry_cataloged() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    write_file(&root, "keep.tmp", b"important after all");

    let db = Database::open_in_memory().unwrap();
    db.add_root(&root.to_string_lossy(), "").unwrap();
    let engine = ScanEngine::new(test_config());
    engine.scan(&db, None, false, &SilentReporter).unwrap();

    let entry = entry_at(&db, &root.join("keep.tmp"));
    db.set_exclusion_override(entry.id, true).unwrap();
    db.insert_rule(
        &NewExclusionRule {
            rule_type: RuleType::Filename,
            pattern: "*.tmp".to_string(),
            description: String::new(),
            priority: 50,
            enabled: true,
        },
        false,
    )
    .unwrap();

    write_file(&root, "keep.tmp", b"important after all, edited");
    let job = engine.scan(&db, None, false, &SilentReporter).unwrap();
    assert_eq!(job.excluded_files, 0);
    assert_eq!(job.updated_files, 1);
}

#[test]
fn test_deleted_files_are_flagged_missing_and_restored() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    write_file(&root, "a.pdf", b"alpha");
    write_file(&root, "b.pdf", b"beta");

    let db = Database::open_in_memory().unwrap();
    db.add_root(&root.to_string_lossy(), "").unwrap();
    let engine = ScanEngine::new(test_config());
    engine.scan(&db, None, false, &SilentReporter).unwrap();

    let moved = tmp.path().join("b.pdf.bak");
    fs::rename(root.join("b.pdf"), &moved).unwrap();
    engine.scan(&db, None, false, &SilentReporter).unwrap();

    let b = entry_at(&db, &root.join("b.pdf"));
    assert!(b.is_missing);
    assert!(b.missing_since.is_some());
    assert!(!entry_at(&db, &root.join("a.pdf")).is_missing);

    fs::rename(&moved, root.join("b.pdf")).unwrap();
    let job = engine.scan(&db, None, false, &SilentReporter).unwrap();
    let b = entry_at(&db, &root.join("b.pdf"));
    assert!(!b.is_missing);
    assert!(b.missing_since.is_none());
    assert_eq!(job.new_files, 0);
}

#[test]
fn test_missing_canonical_hands_group_to_copy_on_disk() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    write_file(&root, "a.epub", b"identical bytes");
    write_file(&root, "b.epub", b"identical bytes");

    let db = Database::open_in_memory().unwrap();
    db.add_root(&root.to_string_lossy(), "").unwrap();
    let engine = ScanEngine::new(test_config());
    engine.scan(&db, None, false, &SilentReporter).unwrap();

    let a = entry_at(&db, &root.join("a.epub"));
    let b = entry_at(&db, &root.join("b.epub"));
    assert!(!a.is_duplicate);
    assert_eq!(b.duplicate_of_id, Some(a.id));

    fs::remove_file(root.join("a.epub")).unwrap();
    engine.scan(&db, None, false, &SilentReporter).unwrap();

    let a = entry_at(&db, &root.join("a.epub"));
    let b = entry_at(&db, &root.join("b.epub"));
    assert!(a.is_missing);
    assert!(!b.is_duplicate);
    assert!(b.duplicate_of_id.is_none());
    assert_eq!(a.duplicate_of_id, Some(b.id));
    assert!(duplicates::duplicate_groups(&db).unwrap().is_empty());
    assert_duplicate_invariant(&db);

    // The new canonical picks up the background work the copy never got.
    let b_tasks = db
        .list_queue_items(None, 100)
        .unwrap()
        .into_iter()
        .filter(|item| item.entry_id == b.id)
        .count();
    assert_eq!(b_tasks, 2);

    // Coming back does not take the group back.
    write_file(&root, "a.epub", b"identical bytes");
    engine.scan(&db, None, false, &SilentReporter).unwrap();
    let a = entry_at(&db, &root.join("a.epub"));
    assert!(!a.is_missing);
    assert_eq!(a.duplicate_of_id, Some(b.id));
    assert_duplicate_invariant(&db);
}

/// Cancels the active job from a second connection once the first batch lands.
struct CancelAfterFirstBatch {
    db_path: PathBuf,
    fired: AtomicBool,
}

impl ProgressReporter for CancelAfterFirstBatch {
    fn on_batch_complete(&self, _processed: usize, _total: usize) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let db = Database::open(&self.db_path).unwrap();
        let job = db.active_scan_job().unwrap().unwrap();
        db.cancel_scan_job(job.id).unwrap();
    }
}

#[test]
fn test_cancel_between_batches_stops_cataloging() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);
    let db_path = tmp.path().join("catalog.db");

    let db = Database::open(&db_path).unwrap();
    db.add_root(&root.to_string_lossy(), "").unwrap();
    let reporter = CancelAfterFirstBatch {
        db_path: db_path.clone(),
        fired: AtomicBool::new(false),
    };

    let job = ScanEngine::new(test_config())
        .scan(&db, None, false, &reporter)
        .unwrap();

    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.total_files, 100);
    assert_eq!(job.processed_files, 7);
    assert!(job.processed_files < job.total_files);
    // The committed batch stays; nothing after it is written.
    assert_eq!(db.count_entries().unwrap(), 7);
    assert!(db.active_scan_job().unwrap().is_none());
}

#[test]
fn test_missing_root_fails_job() {
    let tmp = tempdir().unwrap();
    let db = Database::open_in_memory().unwrap();
    let root = db
        .add_root(&tmp.path().join("gone").to_string_lossy(), "")
        .unwrap();

    let job = ScanEngine::new(test_config())
        .scan(&db, Some(root.id), false, &SilentReporter)
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.phase.contains("missing"));
    assert!(job.completed_at.is_some());
    // A failed job does not block the next one.
    assert!(db.active_scan_job().unwrap().is_none());
}

#[test]
fn test_unknown_root_is_rejected_before_creating_a_job() {
    let db = Database::open_in_memory().unwrap();
    let err = ScanEngine::new(test_config())
        .scan(&db, Some(42), false, &SilentReporter)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert!(db.scan_job_history(10).unwrap().is_empty());
}

#[test]
fn test_scan_rejected_while_another_job_is_active() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    write_file(&root, "a.pdf", b"alpha");

    let db = Database::open_in_memory().unwrap();
    db.add_root(&root.to_string_lossy(), "").unwrap();
    let active = db.create_scan_job(None, false).unwrap();

    let err = ScanEngine::new(test_config())
        .scan(&db, None, false, &SilentReporter)
        .unwrap_err();
    assert!(matches!(err, Error::ScanInProgress(id) if id == active.id));
    assert_eq!(db.count_entries().unwrap(), 0);
}

#[test]
fn test_nested_root_is_covered_by_outer_root() {
    let tmp = tempdir().unwrap();
    let outer = tmp.path().join("library");
    let inner = outer.join("comics");
    write_file(&outer, "novel.epub", b"a novel");
    write_file(&inner, "issue1.cbz", b"an issue");

    let db = Database::open_in_memory().unwrap();
    let outer_root = db.add_root(&outer.to_string_lossy(), "").unwrap();
    db.add_root(&inner.to_string_lossy(), "").unwrap();

    let job = ScanEngine::new(test_config())
        .scan(&db, None, false, &SilentReporter)
        .unwrap();

    assert_eq!(job.total_files, 2);
    assert_eq!(job.new_files, 2);
    let issue = entry_at(&db, &inner.join("issue1.cbz"));
    assert_eq!(issue.root_id, Some(outer_root.id));
}

#[test]
fn test_extension_filter_and_enqueue_tasks_from_config() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    write_file(&root, "book.PDF", b"pdf bytes");
    write_file(&root, "cover.jpg", b"jpg bytes");

    let db = Database::open_in_memory().unwrap();
    db.add_root(&root.to_string_lossy(), "").unwrap();
    let config = AppConfig {
        scan: ScanConfig {
            extensions: vec!["pdf".to_string()],
            enqueue_tasks: vec![TaskType::Identify],
            ..ScanConfig::default()
        },
        ..AppConfig::default()
    };

    let job = ScanEngine::new(config)
        .scan(&db, None, false, &SilentReporter)
        .unwrap();

    assert_eq!(job.total_files, 1);
    let items = db.list_queue_items(None, 10).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].task_type, "identify");
}

#[test]
fn test_background_scan_uses_its_own_connection() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);
    let db_path = tmp.path().join("catalog.db");

    {
        let db = Database::open(&db_path).unwrap();
        db.add_root(&root.to_string_lossy(), "").unwrap();
    }

    let engine = ScanEngine::new(test_config()).with_db_path(&db_path);
    let handle = engine.start(None, false, Arc::new(SilentReporter)).unwrap();
    let job_id = handle.job_id;
    let job = handle.join().unwrap();

    assert_eq!(job.id, job_id);
    assert_eq!(job.status, JobStatus::Complete);
    let db = Database::open(&db_path).unwrap();
    assert_eq!(db.count_entries().unwrap(), 100);
    assert_eq!(ScanEngine::history(&db, 5).unwrap().len(), 1);
}
