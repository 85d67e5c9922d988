use crate::config::{self, AppConfig};
use crate::duplicates;
use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::scanner::CatalogScanner;
use crate::storage::models::{JobStatus, ScanJob, WatchedRoot};
use crate::storage::Database;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{error, info, warn};

/// Runs scan jobs against the catalog.
pub struct ScanEngine {
    config: AppConfig,
    db_path: PathBuf,
}

/// A scan running on its own thread. The job id is known up front so the
/// caller can poll status or cancel while it runs.
pub struct ScanHandle {
    pub job_id: i64,
    join: JoinHandle<Result<ScanJob, Error>>,
}

impl ScanHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the scan thread and return the final job row.
    pub fn join(self) -> Result<ScanJob, Error> {
        self.join
            .join()
            .map_err(|_| Error::Other("scan thread panicked".to_string()))?
    }
}

impl ScanEngine {
    pub fn new(config: AppConfig) -> Self {
        let db_path = PathBuf::from(&config.database_path);
        Self { config, db_path }
    }

    pub fn with_db_path(mut self, path: impl AsRef<Path>) -> Self {
        self.db_path = path.as_ref().to_path_buf();
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Roots covered by a scan request. Scanning everything skips disabled
    /// roots and roots nested inside another scanned root.
    fn target_roots(db: &Database, root_id: Option<i64>) -> Result<Vec<WatchedRoot>, Error> {
        match root_id {
            Some(id) => {
                let root = db.get_root(id)?.ok_or(Error::not_found("watched root", id))?;
                Ok(vec![root])
            }
            None => {
                let enabled: Vec<WatchedRoot> =
                    db.list_roots()?.into_iter().filter(|r| r.enabled).collect();
                let outer = config::non_overlapping_directories(
                    enabled.iter().map(|r| r.path.clone()).collect(),
                );
                Ok(enabled
                    .into_iter()
                    .filter(|r| outer.contains(&r.path))
                    .collect())
            }
        }
    }

    /// Create a job and run it to the end on the calling thread. Fails with
    /// `ScanInProgress` if another job is live; otherwise the outcome,
    /// including failure or cancellation, is in the returned job.
    pub fn scan(
        &self,
        db: &Database,
        root_id: Option<i64>,
        force: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanJob, Error> {
        let roots = Self::target_roots(db, root_id)?;
        let job = db.create_scan_job(root_id, force)?;
        self.run_job(db, job.id, &roots, force, reporter)
    }

    /// Create a job here, then run it on a background thread with its own
    /// database connection.
    pub fn start(
        &self,
        root_id: Option<i64>,
        force: bool,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<ScanHandle, Error> {
        let db = Database::open(&self.db_path)?;
        let roots = Self::target_roots(&db, root_id)?;
        let job = db.create_scan_job(root_id, force)?;
        let job_id = job.id;

        let engine = ScanEngine {
            config: self.config.clone(),
            db_path: self.db_path.clone(),
        };
        let join = thread::Builder::new()
            .name(format!("shelfwatch-scan-{}", job_id))
            .spawn(move || {
                let db = Database::open(&engine.db_path)?;
                engine.run_job(&db, job_id, &roots, force, reporter.as_ref())
            })?;

        Ok(ScanHandle { job_id, join })
    }

    fn run_job(
        &self,
        db: &Database,
        job_id: i64,
        roots: &[WatchedRoot],
        force: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanJob, Error> {
        let started = Instant::now();
        match self.run_phases(db, job_id, roots, force, reporter) {
            Ok(()) => {}
            Err(Error::Cancelled) => warn!("Scan job {} was cancelled", job_id),
            Err(err) => {
                error!("Scan job {} failed: {}", job_id, err);
                db.fail_scan_job(job_id, &err.to_string())?;
            }
        }

        let job = db
            .get_scan_job(job_id)?
            .ok_or(Error::not_found("scan job", job_id))?;
        let elapsed = started.elapsed().as_secs_f64();
        info!(
            "Scan job {} finished as {} in {:.2}s: {} new, {} updated, {} duplicates, {} excluded, {} errors",
            job.id,
            job.status,
            elapsed,
            job.new_files,
            job.updated_files,
            job.duplicate_files,
            job.excluded_files,
            job.error_count
        );
        reporter.on_scan_complete(&job, elapsed);
        Ok(job)
    }

    fn transition(
        db: &Database,
        job_id: i64,
        next: JobStatus,
        phase: &str,
        reporter: &dyn ProgressReporter,
    ) -> Result<(), Error> {
        db.transition_scan_job(job_id, next, phase)?;
        info!("Scan job {}: {}", job_id, phase);
        reporter.on_phase(job_id, next, phase);
        Ok(())
    }

    /// Discovery, then fingerprinting and cataloging, then post-processing.
    fn run_phases(
        &self,
        db: &Database,
        job_id: i64,
        roots: &[WatchedRoot],
        force: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<(), Error> {
        let mut scanner = CatalogScanner::new(db, &self.config, job_id, force, reporter)?;

        Self::transition(db, job_id, JobStatus::Scanning, "Discovering files", reporter)?;
        let discovery_start = Instant::now();
        let mut discovered = Vec::with_capacity(roots.len());
        for root in roots {
            info!("Scanning {}", root.path);
            let files = scanner.discover(root)?;
            discovered.push((root, files));
        }
        db.update_scan_progress(job_id, scanner.counters(), None)?;
        reporter.on_discovery_complete(
            scanner.counters().total_files.max(0) as usize,
            discovery_start.elapsed().as_secs_f64(),
        );

        Self::transition(db, job_id, JobStatus::Hashing, "Fingerprinting files", reporter)?;
        for (root, files) in discovered {
            scanner.process(root, files)?;
        }

        Self::transition(db, job_id, JobStatus::Processing, "Updating catalog", reporter)?;
        for root in roots {
            scanner.finish_root(root)?;
        }
        duplicates::orphan_sweep(db)?;
        db.update_scan_progress(job_id, scanner.counters(), None)?;

        Self::transition(db, job_id, JobStatus::Complete, "Complete", reporter)
    }

    /// Request cancellation of a live job.
    pub fn cancel(db: &Database, job_id: i64) -> Result<ScanJob, Error> {
        db.cancel_scan_job(job_id)
    }

    pub fn status(db: &Database) -> Result<Option<ScanJob>, Error> {
        db.scan_status()
    }

    pub fn history(db: &Database, limit: i64) -> Result<Vec<ScanJob>, Error> {
        db.scan_job_history(limit)
    }
}
