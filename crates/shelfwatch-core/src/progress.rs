use crate::storage::models::{JobStatus, ScanJob};

/// Trait for reporting scan progress.
///
/// The CLI implements it with indicatif bars. All methods have default no-op
/// implementations; the job row in the database stays the source of truth.
pub trait ProgressReporter: Send + Sync {
    fn on_phase(&self, _job_id: i64, _status: JobStatus, _phase: &str) {}
    fn on_discovery_progress(&self, _files_found: usize, _current_path: &str) {}
    fn on_discovery_complete(&self, _total_files: usize, _duration_secs: f64) {}
    fn on_batch_complete(&self, _processed: usize, _total: usize) {}
    fn on_scan_complete(&self, _job: &ScanJob, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
