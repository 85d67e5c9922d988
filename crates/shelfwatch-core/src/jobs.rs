//! Scan job tracking.
//!
//! A job moves `pending → scanning → hashing → processing → complete`, and
//! may end `failed` or `cancelled` from any non-terminal state. At most one
//! job is non-terminal at a time; creation checks and inserts in a single
//! statement so two callers cannot both win.

use crate::storage::models::{JobStatus, ScanJob};
use crate::storage::sqlite::now;
use crate::storage::Database;
use crate::Error;
use rusqlite::{params, OptionalExtension};
use tracing::{info, warn};

/// Error messages kept per job. Later errors are only counted.
pub const MAX_RECORDED_ERRORS: usize = 100;

const ACTIVE_STATUSES: &str = "('pending', 'scanning', 'hashing', 'processing')";

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    fn stage(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Scanning => 1,
            JobStatus::Hashing => 2,
            JobStatus::Processing => 3,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled => 4,
        }
    }

    /// Forward moves only; `failed` and `cancelled` are reachable from any live state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Failed | JobStatus::Cancelled => true,
            JobStatus::Complete => *self == JobStatus::Processing,
            _ => next.stage() == self.stage() + 1,
        }
    }
}

impl ScanJob {
    /// Fraction of discovered files handled so far, 0 when nothing was discovered.
    pub fn progress(&self) -> f64 {
        if self.total_files <= 0 {
            0.0
        } else {
            (self.processed_files as f64 / self.total_files as f64).min(1.0)
        }
    }
}

/// Running totals for one scan, written back to the job row after each batch.
#[derive(Debug, Clone, Default)]
pub struct ScanCounters {
    pub total_files: i64,
    pub processed_files: i64,
    pub new_files: i64,
    pub updated_files: i64,
    pub duplicate_files: i64,
    pub excluded_files: i64,
    pub error_count: i64,
    pub errors: Vec<String>,
}

impl ScanCounters {
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(message.into());
        }
    }
}

impl Database {
    /// Create a pending job unless another job is still live.
    pub fn create_scan_job(&self, root_id: Option<i64>, force: bool) -> Result<ScanJob, Error> {
        let inserted = self.connection().execute(
            &format!(
                "INSERT INTO scan_job (root_id, status, phase, force, created_at) \
                 SELECT ?1, 'pending', 'Queued', ?2, ?3 \
                 WHERE NOT EXISTS (SELECT 1 FROM scan_job WHERE status IN {})",
                ACTIVE_STATUSES
            ),
            params![root_id, force, now()],
        )?;

        if inserted == 0 {
            let active = self
                .active_scan_job()?
                .map(|job| job.id)
                .unwrap_or_default();
            return Err(Error::ScanInProgress(active));
        }

        let id = self.connection().last_insert_rowid();
        self.get_scan_job(id)?.ok_or(Error::not_found("scan job", id))
    }

    pub fn get_scan_job(&self, id: i64) -> Result<Option<ScanJob>, Error> {
        Ok(self
            .connection()
            .query_row(
                &format!("SELECT {} FROM scan_job WHERE id = ?1", ScanJob::COLUMNS),
                params![id],
                ScanJob::from_row,
            )
            .optional()?)
    }

    pub fn active_scan_job(&self) -> Result<Option<ScanJob>, Error> {
        Ok(self
            .connection()
            .query_row(
                &format!(
                    "SELECT {} FROM scan_job WHERE status IN {} ORDER BY id DESC LIMIT 1",
                    ScanJob::COLUMNS,
                    ACTIVE_STATUSES
                ),
                [],
                ScanJob::from_row,
            )
            .optional()?)
    }

    /// The live job if there is one, otherwise the most recent job.
    pub fn scan_status(&self) -> Result<Option<ScanJob>, Error> {
        if let Some(job) = self.active_scan_job()? {
            return Ok(Some(job));
        }
        Ok(self.scan_job_history(1)?.into_iter().next())
    }

    pub fn scan_job_history(&self, limit: i64) -> Result<Vec<ScanJob>, Error> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM scan_job ORDER BY id DESC LIMIT ?1",
            ScanJob::COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![limit], ScanJob::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Move a job to `next`. Fails with `Cancelled` if the job was cancelled
    /// in the meantime, or a validation error for a backwards move.
    pub fn transition_scan_job(
        &self,
        id: i64,
        next: JobStatus,
        phase: &str,
    ) -> Result<ScanJob, Error> {
        let job = self
            .get_scan_job(id)?
            .ok_or(Error::not_found("scan job", id))?;

        if job.status == JobStatus::Cancelled {
            return Err(Error::Cancelled);
        }
        if !job.status.can_transition_to(next) {
            return Err(Error::Validation(format!(
                "scan job {} cannot move from {} to {}",
                id, job.status, next
            )));
        }

        let now = now();
        let started_at = match job.status {
            JobStatus::Pending => Some(now.clone()),
            _ => job.started_at.clone(),
        };
        let completed_at = next.is_terminal().then(|| now.clone());

        let updated = self.connection().execute(
            "UPDATE scan_job SET status = ?1, phase = ?2, started_at = ?3, completed_at = ?4 \
             WHERE id = ?5 AND status = ?6",
            params![next, phase, started_at, completed_at, id, job.status],
        )?;

        if updated == 0 {
            // Lost a race with cancel().
            return Err(Error::Cancelled);
        }

        self.get_scan_job(id)?.ok_or(Error::not_found("scan job", id))
    }

    pub fn update_scan_progress(
        &self,
        id: i64,
        counters: &ScanCounters,
        current_file: Option<&str>,
    ) -> Result<(), Error> {
        let errors = serde_json::to_string(&counters.errors).unwrap_or_else(|_| "[]".to_string());
        self.connection().execute(
            "UPDATE scan_job SET total_files = ?1, processed_files = ?2, new_files = ?3, \
             updated_files = ?4, duplicate_files = ?5, excluded_files = ?6, error_count = ?7, \
             errors = ?8, current_file = ?9 WHERE id = ?10",
            params![
                counters.total_files,
                counters.processed_files,
                counters.new_files,
                counters.updated_files,
                counters.duplicate_files,
                counters.excluded_files,
                counters.error_count,
                errors,
                current_file,
                id
            ],
        )?;
        Ok(())
    }

    /// Request cancellation. The scanner notices at its next batch boundary.
    pub fn cancel_scan_job(&self, id: i64) -> Result<ScanJob, Error> {
        let updated = self.connection().execute(
            &format!(
                "UPDATE scan_job SET status = 'cancelled', phase = 'Cancelled', completed_at = ?1 \
                 WHERE id = ?2 AND status IN {}",
                ACTIVE_STATUSES
            ),
            params![now(), id],
        )?;

        let job = self
            .get_scan_job(id)?
            .ok_or(Error::not_found("scan job", id))?;
        if updated == 0 {
            return Err(Error::Validation(format!(
                "scan job {} already finished ({})",
                id, job.status
            )));
        }
        info!("Scan job {} cancelled", id);
        Ok(job)
    }

    pub fn fail_scan_job(&self, id: i64, message: &str) -> Result<(), Error> {
        self.connection().execute(
            &format!(
                "UPDATE scan_job SET status = 'failed', phase = ?1, completed_at = ?2 \
                 WHERE id = ?3 AND status IN {}",
                ACTIVE_STATUSES
            ),
            params![format!("Failed: {}", message), now(), id],
        )?;
        Ok(())
    }

    pub fn is_scan_cancelled(&self, id: i64) -> Result<bool, Error> {
        let status: Option<JobStatus> = self
            .connection()
            .query_row(
                "SELECT status FROM scan_job WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status == Some(JobStatus::Cancelled))
    }

    /// Fail jobs left live by a process that died mid-scan. Run at startup,
    /// before any new scan is started.
    pub fn recover_interrupted_jobs(&self) -> Result<usize, Error> {
        let recovered = self.connection().execute(
            &format!(
                "UPDATE scan_job SET status = 'failed', phase = 'Interrupted', completed_at = ?1 \
                 WHERE status IN {}",
                ACTIVE_STATUSES
            ),
            params![now()],
        )?;
        if recovered > 0 {
            warn!("Marked {} interrupted scan job(s) as failed", recovered);
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Scanning));
        assert!(JobStatus::Scanning.can_transition_to(JobStatus::Hashing));
        assert!(JobStatus::Hashing.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Complete));
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Hashing));
        assert!(!JobStatus::Hashing.can_transition_to(JobStatus::Scanning));
        assert!(!JobStatus::Scanning.can_transition_to(JobStatus::Complete));
    }

    #[test]
    fn test_terminal_states_reachable_from_live_states() {
        for status in [
            JobStatus::Pending,
            JobStatus::Scanning,
            JobStatus::Hashing,
            JobStatus::Processing,
        ] {
            assert!(status.can_transition_to(JobStatus::Failed));
            assert!(status.can_transition_to(JobStatus::Cancelled));
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for status in [JobStatus::Complete, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(status.is_terminal());
            for next in JobStatus::ALL {
                assert!(!status.can_transition_to(*next));
            }
        }
    }

    #[test]
    fn test_error_list_is_bounded() {
        let mut counters = ScanCounters::default();
        for i in 0..(MAX_RECORDED_ERRORS + 5) {
            counters.record_error(format!("error {}", i));
        }
        assert_eq!(counters.error_count, (MAX_RECORDED_ERRORS + 5) as i64);
        assert_eq!(counters.errors.len(), MAX_RECORDED_ERRORS);
    }
}
