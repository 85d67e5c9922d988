use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use shelfwatch_core::storage::models::{JobStatus, ScanJob};
use shelfwatch_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Discovery: spinner (file count unknown upfront)
/// - Fingerprinting: progress bar over the discovered files
/// - Catalog update: spinner
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars(TICK_CHARS));
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.cyan} Fingerprinting [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining)",
        ) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICK_CHARS));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }
}

impl ProgressReporter for CliReporter {
    fn on_phase(&self, _job_id: i64, status: JobStatus, phase: &str) {
        match status {
            JobStatus::Scanning => self.set_bar(Self::spinner(&format!("{}...", phase))),
            JobStatus::Hashing => self.set_bar(Self::bar(0)),
            JobStatus::Processing => self.set_bar(Self::spinner(&format!("{}...", phase))),
            _ => self.finish_bar(),
        }
    }

    fn on_discovery_progress(&self, files_found: usize, _current_path: &str) {
        self.with_bar(|pb| pb.set_message(format!("Discovering... {} files found", files_found)));
    }

    fn on_discovery_complete(&self, total_files: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  {} Discovery complete: {} files in {:.2}s",
            "✓".green(),
            total_files,
            duration_secs
        );
    }

    fn on_batch_complete(&self, processed: usize, total: usize) {
        self.with_bar(|pb| {
            if pb.length() != Some(total as u64) {
                pb.set_length(total as u64);
            }
            pb.set_position(processed as u64);
        });
    }

    fn on_scan_complete(&self, job: &ScanJob, duration_secs: f64) {
        self.finish_bar();
        let mark = match job.status {
            JobStatus::Complete => "✓".green(),
            JobStatus::Cancelled => "■".yellow(),
            _ => "✗".red(),
        };
        eprintln!(
            "  {} Scan job {} {} in {:.2}s",
            mark, job.id, job.status, duration_secs
        );
    }
}
