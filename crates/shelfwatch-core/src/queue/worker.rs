use super::handler::HandlerRegistry;
use super::TaskType;
use crate::config::WorkerConfig;
use crate::storage::models::{QueueItem, QueueStatus};
use crate::storage::Database;
use crate::Error;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// What happened to one claimed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed,
    Retrying,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub reset: usize,
    pub processed: usize,
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
}

/// Drains the processing queue, one item at a time, on whatever thread calls
/// [`Worker::run`]. The worker owns its database connection.
pub struct Worker {
    db: Database,
    registry: HandlerRegistry,
    config: WorkerConfig,
    cancel_token: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(db: Database, registry: HandlerRegistry, config: WorkerConfig) -> Self {
        Self {
            db,
            registry,
            config,
            cancel_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_token)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token.load(Ordering::Relaxed)
    }

    /// Sweep stuck items, then process up to `batch_size` items.
    pub fn tick(&self) -> Result<TickSummary, Error> {
        let mut summary = TickSummary {
            reset: self.db.reset_stuck_items(self.config.stuck_timeout_secs)?,
            ..Default::default()
        };

        while summary.processed < self.config.batch_size.max(1) && !self.is_cancelled() {
            let Some(item) = self.db.claim_next()? else {
                break;
            };
            summary.processed += 1;
            match self.process_item(&item)? {
                ItemOutcome::Completed => summary.completed += 1,
                ItemOutcome::Retrying => summary.retrying += 1,
                ItemOutcome::Failed => summary.failed += 1,
            }
        }

        if summary.processed > 0 {
            debug!("Worker tick: {:?}", summary);
        }
        Ok(summary)
    }

    /// Run the handler for a claimed item and record the result.
    pub fn process_item(&self, item: &QueueItem) -> Result<ItemOutcome, Error> {
        let task = match item.task_type.parse::<TaskType>() {
            Ok(task) => task,
            Err(_) => {
                let message = format!("Unknown task type '{}'", item.task_type);
                return self.record_failure(item, &message, true);
            }
        };

        let Some(handler) = self.registry.get(task) else {
            let message = format!("No handler registered for {}", task);
            return self.record_failure(item, &message, true);
        };

        let entry = match self.db.get_entry(item.entry_id)? {
            Some(entry) if !entry.is_missing => entry,
            Some(_) => return self.record_failure(item, "File is missing from disk", true),
            None => return self.record_failure(item, "Catalog entry no longer exists", true),
        };

        debug!("Running {} for {}", task, entry.path);
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.run(&entry)));

        match result {
            Ok(Ok(())) => {
                self.db.complete_item(item)?;
                Ok(ItemOutcome::Completed)
            }
            Ok(Err(err)) => {
                let permanent = err.is_permanent();
                self.record_failure(item, &err.to_string(), permanent)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Handler for {} panicked on {}: {}", task, entry.path, message);
                self.record_failure(item, &format!("Handler panicked: {}", message), false)
            }
        }
    }

    fn record_failure(
        &self,
        item: &QueueItem,
        message: &str,
        permanent: bool,
    ) -> Result<ItemOutcome, Error> {
        match self.db.fail_item(item, message, permanent)? {
            QueueStatus::Pending => Ok(ItemOutcome::Retrying),
            _ => Ok(ItemOutcome::Failed),
        }
    }

    /// Process until cancelled, sleeping for the poll interval when idle.
    /// Errors from a tick are logged and the loop carries on.
    pub fn run(&self) {
        info!(
            "Worker started with handlers for {:?}",
            self.registry.task_types()
        );
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        while !self.is_cancelled() {
            let idle = match self.tick() {
                Ok(summary) => summary.processed == 0,
                Err(err) => {
                    error!("Worker tick failed: {}", err);
                    true
                }
            };
            if idle {
                self.sleep(poll);
            }
        }
        info!("Worker stopped");
    }

    fn sleep(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() && !self.is_cancelled() {
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }

    /// Open a dedicated connection and run the worker on its own thread.
    pub fn spawn(
        db_path: impl AsRef<Path>,
        registry: HandlerRegistry,
        config: WorkerConfig,
    ) -> Result<WorkerHandle, Error> {
        let db = Database::open(db_path)?;
        let worker = Worker::new(db, registry, config);
        let cancel_token = worker.cancel_token();
        let join = thread::Builder::new()
            .name("shelfwatch-worker".to_string())
            .spawn(move || worker.run())?;
        Ok(WorkerHandle { cancel_token, join })
    }
}

pub struct WorkerHandle {
    cancel_token: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_token)
    }

    /// Ask the worker to stop after its current item and wait for it.
    pub fn stop(self) {
        self.cancel_token.store(true, Ordering::Relaxed);
        if self.join.join().is_err() {
            warn!("Worker thread panicked during shutdown");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

