//! Durable processing queue.
//!
//! Items are dispatched by priority (highest first), then age (oldest
//! first), then entry size (largest first). Claiming marks an item
//! `processing` and counts the attempt before its handler runs, so a crash
//! leaves the item visible in `processing` until the stuck sweep returns it.
//! The claim is only safe with a single worker owning the queue.

pub mod handler;
pub mod worker;

use crate::storage::models::{text_enum, QueueItem, QueueStatus};
use crate::storage::sqlite::{now, now_offset_secs};
use crate::storage::Database;
use crate::Error;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub use handler::{HandlerError, HandlerRegistry, TaskHandler};
pub use worker::{ItemOutcome, TickSummary, Worker, WorkerHandle};

/// Longest error message stored on a queue item.
pub const MAX_ERROR_LEN: usize = 500;

/// Kinds of downstream work, each implemented by an external handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Cover,
    Text,
    OcrText,
    FtsIndex,
    Embed,
    Identify,
}

text_enum!(TaskType {
    Cover => "cover",
    Text => "text",
    OcrText => "ocr_text",
    FtsIndex => "fts_index",
    Embed => "embed",
    Identify => "identify",
});

impl TaskType {
    /// Cheap, user-visible work first.
    pub fn default_priority(&self) -> i64 {
        match self {
            TaskType::Cover => 9,
            TaskType::Text => 7,
            TaskType::FtsIndex => 6,
            TaskType::Identify => 5,
            TaskType::OcrText => 3,
            TaskType::Embed => 2,
        }
    }

    /// Catalog column set once this task has completed for an entry.
    fn flag_column(&self) -> &'static str {
        match self {
            TaskType::Cover => "cover_extracted",
            TaskType::Text => "text_extracted",
            TaskType::OcrText => "ocr_extracted",
            TaskType::FtsIndex => "fts_indexed",
            TaskType::Embed => "embedded",
            TaskType::Identify => "identified",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    /// task type → status → count
    pub by_task: BTreeMap<String, BTreeMap<String, i64>>,
}

fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_LEN) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

impl Database {
    /// Add work for an entry. Returns `None` when the same task is already
    /// pending or processing for that entry.
    pub fn enqueue(
        &self,
        entry_id: i64,
        task: TaskType,
        priority: Option<i64>,
        max_attempts: i64,
    ) -> Result<Option<i64>, Error> {
        let inserted = self.connection().execute(
            "INSERT INTO queue_item (entry_id, task_type, priority, max_attempts, created_at) \
             SELECT ?1, ?2, ?3, ?4, ?5 \
             WHERE NOT EXISTS (SELECT 1 FROM queue_item WHERE entry_id = ?1 AND task_type = ?2 \
                               AND status IN ('pending', 'processing'))",
            params![
                entry_id,
                task,
                priority.unwrap_or_else(|| task.default_priority()),
                max_attempts.max(1),
                now()
            ],
        )?;
        if inserted == 0 {
            debug!("Skipping duplicate {} task for entry {}", task, entry_id);
            return Ok(None);
        }
        Ok(Some(self.connection().last_insert_rowid()))
    }

    pub fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>, Error> {
        Ok(self
            .connection()
            .query_row(
                &format!("SELECT {} FROM queue_item WHERE id = ?1", QueueItem::COLUMNS),
                params![id],
                QueueItem::from_row,
            )
            .optional()?)
    }

    pub fn list_queue_items(
        &self,
        status: Option<QueueStatus>,
        limit: i64,
    ) -> Result<Vec<QueueItem>, Error> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM queue_item WHERE ?1 IS NULL OR status = ?1 \
             ORDER BY priority DESC, created_at, id LIMIT ?2",
            QueueItem::COLUMNS
        ))?;
        let items = stmt
            .query_map(params![status, limit], QueueItem::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Claim the next eligible item: mark it processing, stamp it and count
    /// the attempt. Returns `None` when nothing is pending.
    pub fn claim_next(&self) -> Result<Option<QueueItem>, Error> {
        self.in_transaction(|db| {
            let next: Option<i64> = db
                .connection()
                .query_row(
                    "SELECT q.id FROM queue_item q \
                     LEFT JOIN catalog_entry e ON e.id = q.entry_id \
                     WHERE q.status = 'pending' \
                     ORDER BY q.priority DESC, q.created_at ASC, COALESCE(e.size, 0) DESC, q.id ASC \
                     LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = next else {
                return Ok(None);
            };

            db.connection().execute(
                "UPDATE queue_item SET status = 'processing', started_at = ?1, \
                 attempts = attempts + 1, completed_at = NULL WHERE id = ?2 AND status = 'pending'",
                params![now(), id],
            )?;
            db.get_queue_item(id)
        })
    }

    /// Mark an item done and record the work on its entry.
    pub fn complete_item(&self, item: &QueueItem) -> Result<(), Error> {
        self.in_transaction(|db| {
            db.connection().execute(
                "UPDATE queue_item SET status = 'completed', completed_at = ?1, \
                 error_message = NULL WHERE id = ?2",
                params![now(), item.id],
            )?;
            if let Ok(task) = item.task_type.parse::<TaskType>() {
                db.connection().execute(
                    &format!(
                        "UPDATE catalog_entry SET {} = 1 WHERE id = ?1",
                        task.flag_column()
                    ),
                    params![item.entry_id],
                )?;
            }
            Ok::<_, Error>(())
        })
    }

    /// Record a failed attempt. The item goes back to `pending` while attempts
    /// remain, unless the failure is permanent. Returns the new status.
    pub fn fail_item(
        &self,
        item: &QueueItem,
        message: &str,
        permanent: bool,
    ) -> Result<QueueStatus, Error> {
        let exhausted = permanent || item.attempts >= item.max_attempts;
        let message = truncate_message(message);

        if exhausted {
            self.connection().execute(
                "UPDATE queue_item SET status = 'failed', error_message = ?1, completed_at = ?2 \
                 WHERE id = ?3",
                params![message, now(), item.id],
            )?;
            warn!(
                "Queue item {} ({} for entry {}) failed after {} attempt(s): {}",
                item.id, item.task_type, item.entry_id, item.attempts, message
            );
            Ok(QueueStatus::Failed)
        } else {
            self.connection().execute(
                "UPDATE queue_item SET status = 'pending', error_message = ?1, started_at = NULL \
                 WHERE id = ?2",
                params![message, item.id],
            )?;
            debug!(
                "Queue item {} will be retried ({}/{}): {}",
                item.id, item.attempts, item.max_attempts, message
            );
            Ok(QueueStatus::Pending)
        }
    }

    /// Return items stuck in `processing` longer than `timeout_secs` to
    /// `pending`. The attempt already counted stays counted, so the retry
    /// bound is enforced by the next `fail_item`.
    pub fn reset_stuck_items(&self, timeout_secs: i64) -> Result<usize, Error> {
        let reset = self.connection().execute(
            "UPDATE queue_item SET status = 'pending', started_at = NULL \
             WHERE status = 'processing' AND started_at < ?1",
            params![now_offset_secs(-timeout_secs)],
        )?;
        if reset > 0 {
            info!("Stuck item sweep: {} reset to pending", reset);
        }
        Ok(reset)
    }

    /// Remove a pending item. Items already being processed cannot be cancelled.
    pub fn cancel_queue_item(&self, id: i64) -> Result<(), Error> {
        let item = self
            .get_queue_item(id)?
            .ok_or(Error::not_found("queue item", id))?;
        if item.status != QueueStatus::Pending {
            return Err(Error::Validation(format!(
                "queue item {} is {}, only pending items can be cancelled",
                id, item.status
            )));
        }
        self.connection().execute(
            "DELETE FROM queue_item WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(())
    }

    /// Delete finished items with the given status.
    pub fn clear_queue(&self, status: QueueStatus) -> Result<usize, Error> {
        if !matches!(status, QueueStatus::Completed | QueueStatus::Failed) {
            return Err(Error::Validation(format!(
                "only completed or failed items can be cleared, not {}",
                status
            )));
        }
        Ok(self
            .connection()
            .execute("DELETE FROM queue_item WHERE status = ?1", params![status])?)
    }

    /// Give every failed item a fresh set of attempts.
    pub fn retry_failed(&self) -> Result<usize, Error> {
        Ok(self.connection().execute(
            "UPDATE queue_item SET status = 'pending', attempts = 0, error_message = NULL, \
             started_at = NULL, completed_at = NULL WHERE status = 'failed'",
            [],
        )?)
    }

    pub fn queue_stats(&self) -> Result<QueueStats, Error> {
        let mut stmt = self.connection().prepare(
            "SELECT task_type, status, COUNT(*) FROM queue_item GROUP BY task_type, status",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, QueueStatus>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = QueueStats::default();
        for (task, status, count) in rows {
            match status {
                QueueStatus::Pending => stats.pending += count,
                QueueStatus::Processing => stats.processing += count,
                QueueStatus::Completed => stats.completed += count,
                QueueStatus::Failed => stats.failed += count,
            }
            stats
                .by_task
                .entry(task)
                .or_default()
                .insert(status.to_string(), count);
        }
        Ok(stats)
    }
}
