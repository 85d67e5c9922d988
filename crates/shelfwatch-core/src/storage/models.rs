use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Implements text (de)serialization for a fieldless enum stored as TEXT.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> ::rusqlite::Result<::rusqlite::types::ToSqlOutput<'_>> {
                Ok(::rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl ::rusqlite::types::FromSql for $name {
            fn column_result(
                value: ::rusqlite::types::ValueRef<'_>,
            ) -> ::rusqlite::types::FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse()
                    .map_err(|e: String| ::rusqlite::types::FromSqlError::Other(e.into()))
            }
        }
    };
}

pub(crate) use text_enum;

/// A directory tree the scanner keeps the catalog in sync with.
#[derive(Debug, Clone, Serialize)]
pub struct WatchedRoot {
    pub id: i64,
    pub path: String,
    pub label: String,
    pub enabled: bool,
    pub is_source_of_truth: bool,
    pub last_scanned_at: Option<String>,
    pub created_at: String,
}

impl WatchedRoot {
    pub(crate) const COLUMNS: &'static str =
        "id, path, label, enabled, is_source_of_truth, last_scanned_at, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(WatchedRoot {
            id: row.get(0)?,
            path: row.get(1)?,
            label: row.get(2)?,
            enabled: row.get(3)?,
            is_source_of_truth: row.get(4)?,
            last_scanned_at: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

/// A tracked file.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub root_id: Option<i64>,
    pub path: String,
    pub name: String,
    pub size: i64,
    pub fingerprint: String,
    /// Nanoseconds since the Unix epoch.
    pub modified_at: i64,
    pub created_at: String,
    pub updated_at: String,
    pub is_duplicate: bool,
    pub duplicate_of_id: Option<i64>,
    pub duplicate_reason: Option<String>,
    pub is_excluded: bool,
    pub excluded_by_rule_id: Option<i64>,
    pub exclusion_override: bool,
    pub is_missing: bool,
    pub missing_since: Option<String>,
    pub cover_extracted: bool,
    pub text_extracted: bool,
    pub ocr_extracted: bool,
    pub fts_indexed: bool,
    pub embedded: bool,
    pub identified: bool,
}

impl CatalogEntry {
    pub(crate) const COLUMNS: &'static str =
        "id, root_id, path, name, size, fingerprint, modified_at, created_at, updated_at, \
         is_duplicate, duplicate_of_id, duplicate_reason, is_excluded, excluded_by_rule_id, \
         exclusion_override, is_missing, missing_since, cover_extracted, text_extracted, \
         ocr_extracted, fts_indexed, embedded, identified";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(CatalogEntry {
            id: row.get(0)?,
            root_id: row.get(1)?,
            path: row.get(2)?,
            name: row.get(3)?,
            size: row.get(4)?,
            fingerprint: row.get(5)?,
            modified_at: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            is_duplicate: row.get(9)?,
            duplicate_of_id: row.get(10)?,
            duplicate_reason: row.get(11)?,
            is_excluded: row.get(12)?,
            excluded_by_rule_id: row.get(13)?,
            exclusion_override: row.get(14)?,
            is_missing: row.get(15)?,
            missing_since: row.get(16)?,
            cover_extracted: row.get(17)?,
            text_extracted: row.get(18)?,
            ocr_extracted: row.get(19)?,
            fts_indexed: row.get(20)?,
            embedded: row.get(21)?,
            identified: row.get(22)?,
        })
    }
}

/// Tombstone that keeps an intentionally removed duplicate path from being re-imported.
#[derive(Debug, Clone, Serialize)]
pub struct DeletedDuplicateMarker {
    pub id: i64,
    pub path: String,
    pub fingerprint: String,
    pub deleted_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    FolderPath,
    FolderName,
    Filename,
    SizeMin,
    SizeMax,
    Regex,
}

text_enum!(RuleType {
    FolderPath => "folder_path",
    FolderName => "folder_name",
    Filename => "filename",
    SizeMin => "size_min",
    SizeMax => "size_max",
    Regex => "regex",
});

#[derive(Debug, Clone, Serialize)]
pub struct ExclusionRule {
    pub id: i64,
    pub rule_type: RuleType,
    pub pattern: String,
    pub description: String,
    pub priority: i64,
    pub enabled: bool,
    pub is_default: bool,
    pub files_excluded: i64,
    pub last_matched_at: Option<String>,
    pub created_at: String,
}

impl ExclusionRule {
    pub(crate) const COLUMNS: &'static str =
        "id, rule_type, pattern, description, priority, enabled, is_default, files_excluded, \
         last_matched_at, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ExclusionRule {
            id: row.get(0)?,
            rule_type: row.get(1)?,
            pattern: row.get(2)?,
            description: row.get(3)?,
            priority: row.get(4)?,
            enabled: row.get(5)?,
            is_default: row.get(6)?,
            files_excluded: row.get(7)?,
            last_matched_at: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

/// User-supplied fields of an exclusion rule.
#[derive(Debug, Clone)]
pub struct NewExclusionRule {
    pub rule_type: RuleType,
    pub pattern: String,
    pub description: String,
    pub priority: i64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Scanning,
    Hashing,
    Processing,
    Complete,
    Failed,
    Cancelled,
}

text_enum!(JobStatus {
    Pending => "pending",
    Scanning => "scanning",
    Hashing => "hashing",
    Processing => "processing",
    Complete => "complete",
    Failed => "failed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Serialize)]
pub struct ScanJob {
    pub id: i64,
    pub root_id: Option<i64>,
    pub status: JobStatus,
    pub phase: String,
    pub current_file: Option<String>,
    pub force: bool,
    pub total_files: i64,
    pub processed_files: i64,
    pub new_files: i64,
    pub updated_files: i64,
    pub duplicate_files: i64,
    pub excluded_files: i64,
    pub error_count: i64,
    pub errors: Vec<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl ScanJob {
    pub(crate) const COLUMNS: &'static str =
        "id, root_id, status, phase, current_file, force, total_files, processed_files, \
         new_files, updated_files, duplicate_files, excluded_files, error_count, errors, \
         created_at, started_at, completed_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let errors: String = row.get(13)?;
        Ok(ScanJob {
            id: row.get(0)?,
            root_id: row.get(1)?,
            status: row.get(2)?,
            phase: row.get(3)?,
            current_file: row.get(4)?,
            force: row.get(5)?,
            total_files: row.get(6)?,
            processed_files: row.get(7)?,
            new_files: row.get(8)?,
            updated_files: row.get(9)?,
            duplicate_files: row.get(10)?,
            excluded_files: row.get(11)?,
            error_count: row.get(12)?,
            errors: serde_json::from_str(&errors).unwrap_or_default(),
            created_at: row.get(14)?,
            started_at: row.get(15)?,
            completed_at: row.get(16)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

text_enum!(QueueStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: i64,
    pub entry_id: i64,
    /// Kept as text so rows written by other versions still load.
    pub task_type: String,
    pub priority: i64,
    pub status: QueueStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl QueueItem {
    pub(crate) const COLUMNS: &'static str =
        "id, entry_id, task_type, priority, status, attempts, max_attempts, error_message, \
         created_at, started_at, completed_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(QueueItem {
            id: row.get(0)?,
            entry_id: row.get(1)?,
            task_type: row.get(2)?,
            priority: row.get(3)?,
            status: row.get(4)?,
            attempts: row.get(5)?,
            max_attempts: row.get(6)?,
            error_message: row.get(7)?,
            created_at: row.get(8)?,
            started_at: row.get(9)?,
            completed_at: row.get(10)?,
        })
    }
}
