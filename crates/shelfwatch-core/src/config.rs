use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::queue::TaskType;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    /// Registered as watched roots at startup if not already known.
    pub root_paths: Vec<String>,
    pub scan: ScanConfig,
    pub worker: WorkerConfig,
    /// Task type name → command line. The entry path is appended as the last argument.
    pub handlers: HashMap<String, Vec<String>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "shelfwatch.db".to_string(),
            root_paths: Vec::new(),
            scan: ScanConfig::default(),
            worker: WorkerConfig::default(),
            handlers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Files per committed batch.
    pub batch_size: usize,
    /// Lowercase extensions without the dot. Empty means every file.
    pub extensions: Vec<String>,
    /// Work enqueued for every new or changed canonical entry.
    pub enqueue_tasks: Vec<TaskType>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            extensions: Vec::new(),
            enqueue_tasks: vec![TaskType::Cover, TaskType::Text],
        }
    }
}

impl ScanConfig {
    pub fn accepts_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    /// Items claimed per tick.
    pub batch_size: usize,
    pub stuck_timeout_secs: i64,
    pub max_attempts: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            batch_size: 5,
            stuck_timeout_secs: 30 * 60,
            max_attempts: 3,
        }
    }
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Shelfwatch").required(false))
        .add_source(Environment::with_prefix("SHELFWATCH").separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);

        if result.iter().any(|res_dir| dir_path.starts_with(res_dir)) {
            continue;
        }

        result.retain(|res_dir| !Path::new(res_dir).starts_with(dir_path));
        result.push(dir);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = vec![
            "/home/user/books".to_string(),
            "/home/user/docs".to_string(),
            "/var/data".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 3);
        assert!(result.contains(&"/home/user/books".to_string()));
        assert!(result.contains(&"/home/user/docs".to_string()));
        assert!(result.contains(&"/var/data".to_string()));
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = vec![
            "/home/user".to_string(),
            "/home/user/docs".to_string(),
            "/var/data".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 2);
        assert!(result.contains(&"/home/user".to_string()));
        assert!(result.contains(&"/var/data".to_string()));
        // /home/user/docs is covered by /home/user
        assert!(!result.contains(&"/home/user/docs".to_string()));
    }

    #[test]
    fn test_non_overlapping_parent_after_children() {
        let dirs = vec![
            "/data/a".to_string(),
            "/data/b".to_string(),
            "/data".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result, vec!["/data".to_string()]);
    }

    #[test]
    fn test_sibling_prefix_is_not_nested() {
        let dirs = vec!["/data/books".to_string(), "/data/books2".to_string()];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_extension_filter() {
        let mut scan = ScanConfig::default();
        assert!(scan.accepts_extension(Path::new("/a/b.bin")));

        scan.extensions = vec!["pdf".to_string()];
        assert!(scan.accepts_extension(Path::new("/a/b.PDF")));
        assert!(!scan.accepts_extension(Path::new("/a/b.txt")));
        assert!(!scan.accepts_extension(Path::new("/a/noext")));
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.scan.batch_size, 100);
        assert_eq!(config.worker.max_attempts, 3);
        assert_eq!(config.scan.enqueue_tasks, vec![TaskType::Cover, TaskType::Text]);
    }
}
