use crate::config::ScanConfig;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// A regular file found on disk, with the cheap metadata used for change detection.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
    /// Nanoseconds since the Unix epoch.
    pub modified_at: i64,
}

/// Something under the root that could not be read.
#[derive(Debug, Clone)]
pub struct WalkIssue {
    pub path: Option<PathBuf>,
    pub message: String,
}

impl std::fmt::Display for WalkIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Recursively enumerate the regular files under `root`, in a stable order.
/// Skips symlinks, 0-byte files and files rejected by the extension filter.
/// Unreadable directories and entries are yielded as issues; the walk continues.
pub fn walk_root<'a>(
    root: &Path,
    scan: &'a ScanConfig,
) -> impl Iterator<Item = Result<DiscoveredFile, WalkIssue>> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    return Some(Err(WalkIssue {
                        path: err.path().map(Path::to_path_buf),
                        message: err.to_string(),
                    }))
                }
            };

            if !entry.file_type().is_file() || !scan.accepts_extension(entry.path()) {
                return None;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    return Some(Err(WalkIssue {
                        path: Some(entry.path().to_path_buf()),
                        message: format!("Error getting metadata: {}", err),
                    }))
                }
            };

            if metadata.len() == 0 {
                return None;
            }

            Some(Ok(DiscoveredFile {
                path: entry.into_path(),
                size: metadata.len(),
                modified_at: metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos() as i64)
                    .unwrap_or(0),
            }))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_walk_skips_empty_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("sub/deeper/b.txt"), "bb").unwrap();
        fs::write(dir.path().join("empty.txt"), "").unwrap();

        let scan = ScanConfig::default();
        let files: Vec<DiscoveredFile> = walk_root(dir.path(), &scan)
            .filter_map(Result::ok)
            .collect();

        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.path.ends_with("sub/deeper/b.txt") && f.size == 2));
        assert!(files.iter().all(|f| f.modified_at > 0));
    }

    #[test]
    fn test_walk_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();

        let scan = ScanConfig {
            extensions: vec!["pdf".to_string()],
            ..ScanConfig::default()
        };
        let files: Vec<DiscoveredFile> = walk_root(dir.path(), &scan)
            .filter_map(Result::ok)
            .collect();

        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("a.pdf"));
    }
}
