//! Snapshot/report file pairs
//!
//! A pair shares a timestamp prefix: `<root>/hprof/<prefix>.hprof` and
//! `<root>/report/<prefix>.json`.

use chrono::Local;
use heapwatch_common::{REPORT_EXTENSION, SNAPSHOT_EXTENSION};
use log::{debug, warn};
use std::path::{Path, PathBuf};

const PREFIX_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub created_at_epoch: i64,
    pub stripped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFile {
    pub path: PathBuf,
}

/// One snapshot and its report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapFiles {
    pub snapshot: SnapshotFile,
    pub report: ReportFile,
}

impl HeapFiles {
    /// Shared filename prefix.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        file_prefix(&self.report.path)
    }

    /// Remove both files. Missing files are not an error.
    pub fn delete(&self) {
        remove_quietly(&self.snapshot.path);
        remove_quietly(&self.report.path);
    }
}

/// Remove `path` if present, logging other failures.
pub fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Deleted {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete {}: {e}", path.display()),
    }
}

/// `2024-05-01_10-00-00.json` -> `2024-05-01_10-00-00`
#[must_use]
pub fn file_prefix(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
    snapshot_dir: PathBuf,
    report_dir: PathBuf,
}

impl StorageLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self { snapshot_dir: root.join("hprof"), report_dir: root.join("report"), root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    #[must_use]
    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// # Errors
    /// Returns an error if either directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.snapshot_dir)?;
        std::fs::create_dir_all(&self.report_dir)
    }

    #[must_use]
    pub fn snapshot_path(&self, prefix: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{prefix}.{SNAPSHOT_EXTENSION}"))
    }

    #[must_use]
    pub fn report_path(&self, prefix: &str) -> PathBuf {
        self.report_dir.join(format!("{prefix}.{REPORT_EXTENSION}"))
    }

    /// Snapshot paired with a report (same prefix). Existence is not checked.
    #[must_use]
    pub fn snapshot_for_report(&self, report: &Path) -> Option<PathBuf> {
        file_prefix(report).map(|p| self.snapshot_path(p))
    }

    /// Report paired with a snapshot (same prefix). Existence is not checked.
    #[must_use]
    pub fn report_for_snapshot(&self, snapshot: &Path) -> Option<PathBuf> {
        file_prefix(snapshot).map(|p| self.report_path(p))
    }

    /// Fresh pair named after the current local time. A numeric suffix is
    /// added when a pair with that prefix already exists.
    ///
    /// # Errors
    /// Returns an error if the directories cannot be created.
    pub fn new_pair(&self, stripped: bool) -> std::io::Result<HeapFiles> {
        self.ensure_dirs()?;
        let now = Local::now();
        let base = now.format(PREFIX_FORMAT).to_string();
        let mut prefix = base.clone();
        let mut suffix = 1;
        while self.snapshot_path(&prefix).exists() || self.report_path(&prefix).exists() {
            prefix = format!("{base}_{suffix}");
            suffix += 1;
        }
        Ok(HeapFiles {
            snapshot: SnapshotFile {
                path: self.snapshot_path(&prefix),
                created_at_epoch: now.timestamp(),
                stripped,
            },
            report: ReportFile { path: self.report_path(&prefix) },
        })
    }

    /// Report files, sorted by name (oldest first).
    ///
    /// # Errors
    /// Returns an error if the report directory exists but cannot be read.
    pub fn list_reports(&self) -> std::io::Result<Vec<PathBuf>> {
        list_with_extension(&self.report_dir, REPORT_EXTENSION)
    }

    /// Snapshot files, sorted by name (oldest first).
    ///
    /// # Errors
    /// Returns an error if the snapshot directory exists but cannot be read.
    pub fn list_snapshots(&self) -> std::io::Result<Vec<PathBuf>> {
        list_with_extension(&self.snapshot_dir, SNAPSHOT_EXTENSION)
    }
}

fn list_with_extension(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == extension))
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_shares_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let files = layout.new_pair(false).unwrap();
        assert_eq!(file_prefix(&files.snapshot.path), file_prefix(&files.report.path));
        assert!(files.snapshot.path.starts_with(dir.path().join("hprof")));
        assert!(files.report.path.starts_with(dir.path().join("report")));
        assert_eq!(files.snapshot.path.extension().unwrap(), "hprof");
        assert_eq!(files.report.path.extension().unwrap(), "json");
        // yyyy-MM-dd_HH-mm-ss
        assert_eq!(files.prefix().unwrap().len(), 19);
    }

    #[test]
    fn test_pair_collision_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let first = layout.new_pair(false).unwrap();
        std::fs::write(&first.report.path, "").unwrap();
        let second = layout.new_pair(true).unwrap();
        assert_ne!(first.report.path, second.report.path);
        assert!(second.snapshot.stripped);
    }

    #[test]
    fn test_listing_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        assert!(layout.list_reports().unwrap().is_empty());
        layout.ensure_dirs().unwrap();
        std::fs::write(layout.report_path("b"), "").unwrap();
        std::fs::write(layout.report_path("a"), "").unwrap();
        std::fs::write(layout.report_dir().join("a.json.tmp"), "").unwrap();
        let reports = layout.list_reports().unwrap();
        assert_eq!(reports, vec![layout.report_path("a"), layout.report_path("b")]);
        assert_eq!(layout.snapshot_for_report(&reports[0]), Some(layout.snapshot_path("a")));
    }

    #[test]
    fn test_delete_pair_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let files = layout.new_pair(false).unwrap();
        std::fs::write(&files.snapshot.path, b"x").unwrap();
        files.delete();
        assert!(!files.snapshot.path.exists());
        assert!(!files.report.path.exists());
    }
}
