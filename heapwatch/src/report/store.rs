//! Crash-resilient report ledger
//!
//! A [`ReportStore`] owns one report document. Every mutation is written
//! through [`ReportPersistence`] before the call returns, so a crash at any
//! phase leaves the phases before it on disk.

use heapwatch_common::{AnalysisReason, DumpReason};
use log::{debug, info};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::model::{ClassInfo, GcPath, HeapReport, LeakObject, RunningInfo};
use crate::domain::ReportError;

/// Structured read/write of report documents.
pub trait ReportPersistence: Send + Sync {
    /// # Errors
    /// Returns [`ReportError::Corrupt`] for unparsable documents.
    fn load(&self, path: &Path) -> Result<HeapReport, ReportError>;

    /// # Errors
    /// Returns an error if the document cannot be written.
    fn save(&self, path: &Path, report: &HeapReport) -> Result<(), ReportError>;
}

/// JSON files written through a temp file and rename, so readers see the
/// old or the new document. An empty file loads as an empty document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFilePersistence;

impl JsonFilePersistence {
    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }
}

impl ReportPersistence for JsonFilePersistence {
    fn load(&self, path: &Path) -> Result<HeapReport, ReportError> {
        let raw = std::fs::read(path)?;
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(HeapReport::default());
        }
        serde_json::from_slice(&raw)
            .map_err(|e| ReportError::Corrupt { path: path.to_path_buf(), detail: e.to_string() })
    }

    fn save(&self, path: &Path, report: &HeapReport) -> Result<(), ReportError> {
        let temp = Self::temp_path(path);
        {
            let mut file = std::fs::File::create(&temp)?;
            serde_json::to_writer_pretty(&mut file, report)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        std::fs::rename(&temp, path)?;
        Ok(())
    }
}

pub struct ReportStore {
    path: PathBuf,
    persistence: Arc<dyn ReportPersistence>,
    report: HeapReport,
}

impl std::fmt::Debug for ReportStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportStore")
            .field("path", &self.path)
            .field("report", &self.report)
            .finish()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ReportStore {
    /// Create a fresh, empty document at `path`.
    ///
    /// # Errors
    /// Returns an error if the document cannot be written.
    pub fn create(
        path: impl Into<PathBuf>,
        persistence: Arc<dyn ReportPersistence>,
    ) -> Result<Self, ReportError> {
        let store = Self { path: path.into(), persistence, report: HeapReport::default() };
        store.flush()?;
        debug!("Created report {}", store.path.display());
        Ok(store)
    }

    /// Open an existing document.
    ///
    /// # Errors
    /// Returns an error if the document is missing or unparsable.
    pub fn open(
        path: impl Into<PathBuf>,
        persistence: Arc<dyn ReportPersistence>,
    ) -> Result<Self, ReportError> {
        let path = path.into();
        let report = persistence.load(&path)?;
        Ok(Self { path, persistence, report })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn report(&self) -> &HeapReport {
        &self.report
    }

    fn flush(&self) -> Result<(), ReportError> {
        self.persistence.save(&self.path, &self.report)
    }

    /// Replace the running info, keeping reasons and timings already recorded.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn add_running_info(&mut self, info: RunningInfo) -> Result<(), ReportError> {
        let previous = std::mem::replace(&mut self.report.running_info, info);
        let current = &mut self.report.running_info;
        current.dump_reason = current.dump_reason.take().or(previous.dump_reason);
        current.analysis_reason = current.analysis_reason.take().or(previous.analysis_reason);
        current.filter_instance_time =
            current.filter_instance_time.or(previous.filter_instance_time);
        current.find_gc_path_time = current.find_gc_path_time.or(previous.find_gc_path_time);
        self.flush()
    }

    /// # Errors
    /// Returns an error if the flush fails.
    pub fn add_dump_reason(&mut self, reason: DumpReason) -> Result<(), ReportError> {
        self.report.running_info.dump_reason = Some(reason.tag());
        self.flush()
    }

    /// # Errors
    /// Returns an error if the flush fails.
    pub fn add_analysis_reason(&mut self, reason: AnalysisReason) -> Result<(), ReportError> {
        self.report.running_info.analysis_reason = Some(reason.tag().to_string());
        self.flush()
    }

    /// Count one more reanalysis attempt and return the new total.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn record_reanalysis(&mut self) -> Result<u32, ReportError> {
        let times = self.report.re_analysis_times.map_or(1, |t| t.saturating_add(1));
        self.report.re_analysis_times = Some(times);
        self.flush()?;
        info!("Report {} reanalysis attempt {times}", self.path.display());
        Ok(times)
    }

    /// # Errors
    /// Returns an error if the flush fails.
    pub fn add_class_infos(&mut self, infos: Vec<ClassInfo>) -> Result<(), ReportError> {
        self.report.class_infos = infos;
        self.flush()
    }

    /// # Errors
    /// Returns an error if the flush fails.
    pub fn add_leak_objects(&mut self, objects: Vec<LeakObject>) -> Result<(), ReportError> {
        self.report.leak_objects = objects;
        self.flush()
    }

    /// # Errors
    /// Returns an error if the flush fails.
    pub fn add_gc_paths(&mut self, paths: Vec<GcPath>) -> Result<(), ReportError> {
        self.report.gc_paths = paths;
        self.flush()
    }

    /// # Errors
    /// Returns an error if the flush fails.
    pub fn set_filter_instance_time(&mut self, elapsed: Duration) -> Result<(), ReportError> {
        self.report.running_info.filter_instance_time = Some(millis(elapsed));
        self.flush()
    }

    /// # Errors
    /// Returns an error if the flush fails.
    pub fn set_find_gc_path_time(&mut self, elapsed: Duration) -> Result<(), ReportError> {
        self.report.running_info.find_gc_path_time = Some(millis(elapsed));
        self.flush()
    }

    /// Terminal phase.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn mark_done(&mut self) -> Result<(), ReportError> {
        self.report.analysis_done = true;
        self.flush()
    }
}
