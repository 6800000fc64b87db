//! Startup recovery scan
//!
//! Runs once at pipeline start, before any monitor. For each report not
//! marked done:
//!
//! - attempts at or over the ceiling: delete report and snapshot
//! - paired snapshot missing: delete the report
//! - otherwise: resumable with reason `Reanalysis`
//!
//! Only the oldest resumable pair is resumed per launch; later ones stay on
//! disk for the next launch. Unparsable reports are discarded with their
//! snapshot, and snapshots with no report are removed. A report that cannot
//! be read at all is skipped and left for the next launch.

use heapwatch_common::{AnalysisJob, AnalysisReason};
use log::{info, warn};
use std::fmt;
use std::path::PathBuf;

use super::files::{remove_quietly, StorageLayout};
use super::store::ReportPersistence;
use crate::domain::ReportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    AttemptsExhausted { times: u32 },
    SnapshotMissing,
    Unparsable(String),
    OrphanSnapshot,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::AttemptsExhausted { times } => {
                write!(f, "reanalysis attempts exhausted ({times})")
            }
            DiscardReason::SnapshotMissing => f.write_str("paired snapshot missing"),
            DiscardReason::Unparsable(detail) => write!(f, "unparsable report: {detail}"),
            DiscardReason::OrphanSnapshot => f.write_str("snapshot without report"),
        }
    }
}

/// Decision for one file found by the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Resumed in this launch
    Resume(AnalysisJob),
    /// Resumable, left for a later launch
    Deferred(AnalysisJob),
    /// Analysis finished; left for upload policy
    Completed(PathBuf),
    /// Deleted (or, in a dry run, would be)
    Discard { path: PathBuf, snapshot: Option<PathBuf>, reason: DiscardReason },
    /// Could not be read; left untouched
    Skipped { path: PathBuf, detail: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryScan {
    pub decisions: Vec<Decision>,
}

impl RecoveryScan {
    /// The pair to resume in this launch.
    #[must_use]
    pub fn resumable(&self) -> Option<&AnalysisJob> {
        self.decisions.iter().find_map(|d| match d {
            Decision::Resume(job) => Some(job),
            _ => None,
        })
    }

    pub fn discarded(&self) -> impl Iterator<Item = (&PathBuf, &DiscardReason)> {
        self.decisions.iter().filter_map(|d| match d {
            Decision::Discard { path, reason, .. } => Some((path, reason)),
            _ => None,
        })
    }
}

pub struct ReanalysisChecker<'a> {
    layout: &'a StorageLayout,
    persistence: &'a dyn ReportPersistence,
    max_times: u32,
}

impl<'a> ReanalysisChecker<'a> {
    #[must_use]
    pub fn new(
        layout: &'a StorageLayout,
        persistence: &'a dyn ReportPersistence,
        max_times: u32,
    ) -> Self {
        Self { layout, persistence, max_times }
    }

    /// Classify every report and snapshot. With `apply`, discarded files are
    /// deleted; otherwise the scan only reports what it would do.
    ///
    /// # Errors
    /// Returns an error if the storage directories cannot be listed.
    pub fn scan(&self, apply: bool) -> Result<RecoveryScan, ReportError> {
        let mut scan = RecoveryScan::default();
        let mut resumed = false;

        let reports = self.layout.list_reports()?;
        for report_path in &reports {
            let snapshot_path = self.layout.snapshot_for_report(report_path);
            let decision = match self.persistence.load(report_path) {
                Err(ReportError::Corrupt { detail, .. }) => Decision::Discard {
                    path: report_path.clone(),
                    snapshot: snapshot_path,
                    reason: DiscardReason::Unparsable(detail),
                },
                Err(e) => Decision::Skipped { path: report_path.clone(), detail: e.to_string() },
                Ok(report) if report.analysis_done => Decision::Completed(report_path.clone()),
                Ok(report) => {
                    let times = report.re_analysis_times.unwrap_or(0);
                    match snapshot_path {
                        _ if times >= self.max_times => Decision::Discard {
                            path: report_path.clone(),
                            snapshot: snapshot_path,
                            reason: DiscardReason::AttemptsExhausted { times },
                        },
                        Some(snapshot) if snapshot.is_file() => {
                            let job = AnalysisJob {
                                snapshot_path: snapshot,
                                report_path: report_path.clone(),
                                reason: AnalysisReason::Reanalysis,
                            };
                            if resumed {
                                Decision::Deferred(job)
                            } else {
                                resumed = true;
                                Decision::Resume(job)
                            }
                        }
                        _ => Decision::Discard {
                            path: report_path.clone(),
                            snapshot: None,
                            reason: DiscardReason::SnapshotMissing,
                        },
                    }
                }
            };
            scan.decisions.push(decision);
        }

        for snapshot in self.layout.list_snapshots()? {
            let has_report = self
                .layout
                .report_for_snapshot(&snapshot)
                .is_some_and(|r| reports.contains(&r));
            if !has_report {
                scan.decisions.push(Decision::Discard {
                    path: snapshot,
                    snapshot: None,
                    reason: DiscardReason::OrphanSnapshot,
                });
            }
        }

        for decision in &scan.decisions {
            match decision {
                Decision::Resume(job) => {
                    info!("Resuming analysis of {}", job.snapshot_path.display());
                }
                Decision::Discard { path, snapshot, reason } => {
                    info!("Discarding {}: {reason}", path.display());
                    if apply {
                        remove_quietly(path);
                        if let Some(snapshot) = snapshot {
                            remove_quietly(snapshot);
                        }
                    }
                }
                Decision::Deferred(job) => {
                    warn!(
                        "Deferring reanalysis of {} to a later launch",
                        job.snapshot_path.display()
                    );
                }
                Decision::Skipped { path, detail } => {
                    warn!("Skipping unreadable report {}: {detail}", path.display());
                }
                Decision::Completed(_) => {}
            }
        }
        Ok(scan)
    }
}
