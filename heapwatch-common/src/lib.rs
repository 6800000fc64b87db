//! # Shared Data Structures (monitored process ↔ analysis worker)
//!
//! Defines the plain types that cross the process boundary between the
//! monitored application and the out-of-process analysis worker. Everything
//! here is `serde`-serializable so the handoff can travel through any
//! process-launch mechanism (environment variable, argument, pipe).
//!
//! ## Key Types
//!
//! - [`MetricKind`] - Which sampled metric crossed its threshold
//! - [`DumpReason`] - Why a heap snapshot was captured
//! - [`AnalysisReason`] - Why the offline analysis pass was started
//! - [`AnalysisJob`] - Snapshot/report pair handed to the worker process

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Handoff Constants
// ============================================================================

/// Environment variable carrying the JSON-encoded [`AnalysisJob`] into the
/// analysis worker process.
pub const ANALYSIS_JOB_ENV: &str = "HEAPWATCH_ANALYSIS_JOB";

/// Extension of heap snapshot files (`<prefix>.hprof`)
pub const SNAPSHOT_EXTENSION: &str = "hprof";

/// Extension of report ledger files (`<prefix>.json`)
pub const REPORT_EXTENSION: &str = "json";

/// Worker exit code signalling a completed analysis
pub const WORKER_EXIT_OK: i32 = 0;

/// Worker exit code signalling a failed analysis (report kept for reanalysis)
pub const WORKER_EXIT_FAILED: i32 = 1;

// ============================================================================
// Trigger Reasons
// ============================================================================

/// Metric sampled by a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Heap occupancy ratio (percent of max heap)
    Heap,
    /// Heap growth between two samples (bytes)
    HeapThrashing,
    /// Open file descriptor count
    Fd,
    /// Live thread count
    Thread,
}

impl MetricKind {
    /// Stable lowercase name used in logs and the report ledger.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Heap => "heap",
            MetricKind::HeapThrashing => "heap_thrashing",
            MetricKind::Fd => "fd",
            MetricKind::Thread => "thread",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a heap snapshot was taken. Created once per pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "metric", rename_all = "snake_case")]
pub enum DumpReason {
    /// Host asked for a dump explicitly
    Manual,
    /// Host asked for a dump from its crash handler; analysis is deferred to
    /// the next launch
    ManualOnCrash,
    /// A monitor reached its over-count
    MetricOverThreshold(MetricKind),
    /// Dump taken while handling an out-of-memory crash
    OomCrash,
}

impl DumpReason {
    /// Ledger tag, e.g. `METRIC_OVER_THRESHOLD_HEAP`.
    #[must_use]
    pub fn tag(self) -> String {
        match self {
            DumpReason::Manual => "MANUAL".to_string(),
            DumpReason::ManualOnCrash => "MANUAL_ON_CRASH".to_string(),
            DumpReason::MetricOverThreshold(kind) => {
                format!("METRIC_OVER_THRESHOLD_{}", kind.as_str().to_uppercase())
            }
            DumpReason::OomCrash => "OOM_CRASH".to_string(),
        }
    }

    /// Whether the captured snapshot should be analyzed in this lifetime.
    #[must_use]
    pub fn analyze_immediately(self) -> bool {
        !matches!(self, DumpReason::ManualOnCrash)
    }
}

impl fmt::Display for DumpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Why the analysis pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisReason {
    /// Snapshot captured in this lifetime
    Immediate,
    /// Resuming a snapshot left behind by a previous lifetime
    Reanalysis,
    /// Test harness
    Test,
}

impl AnalysisReason {
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            AnalysisReason::Immediate => "IMMEDIATE",
            AnalysisReason::Reanalysis => "REANALYSIS",
            AnalysisReason::Test => "TEST",
        }
    }
}

impl fmt::Display for AnalysisReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ============================================================================
// Worker Handoff
// ============================================================================

/// Snapshot/report pair handed from the monitored process to the analysis
/// worker. Ownership of both files moves to the worker for the duration of
/// the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub snapshot_path: PathBuf,
    pub report_path: PathBuf,
    pub reason: AnalysisReason,
}

impl AnalysisJob {
    /// Encode for the [`ANALYSIS_JOB_ENV`] variable.
    ///
    /// # Errors
    /// Returns an error if the paths are not representable as JSON strings.
    pub fn to_env_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a value previously produced by [`AnalysisJob::to_env_value`].
    ///
    /// # Errors
    /// Returns an error if the value is not a valid encoded job.
    pub fn from_env_value(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}
