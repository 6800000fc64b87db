//! Structured error types for heapwatch
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a pipeline refused to start. No files, threads or processes are
/// touched once one of these is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    /// The snapshot backend cannot serve this runtime/OS
    UnsupportedRuntime(String),
    /// Free space under the storage root is below the configured minimum
    InsufficientDisk { available: u64, required: u64 },
    /// Pipeline is restricted to another process name
    ProcessMismatch { expected: String, actual: String },
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::UnsupportedRuntime(detail) => {
                write!(f, "unsupported runtime: {detail}")
            }
            IneligibleReason::InsufficientDisk { available, required } => {
                write!(f, "insufficient disk space: {available} bytes free, {required} required")
            }
            IneligibleReason::ProcessMismatch { expected, actual } => {
                write!(f, "process '{actual}' is not the enabled process '{expected}'")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline not eligible: {0}")]
    Ineligible(IneligibleReason),

    #[error("Heap capture failed: {0}")]
    CaptureFailed(String),

    #[error("Heap analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Unrecoverable report: {0}")]
    Unrecoverable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report file {path} is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Failed to open heap snapshot {path}: {detail}")]
    Open { path: PathBuf, detail: String },

    #[error("Leak path search failed: {0}")]
    PathFinding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Snapshot backend unsupported: {0}")]
    Unsupported(String),

    #[error("Failed to suspend mutator threads: {0}")]
    SuspendFailed(String),

    #[error("Failed to duplicate process: {0}")]
    ForkFailed(std::io::Error),

    #[error("Heap serialization failed: {0}")]
    SerializeFailed(String),

    #[error("Failed to wait for dumping child {pid}: {error}")]
    WaitFailed { pid: Pid, error: std::io::Error },

    #[error("Dumping child {pid} did not exit within {waited_ms} ms")]
    Timeout { pid: Pid, waited_ms: u64 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration {path}: {error}")]
    Parse { path: PathBuf, error: serde_json::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
