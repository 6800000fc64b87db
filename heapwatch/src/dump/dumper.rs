//! Fork-based heap snapshot capture
//!
//! ```text
//!   parent                          child
//!   ──────                          ─────
//!   check preconditions
//!   suspend mutators
//!   duplicate ───────────────────▶  serialize heap
//!   resume mutators                 exit(status)
//!   wait for exit ◀──────────────── (never returns)
//! ```
//!
//! The parent is paused only between suspend and resume. Backends that
//! cannot fork fall back to a direct in-process serialize.

use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::backend::{ForkBranch, RuntimeSnapshotBackend};
use crate::domain::{IneligibleReason, PipelineError};
use crate::eligibility;

type FreeSpaceFn = Box<dyn Fn(&Path) -> std::io::Result<u64> + Send + Sync>;

/// How a snapshot was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    Fork,
    Direct,
}

pub struct SnapshotDumper {
    backend: Arc<dyn RuntimeSnapshotBackend>,
    min_free_disk_bytes: u64,
    wait_timeout: Duration,
    free_space: FreeSpaceFn,
}

impl std::fmt::Debug for SnapshotDumper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotDumper")
            .field("min_free_disk_bytes", &self.min_free_disk_bytes)
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}

impl SnapshotDumper {
    pub fn new(
        backend: Arc<dyn RuntimeSnapshotBackend>,
        min_free_disk_bytes: u64,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            min_free_disk_bytes,
            wait_timeout,
            free_space: Box::new(eligibility::available_disk_bytes),
        }
    }

    /// Replace the filesystem free-space query.
    #[must_use]
    pub fn with_free_space_fn<F>(mut self, sampler: F) -> Self
    where
        F: Fn(&Path) -> std::io::Result<u64> + Send + Sync + 'static,
    {
        self.free_space = Box::new(sampler);
        self
    }

    #[must_use]
    pub fn produces_stripped(&self) -> bool {
        self.backend.produces_stripped()
    }

    /// Capture a snapshot to `path`, logging the failure if there is one.
    pub fn dump(&self, path: &Path) -> bool {
        match self.try_dump(path) {
            Ok(mode) => {
                info!("Heap snapshot written to {} ({mode:?})", path.display());
                true
            }
            Err(e) => {
                error!("Heap snapshot to {} failed: {e}", path.display());
                false
            }
        }
    }

    /// # Errors
    /// Returns [`PipelineError::Ineligible`] if a precondition fails (nothing
    /// was suspended) or [`PipelineError::CaptureFailed`] if the capture
    /// itself failed.
    pub fn try_dump(&self, path: &Path) -> Result<DumpMode, PipelineError> {
        self.check_preconditions(path)?;

        if !self.backend.supports_fork() {
            warn!("Backend cannot fork, dumping in-process");
            self.backend
                .serialize_heap(path)
                .map_err(|e| PipelineError::CaptureFailed(e.to_string()))?;
            return Ok(DumpMode::Direct);
        }

        let paused_at = Instant::now();
        self.backend
            .suspend_threads()
            .map_err(|e| PipelineError::CaptureFailed(e.to_string()))?;

        let pid = match self.backend.duplicate_process() {
            Ok(ForkBranch::Child) => self.run_child(path),
            Ok(ForkBranch::Parent(pid)) => pid,
            Err(e) => {
                if let Err(resume) = self.backend.resume_threads() {
                    error!("Failed to resume threads after fork failure: {resume}");
                }
                return Err(PipelineError::CaptureFailed(e.to_string()));
            }
        };

        if let Err(e) = self.backend.resume_threads() {
            error!("Failed to resume threads after fork: {e}");
        }
        info!("Mutators paused for {:?}, waiting for dumping child {pid}", paused_at.elapsed());

        match self.backend.wait_for_exit(pid, self.wait_timeout) {
            Ok(true) => Ok(DumpMode::Fork),
            Ok(false) => {
                Err(PipelineError::CaptureFailed(format!("dumping child {pid} reported failure")))
            }
            Err(e) => Err(PipelineError::CaptureFailed(e.to_string())),
        }
    }

    fn check_preconditions(&self, path: &Path) -> Result<(), PipelineError> {
        self.backend.check_compatible().map_err(|e| {
            PipelineError::Ineligible(IneligibleReason::UnsupportedRuntime(e.to_string()))
        })?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let available = (self.free_space)(dir)?;
        if available < self.min_free_disk_bytes {
            return Err(PipelineError::Ineligible(IneligibleReason::InsufficientDisk {
                available,
                required: self.min_free_disk_bytes,
            }));
        }
        Ok(())
    }

    // Child side: serialize, then terminate. Nothing here logs or takes a
    // lock another parent thread may have held at fork time.
    fn run_child(&self, path: &Path) -> ! {
        let ok = self.backend.serialize_heap(path).is_ok();
        self.backend.exit_child(ok)
    }
}
