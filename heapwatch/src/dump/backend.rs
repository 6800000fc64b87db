//! Seam between the snapshot protocol and the runtime that owns the heap

use std::path::Path;
use std::time::Duration;

use crate::domain::{BackendError, Pid};

/// Result of [`RuntimeSnapshotBackend::duplicate_process`], seen once in
/// each process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkBranch {
    /// Running in the duplicate
    Child,
    /// Running in the parent; carries the duplicate's pid
    Parent(Pid),
}

/// Primitives the fork-and-dump protocol needs from the host runtime.
///
/// Calls arrive in protocol order: `suspend_threads`, `duplicate_process`,
/// then `serialize_heap` + `exit_child` in the child and `resume_threads` +
/// `wait_for_exit` in the parent. Backends without a duplicate primitive
/// report `supports_fork() == false` and only see `serialize_heap`.
pub trait RuntimeSnapshotBackend: Send + Sync {
    /// Whether the process can be duplicated for capture.
    fn supports_fork(&self) -> bool;

    /// # Errors
    /// Returns [`BackendError::Unsupported`] if this backend cannot capture
    /// the running process at all.
    fn check_compatible(&self) -> Result<(), BackendError>;

    /// Whether serialized snapshots omit primitive array contents.
    fn produces_stripped(&self) -> bool {
        false
    }

    /// # Errors
    /// Returns an error if mutator threads could not be paused.
    fn suspend_threads(&self) -> Result<(), BackendError>;

    /// # Errors
    /// Returns [`BackendError::ForkFailed`] if no duplicate was created.
    fn duplicate_process(&self) -> Result<ForkBranch, BackendError>;

    /// Write the heap of the calling process to `path`.
    ///
    /// # Errors
    /// Returns an error if the snapshot could not be written.
    fn serialize_heap(&self, path: &Path) -> Result<(), BackendError>;

    /// # Errors
    /// Returns an error if paused threads could not be restarted.
    fn resume_threads(&self) -> Result<(), BackendError>;

    /// Wait for the duplicate to exit. `Ok(true)` means it reported success.
    ///
    /// # Errors
    /// Returns [`BackendError::Timeout`] past `timeout` (the duplicate is
    /// killed) or [`BackendError::WaitFailed`] if it cannot be waited on.
    fn wait_for_exit(&self, pid: Pid, timeout: Duration) -> Result<bool, BackendError>;

    /// Terminate the duplicate without running any parent cleanup.
    fn exit_child(&self, success: bool) -> !;
}
