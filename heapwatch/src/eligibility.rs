//! Eligibility checks for heapwatch
//!
//! Run before the pipeline touches any file, thread or process. Each check
//! maps to one [`IneligibleReason`].

#![allow(unsafe_code)] // statvfs() requires unsafe

use log::{debug, warn};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::config::PipelineConfig;
use crate::domain::{IneligibleReason, PipelineError};
use crate::dump::RuntimeSnapshotBackend;
use crate::proc_stats::{self, ProcTarget};

/// Run all eligibility checks for a pipeline about to start.
///
/// # Errors
/// Returns [`PipelineError::Ineligible`] naming the first failed check.
pub fn check_eligibility(
    config: &PipelineConfig,
    backend: &dyn RuntimeSnapshotBackend,
) -> Result<(), PipelineError> {
    check_runtime(backend)
        .and_then(|()| check_disk_space(&config.root_dir, config.min_free_disk_bytes))
        .and_then(|()| check_process_name(config.process_name.as_deref()))
        .map_err(|reason| {
            warn!("Pipeline disabled: {reason}");
            PipelineError::Ineligible(reason)
        })
}

fn check_runtime(backend: &dyn RuntimeSnapshotBackend) -> Result<(), IneligibleReason> {
    backend
        .check_compatible()
        .map_err(|e| IneligibleReason::UnsupportedRuntime(e.to_string()))
}

/// Check that the filesystem holding `root` has `required` bytes free.
///
/// # Errors
/// Returns [`IneligibleReason::InsufficientDisk`] if it does not, or if the
/// free space cannot be determined.
pub fn check_disk_space(root: &Path, required: u64) -> Result<(), IneligibleReason> {
    let available = match available_disk_bytes(root) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Cannot stat filesystem of {}: {e}", root.display());
            0
        }
    };
    debug!("{} bytes free under {}", available, root.display());
    if available < required {
        return Err(IneligibleReason::InsufficientDisk { available, required });
    }
    Ok(())
}

fn check_process_name(expected: Option<&str>) -> Result<(), IneligibleReason> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual =
        proc_stats::process_name(ProcTarget::Current).unwrap_or_else(|_| "unknown".to_string());
    if actual == expected {
        Ok(())
    } else {
        Err(IneligibleReason::ProcessMismatch { expected: expected.to_string(), actual })
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
/// A path that does not exist yet is resolved to its nearest existing
/// ancestor.
///
/// # Errors
/// Returns an error if no ancestor exists or `statvfs` fails.
#[allow(clippy::useless_conversion)] // field widths differ between targets
pub fn available_disk_bytes(path: &Path) -> std::io::Result<u64> {
    let existing = path.ancestors().find(|p| p.exists()).unwrap_or_else(|| Path::new("/"));
    let c_path = CString::new(existing.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `c_path` is NUL-terminated and `stat` is a valid out pointer;
    // statvfs is plain-old-data so a zeroed value is a valid initial state.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(u64::from(stat.f_bavail).saturating_mul(u64::from(stat.f_frsize)))
}
