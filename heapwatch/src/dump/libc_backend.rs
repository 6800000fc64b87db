//! Linux snapshot backend built on `fork(2)`
//!
//! The duplicate shares the parent's heap copy-on-write, so the parent only
//! stays paused for suspend + fork. Pausing mutators and writing the heap are
//! runtime-specific and come from the host through [`ThreadControl`] and
//! [`HeapSerializer`].

#![allow(unsafe_code)] // fork/waitpid/kill/_exit

use log::{debug, warn};
use std::path::Path;
use std::time::{Duration, Instant};

use super::backend::{ForkBranch, RuntimeSnapshotBackend};
use crate::domain::{BackendError, Pid};

const CHILD_EXIT_OK: i32 = 0;
const CHILD_EXIT_FAILED: i32 = 1;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pauses and restarts the host's mutator threads.
pub trait ThreadControl: Send + Sync {
    /// # Errors
    /// Returns [`BackendError::SuspendFailed`] if threads keep running.
    fn suspend(&self) -> Result<(), BackendError>;

    /// # Errors
    /// Returns an error if paused threads could not be restarted.
    fn resume(&self) -> Result<(), BackendError>;
}

/// Host without a stop-the-world primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThreadControl;

impl ThreadControl for NoThreadControl {
    fn suspend(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn resume(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Writes the managed heap of the calling process.
pub trait HeapSerializer: Send + Sync {
    /// # Errors
    /// Returns [`BackendError::SerializeFailed`] if the image is incomplete.
    fn serialize(&self, path: &Path) -> Result<(), BackendError>;

    fn stripped(&self) -> bool {
        false
    }
}

pub struct LibcForkBackend {
    threads: Box<dyn ThreadControl>,
    serializer: Box<dyn HeapSerializer>,
}

impl LibcForkBackend {
    pub fn new(
        threads: impl ThreadControl + 'static,
        serializer: impl HeapSerializer + 'static,
    ) -> Self {
        Self { threads: Box::new(threads), serializer: Box::new(serializer) }
    }
}

fn exited_ok(status: libc::c_int) -> bool {
    libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == CHILD_EXIT_OK
}

impl RuntimeSnapshotBackend for LibcForkBackend {
    fn supports_fork(&self) -> bool {
        cfg!(target_os = "linux")
    }

    fn check_compatible(&self) -> Result<(), BackendError> {
        if cfg!(target_os = "linux") {
            Ok(())
        } else {
            Err(BackendError::Unsupported(format!(
                "fork snapshots need Linux, running on {}",
                std::env::consts::OS
            )))
        }
    }

    fn produces_stripped(&self) -> bool {
        self.serializer.stripped()
    }

    fn suspend_threads(&self) -> Result<(), BackendError> {
        self.threads.suspend()
    }

    fn duplicate_process(&self) -> Result<ForkBranch, BackendError> {
        // SAFETY: the child only runs the serializer and then `_exit`s.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(BackendError::ForkFailed(std::io::Error::last_os_error())),
            0 => Ok(ForkBranch::Child),
            pid => {
                let pid = Pid::from(pid);
                debug!("Forked dumping child {pid}");
                Ok(ForkBranch::Parent(pid))
            }
        }
    }

    fn serialize_heap(&self, path: &Path) -> Result<(), BackendError> {
        self.serializer.serialize(path)
    }

    fn resume_threads(&self) -> Result<(), BackendError> {
        self.threads.resume()
    }

    fn wait_for_exit(&self, pid: Pid, timeout: Duration) -> Result<bool, BackendError> {
        let raw = i32::from(pid);
        let started = Instant::now();
        let mut status: libc::c_int = 0;
        loop {
            // SAFETY: `status` is a valid out pointer for the call.
            let rc = unsafe { libc::waitpid(raw, &mut status, libc::WNOHANG) };
            match rc {
                0 => {}
                -1 => {
                    let error = std::io::Error::last_os_error();
                    if error.kind() != std::io::ErrorKind::Interrupted {
                        return Err(BackendError::WaitFailed { pid, error });
                    }
                }
                _ => return Ok(exited_ok(status)),
            }

            if started.elapsed() >= timeout {
                warn!("Dumping child {pid} exceeded {timeout:?}, killing it");
                // SAFETY: `raw` is our own unreaped child, so the pid cannot
                // have been recycled.
                unsafe {
                    libc::kill(raw, libc::SIGKILL);
                    libc::waitpid(raw, &mut status, 0);
                }
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                return Err(BackendError::Timeout { pid, waited_ms });
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    fn exit_child(&self, success: bool) -> ! {
        let code = if success { CHILD_EXIT_OK } else { CHILD_EXIT_FAILED };
        // SAFETY: `_exit` skips atexit handlers and stdio flushing inherited
        // from the parent.
        unsafe { libc::_exit(code) }
    }
}
