//! Process statistics from the /proc filesystem
//!
//! Feeds the fd/thread/heap monitor sources and the running-info section of
//! the report.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::domain::Pid;

/// Which process to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcTarget {
    Current,
    Other(Pid),
}

impl ProcTarget {
    fn path(self, leaf: &str) -> PathBuf {
        match self {
            ProcTarget::Current => PathBuf::from(format!("/proc/self/{leaf}")),
            ProcTarget::Other(pid) => PathBuf::from(format!("/proc/{}/{leaf}", pid.0)),
        }
    }
}

/// Subset of `/proc/<pid>/status` used by heapwatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcStatus {
    pub name: String,
    pub vm_size_kb: u64,
    pub vm_rss_kb: u64,
    pub threads: u32,
}

/// Parse the contents of `/proc/<pid>/status`.
#[must_use]
pub fn parse_status(content: &str) -> ProcStatus {
    let mut status = ProcStatus::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Name" => status.name = value.to_string(),
            "VmSize" => status.vm_size_kb = leading_number(value),
            "VmRSS" => status.vm_rss_kb = leading_number(value),
            "Threads" => {
                status.threads = u32::try_from(leading_number(value)).unwrap_or(u32::MAX);
            }
            _ => {}
        }
    }
    status
}

// "123456 kB" -> 123456
fn leading_number(value: &str) -> u64 {
    value.split_whitespace().next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

/// Read and parse `/proc/<pid>/status`.
///
/// # Errors
/// Returns an error if the status file cannot be read.
pub fn read_status(target: ProcTarget) -> Result<ProcStatus> {
    let path = target.path("status");
    let content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_status(&content))
}

/// Number of open file descriptors.
///
/// # Errors
/// Returns an error if `/proc/<pid>/fd` is not readable.
pub fn fd_count(target: ProcTarget) -> Result<usize> {
    let path = target.path("fd");
    let entries =
        fs::read_dir(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(entries.flatten().count())
}

/// Command name of the process (`/proc/<pid>/comm`).
///
/// # Errors
/// Returns an error if the comm file cannot be read.
pub fn process_name(target: ProcTarget) -> Result<String> {
    let path = target.path("comm");
    let comm =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(comm.trim().to_string())
}

/// Proportional set size from `/proc/<pid>/smaps_rollup`.
///
/// # Errors
/// Returns an error if the rollup is unreadable or has no `Pss` line.
pub fn pss_kb(target: ProcTarget) -> Result<u64> {
    let path = target.path("smaps_rollup");
    let content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .lines()
        .find_map(|line| line.strip_prefix("Pss:"))
        .map(|value| leading_number(value.trim()))
        .with_context(|| format!("Pss not found in {}", path.display()))
}

/// Total physical memory in bytes from `/proc/meminfo`.
///
/// # Errors
/// Returns an error if meminfo is unreadable or has no `MemTotal` line.
pub fn mem_total_bytes() -> Result<u64> {
    let content = fs::read_to_string("/proc/meminfo").context("Failed to read /proc/meminfo")?;
    content
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .map(|value| leading_number(value.trim()) * 1024)
        .context("MemTotal not found in /proc/meminfo")
}

/// Kernel release string, e.g. `6.1.0-arch1-1`.
#[must_use]
pub fn kernel_release() -> String {
    fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
