//! Metric sources for the stock monitors
//!
//! Heap figures come from a [`HeapUsageSampler`] supplied by the host runtime;
//! fd and thread counts are read from /proc.

use anyhow::{bail, Result};
use std::sync::Arc;

use super::metric_monitor::MetricSource;
use crate::proc_stats::{self, ProcTarget};

/// Managed heap usage at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapUsage {
    pub used_bytes: u64,
    pub max_bytes: u64,
}

impl HeapUsage {
    /// Occupancy in percent, `None` when the limit is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio_percent(&self) -> Option<f64> {
        if self.max_bytes == 0 {
            return None;
        }
        Some(100.0 * self.used_bytes as f64 / self.max_bytes as f64)
    }
}

/// Reports the host's managed heap usage.
pub trait HeapUsageSampler: Send + Sync {
    /// # Errors
    /// Returns an error if the usage cannot be read.
    fn heap_usage(&self) -> Result<HeapUsage>;
}

/// Sampler treating a process's resident set as its heap.
///
/// The limit is the configured override, falling back to physical memory.
#[derive(Debug, Clone)]
pub struct RssHeapSampler {
    target: ProcTarget,
    limit_bytes: Option<u64>,
}

impl RssHeapSampler {
    #[must_use]
    pub fn new(target: ProcTarget, limit_bytes: Option<u64>) -> Self {
        Self { target, limit_bytes }
    }
}

impl HeapUsageSampler for RssHeapSampler {
    fn heap_usage(&self) -> Result<HeapUsage> {
        let status = proc_stats::read_status(self.target)?;
        let max_bytes = match self.limit_bytes {
            Some(limit) => limit,
            None => proc_stats::mem_total_bytes()?,
        };
        Ok(HeapUsage { used_bytes: status.vm_rss_kb * 1024, max_bytes })
    }
}

/// Heap occupancy ratio in percent.
pub struct HeapOccupancySource {
    sampler: Arc<dyn HeapUsageSampler>,
}

impl HeapOccupancySource {
    pub fn new(sampler: Arc<dyn HeapUsageSampler>) -> Self {
        Self { sampler }
    }
}

impl MetricSource for HeapOccupancySource {
    fn sample(&mut self) -> Result<f64> {
        let usage = self.sampler.heap_usage()?;
        match usage.ratio_percent() {
            Some(ratio) => Ok(ratio),
            None => bail!("heap limit unknown"),
        }
    }
}

/// Heap growth in bytes since the previous sample. The first sample reads
/// zero; shrinking reads as a negative delta.
pub struct HeapThrashingSource {
    sampler: Arc<dyn HeapUsageSampler>,
    last_used: Option<u64>,
}

impl HeapThrashingSource {
    pub fn new(sampler: Arc<dyn HeapUsageSampler>) -> Self {
        Self { sampler, last_used: None }
    }
}

impl MetricSource for HeapThrashingSource {
    #[allow(clippy::cast_precision_loss)]
    fn sample(&mut self) -> Result<f64> {
        let used = self.sampler.heap_usage()?.used_bytes;
        let delta = match self.last_used {
            Some(last) => used as f64 - last as f64,
            None => 0.0,
        };
        self.last_used = Some(used);
        Ok(delta)
    }
}

/// Open file descriptor count.
pub struct FdCountSource {
    target: ProcTarget,
}

impl FdCountSource {
    #[must_use]
    pub fn new(target: ProcTarget) -> Self {
        Self { target }
    }
}

impl MetricSource for FdCountSource {
    #[allow(clippy::cast_precision_loss)]
    fn sample(&mut self) -> Result<f64> {
        Ok(proc_stats::fd_count(self.target)? as f64)
    }
}

/// Live thread count.
pub struct ThreadCountSource {
    target: ProcTarget,
}

impl ThreadCountSource {
    #[must_use]
    pub fn new(target: ProcTarget) -> Self {
        Self { target }
    }
}

impl MetricSource for ThreadCountSource {
    fn sample(&mut self) -> Result<f64> {
        Ok(f64::from(proc_stats::read_status(self.target)?.threads))
    }
}
