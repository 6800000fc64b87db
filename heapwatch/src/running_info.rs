//! Running-info section of the report
//!
//! Collected at dump time: heap figures from the heap sampler, process memory
//! and counts from /proc, host details from a [`RunningInfoFetcher`].

use chrono::Local;
use log::debug;
use std::time::Instant;

use crate::monitor::sources::HeapUsage;
use crate::proc_stats::{self, ProcTarget};
use crate::report::model::RunningInfo;

const MB: u64 = 1024 * 1024;

/// Host-supplied application details.
pub trait RunningInfoFetcher: Send + Sync {
    fn app_version(&self) -> Option<String> {
        None
    }

    /// Screen, route or request the host was serving
    fn current_page(&self) -> Option<String> {
        None
    }
}

/// Fetcher for hosts with nothing to add.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHostInfo;

impl RunningInfoFetcher for NoHostInfo {}

/// Snapshot of the current process state.
#[must_use]
pub fn collect(
    host: &dyn RunningInfoFetcher,
    heap: Option<HeapUsage>,
    started_at: Instant,
) -> RunningInfo {
    let mut info = RunningInfo {
        heap_max_mb: heap.map(|h| h.max_bytes / MB),
        heap_used_mb: heap.map(|h| h.used_bytes / MB),
        os: Some(std::env::consts::OS.to_string()),
        arch: Some(std::env::consts::ARCH.to_string()),
        kernel_release: Some(proc_stats::kernel_release()),
        app_version: host.app_version(),
        current_page: host.current_page(),
        usage_seconds: Some(started_at.elapsed().as_secs()),
        now_time: Some(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        heapwatch_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        ..RunningInfo::default()
    };

    match proc_stats::read_status(ProcTarget::Current) {
        Ok(status) => {
            info.vss_mb = Some(status.vm_size_kb / 1024);
            info.rss_mb = Some(status.vm_rss_kb / 1024);
            info.thread_count = Some(status.threads);
        }
        Err(e) => debug!("running info: {e:#}"),
    }
    info.pss_mb = proc_stats::pss_kb(ProcTarget::Current).ok().map(|kb| kb / 1024);
    info.fd_count = proc_stats::fd_count(ProcTarget::Current).ok();
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Host;

    impl RunningInfoFetcher for Host {
        fn app_version(&self) -> Option<String> {
            Some("7.1.0".to_string())
        }
    }

    #[test]
    fn test_collect_fills_process_fields() {
        let heap = HeapUsage { used_bytes: 300 * MB, max_bytes: 512 * MB };
        let info = collect(&Host, Some(heap), Instant::now());
        assert_eq!(info.heap_used_mb, Some(300));
        assert_eq!(info.heap_max_mb, Some(512));
        assert_eq!(info.app_version.as_deref(), Some("7.1.0"));
        assert_eq!(info.current_page, None);
        assert!(info.thread_count.unwrap_or(0) >= 1);
        assert!(info.dump_reason.is_none());
    }
}
