//! Per-run pipeline context
//!
//! Built once when a pipeline starts and shared by `Arc` with every
//! component. Nothing in heapwatch keeps process-global state.

use log::debug;
use std::sync::Arc;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::domain::ConfigError;
use crate::monitor::sources::{HeapUsageSampler, RssHeapSampler};
use crate::proc_stats::ProcTarget;
use crate::report::files::StorageLayout;
use crate::report::model::RunningInfo;
use crate::report::store::{JsonFilePersistence, ReportPersistence};
use crate::running_info::{self, NoHostInfo, RunningInfoFetcher};

pub struct PipelineContext {
    config: PipelineConfig,
    layout: StorageLayout,
    persistence: Arc<dyn ReportPersistence>,
    info_fetcher: Arc<dyn RunningInfoFetcher>,
    heap_sampler: Arc<dyn HeapUsageSampler>,
    started_at: Instant,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    /// Validate `config` and build a context with the stock collaborators:
    /// JSON report files, no host info, and an RSS-based heap sampler.
    ///
    /// # Errors
    /// Returns the first validation error of `config`.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let layout = StorageLayout::new(&config.root_dir);
        let heap_sampler =
            Arc::new(RssHeapSampler::new(ProcTarget::Current, config.heap_limit_bytes));
        Ok(Self {
            config,
            layout,
            persistence: Arc::new(JsonFilePersistence),
            info_fetcher: Arc::new(NoHostInfo),
            heap_sampler,
            started_at: Instant::now(),
        })
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn ReportPersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    #[must_use]
    pub fn with_info_fetcher(mut self, info_fetcher: Arc<dyn RunningInfoFetcher>) -> Self {
        self.info_fetcher = info_fetcher;
        self
    }

    #[must_use]
    pub fn with_heap_sampler(mut self, heap_sampler: Arc<dyn HeapUsageSampler>) -> Self {
        self.heap_sampler = heap_sampler;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    #[must_use]
    pub fn persistence(&self) -> &Arc<dyn ReportPersistence> {
        &self.persistence
    }

    #[must_use]
    pub fn heap_sampler(&self) -> &Arc<dyn HeapUsageSampler> {
        &self.heap_sampler
    }

    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Running info for a report written now.
    #[must_use]
    pub fn running_info(&self) -> RunningInfo {
        let heap = self
            .heap_sampler
            .heap_usage()
            .map_err(|e| debug!("Heap usage unavailable: {e:#}"))
            .ok();
        running_info::collect(self.info_fetcher.as_ref(), heap, self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::sources::HeapUsage;

    struct FixedSampler;

    impl HeapUsageSampler for FixedSampler {
        fn heap_usage(&self) -> anyhow::Result<HeapUsage> {
            Ok(HeapUsage { used_bytes: 100 * 1024 * 1024, max_bytes: 200 * 1024 * 1024 })
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.monitors.heap.over_count = 0;
        assert!(matches!(PipelineContext::new(config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_layout_follows_root_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            PipelineConfig { root_dir: dir.path().to_path_buf(), ..PipelineConfig::default() };
        let ctx = PipelineContext::new(config).unwrap();
        assert_eq!(ctx.layout().snapshot_dir(), ctx.config().snapshot_dir());
        assert_eq!(ctx.layout().report_dir(), ctx.config().report_dir());
    }

    #[test]
    fn test_running_info_uses_heap_sampler() {
        let ctx = PipelineContext::new(PipelineConfig::default())
            .unwrap()
            .with_heap_sampler(Arc::new(FixedSampler));
        let info = ctx.running_info();
        assert_eq!(info.heap_used_mb, Some(100));
        assert_eq!(info.heap_max_mb, Some(200));
    }
}
