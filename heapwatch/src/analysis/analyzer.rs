//! Offline analysis of one snapshot/report pair
//!
//! Phases flush to the report as they finish: class infos and leak objects,
//! instance-filter time, GC paths, path-finding time, then the done flag. A
//! crash between phases leaves an incomplete report for the recovery scan.

use heapwatch_common::AnalysisJob;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use super::finder::LeakFinder;
use super::heap_graph::HeapGraphProvider;
use crate::config::AnalysisConfig;
use crate::domain::PipelineError;
use crate::report::store::{ReportPersistence, ReportStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub candidates: usize,
    pub gc_paths: usize,
    pub filter_time: Duration,
    pub path_time: Duration,
}

pub struct HeapAnalyzer {
    provider: Arc<dyn HeapGraphProvider>,
    config: AnalysisConfig,
}

impl std::fmt::Debug for HeapAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapAnalyzer").field("config", &self.config).finish_non_exhaustive()
    }
}

impl HeapAnalyzer {
    #[must_use]
    pub fn new(provider: Arc<dyn HeapGraphProvider>, config: AnalysisConfig) -> Self {
        Self { provider, config }
    }

    /// Open the job's report and analyze its snapshot into it.
    ///
    /// # Errors
    /// See [`HeapAnalyzer::analyze`]; also fails if the report cannot be opened.
    pub fn run_job(
        &self,
        job: &AnalysisJob,
        persistence: Arc<dyn ReportPersistence>,
    ) -> Result<AnalysisSummary, PipelineError> {
        let mut store = ReportStore::open(&job.report_path, persistence)?;
        self.analyze(job, &mut store)
    }

    /// # Errors
    /// Returns [`PipelineError::AnalysisFailed`] if the snapshot cannot be
    /// opened or path finding fails, or a report error if a flush fails. The
    /// report is left in place either way.
    pub fn analyze(
        &self,
        job: &AnalysisJob,
        store: &mut ReportStore,
    ) -> Result<AnalysisSummary, PipelineError> {
        info!("Analyzing {} ({})", job.snapshot_path.display(), job.reason);
        let graph = self.provider.open(&job.snapshot_path).map_err(|e| {
            error!("{e}");
            PipelineError::AnalysisFailed(e.to_string())
        })?;

        let mut finder = LeakFinder::new(graph.as_ref(), &self.config);
        let classification = finder.classify();
        store.add_class_infos(classification.class_infos.clone())?;
        store.add_leak_objects(classification.leak_objects.clone())?;
        store.set_filter_instance_time(classification.elapsed)?;

        let (paths, path_time) = finder
            .find_paths(&classification)
            .map_err(|e| PipelineError::AnalysisFailed(e.to_string()))?;
        let summary = AnalysisSummary {
            candidates: classification.candidates().len(),
            gc_paths: paths.len(),
            filter_time: classification.elapsed,
            path_time,
        };
        store.add_gc_paths(paths)?;
        store.set_find_gc_path_time(path_time)?;
        store.mark_done()?;

        info!(
            "Analysis of {} done: {} candidates, {} paths",
            job.snapshot_path.display(),
            summary.candidates,
            summary.gc_paths
        );
        Ok(summary)
    }
}
