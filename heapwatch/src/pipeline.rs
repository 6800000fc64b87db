//! Pipeline wiring
//!
//! ```text
//!   start ─▶ eligibility ─▶ recovery scan ─┬─ resumable pair ─▶ AnalysisTrigger (Reanalysis)
//!                                          └─ otherwise ──────▶ monitors ─▶ DumpTrigger
//!                                                                              │
//!        upload hooks ◀── done ◀── AnalysisTrigger (Immediate) ◀── dumped ◀────┘
//! ```
//!
//! One [`Pipeline`] per process lifetime. Dropping it stops the monitors.

#![allow(clippy::cast_precision_loss)]

use heapwatch_common::{AnalysisJob, AnalysisReason, DumpReason, MetricKind};
use log::{error, info, warn};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::analysis::trigger::{AnalysisListener, AnalysisOutcome, AnalysisTrigger};
use crate::analysis::worker::AnalysisRunner;
use crate::config::MonitorsConfig;
use crate::context::PipelineContext;
use crate::domain::PipelineError;
use crate::dump::{DumpListener, DumpOutcome, DumpTrigger, RuntimeSnapshotBackend, SnapshotDumper};
use crate::eligibility::check_eligibility;
use crate::foreground::ForegroundState;
use crate::monitor::{
    FdCountSource, HeapOccupancySource, HeapThrashingSource, HeapUsageSampler, Monitor,
    ThreadCountSource, Threshold, ValueKind,
};
use crate::proc_stats::ProcTarget;
use crate::report::files::{remove_quietly, HeapFiles};
use crate::report::recovery::ReanalysisChecker;

// ============================================================================
// Host Hooks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    DumpStart,
    Dumped,
    DumpFailed,
    AnalysisStart,
    AnalysisDone,
    AnalysisFailed,
}

pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, progress: Progress);
}

/// Receives the snapshot of a finished analysis. The snapshot is deleted
/// once this returns.
pub trait SnapshotUploader: Send + Sync {
    fn upload(&self, snapshot: &Path);
}

/// Receives the finished report.
pub trait ReportUploader: Send + Sync {
    /// Returns `true` to have the report deleted.
    fn upload(&self, report: &Path) -> bool;
}

#[derive(Default, Clone)]
pub struct PipelineHooks {
    pub progress: Option<Arc<dyn ProgressListener>>,
    pub snapshot_uploader: Option<Arc<dyn SnapshotUploader>>,
    pub report_uploader: Option<Arc<dyn ReportUploader>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A previous lifetime's pair is being analyzed; monitors stay off
    Reanalyzing(AnalysisJob),
    Monitoring,
}

// ============================================================================
// Stock Monitors
// ============================================================================

/// Monitors enabled in `config`, sampling `target`.
#[must_use]
pub fn stock_monitors(
    config: &MonitorsConfig,
    sampler: &Arc<dyn HeapUsageSampler>,
    target: ProcTarget,
) -> Vec<Monitor> {
    let mut monitors = Vec::new();

    if config.heap.enabled {
        let max_bytes = sampler.heap_usage().map(|u| u.max_bytes).unwrap_or(0);
        let heap = &config.heap;
        let mut threshold = Threshold::new(
            heap.effective_ratio(max_bytes),
            ValueKind::Percent,
            true,
            heap.over_count,
            Duration::from_millis(heap.poll_interval_ms),
        );
        if let Some(force) = heap.force_ratio_percent {
            threshold = threshold.with_force_value(force);
        }
        let source = HeapOccupancySource::new(Arc::clone(sampler));
        monitors.push(Monitor::new(MetricKind::Heap, threshold, source));
    }

    if config.heap_thrashing.enabled {
        let thrash = &config.heap_thrashing;
        let threshold = Threshold::new(
            thrash.delta_bytes as f64,
            ValueKind::Bytes,
            false,
            thrash.over_count,
            Duration::from_millis(thrash.poll_interval_ms),
        );
        monitors.push(Monitor::new(
            MetricKind::HeapThrashing,
            threshold,
            HeapThrashingSource::new(Arc::clone(sampler)),
        ));
    }

    if config.fd.enabled {
        let threshold = Threshold::new(
            f64::from(config.fd.count),
            ValueKind::Count,
            true,
            config.fd.over_count,
            Duration::from_millis(config.fd.poll_interval_ms),
        );
        monitors.push(Monitor::new(MetricKind::Fd, threshold, FdCountSource::new(target)));
    }

    if config.thread.enabled {
        let threshold = Threshold::new(
            f64::from(config.thread.count),
            ValueKind::Count,
            true,
            config.thread.over_count,
            Duration::from_millis(config.thread.poll_interval_ms),
        );
        monitors.push(Monitor::new(MetricKind::Thread, threshold, ThreadCountSource::new(target)));
    }

    monitors
}

// ============================================================================
// Pipeline
// ============================================================================

struct PipelineInner {
    ctx: Arc<PipelineContext>,
    backend: Arc<dyn RuntimeSnapshotBackend>,
    dump: Arc<DumpTrigger>,
    analysis: Arc<AnalysisTrigger>,
    hooks: PipelineHooks,
    this: Weak<PipelineInner>,
}

impl PipelineInner {
    fn progress(&self, progress: Progress) {
        if let Some(listener) = &self.hooks.progress {
            listener.on_progress(progress);
        }
    }

    fn start(this: &Arc<Self>) -> Result<StartOutcome, PipelineError> {
        let config = this.ctx.config();
        check_eligibility(config, this.backend.as_ref())?;

        let checker = ReanalysisChecker::new(
            this.ctx.layout(),
            this.ctx.persistence().as_ref(),
            config.reanalysis_max_times,
        );
        let scan = checker.scan(true)?;
        if let Some(job) = scan.resumable().cloned() {
            return match this.analyze(job.clone()) {
                AnalysisOutcome::Failed(e) => Err(e),
                _ => Ok(StartOutcome::Reanalyzing(job)),
            };
        }

        let sampler = this.ctx.heap_sampler();
        let monitors = stock_monitors(&config.monitors, sampler, ProcTarget::Current);
        if monitors.is_empty() {
            warn!("No monitors enabled; only manual dumps will be taken");
        }
        let listener: Arc<dyn DumpListener> = Arc::clone(this) as Arc<dyn DumpListener>;
        this.dump.start_track(monitors, listener)?;
        Ok(StartOutcome::Monitoring)
    }

    fn analyze(&self, job: AnalysisJob) -> AnalysisOutcome {
        let Some(this) = self.this.upgrade() else {
            return AnalysisOutcome::Skipped;
        };
        self.analysis.trigger(job, this)
    }
}

impl DumpListener for PipelineInner {
    fn on_dump_trigger(&self, _reason: DumpReason) {
        self.progress(Progress::DumpStart);
    }

    fn on_heap_dumped(&self, reason: DumpReason, files: &HeapFiles) {
        self.progress(Progress::Dumped);
        if !reason.analyze_immediately() {
            info!("{reason} snapshot left for the next launch");
            return;
        }
        let job = AnalysisJob {
            snapshot_path: files.snapshot.path.clone(),
            report_path: files.report.path.clone(),
            reason: AnalysisReason::Immediate,
        };
        self.analyze(job);
    }

    fn on_heap_dump_failed(&self, _reason: DumpReason, _error: &PipelineError) {
        self.progress(Progress::DumpFailed);
    }
}

impl AnalysisListener for PipelineInner {
    fn on_analysis_start(&self, _job: &AnalysisJob) {
        self.progress(Progress::AnalysisStart);
    }

    fn on_analysis_done(&self, job: &AnalysisJob) {
        if let Some(uploader) = &self.hooks.snapshot_uploader {
            uploader.upload(&job.snapshot_path);
        }
        remove_quietly(&job.snapshot_path);
        if let Some(uploader) = &self.hooks.report_uploader {
            if uploader.upload(&job.report_path) {
                remove_quietly(&job.report_path);
            }
        }
        self.progress(Progress::AnalysisDone);
    }

    fn on_analysis_failed(&self, job: &AnalysisJob, error: &PipelineError) {
        warn!(
            "Analysis of {} failed, report kept for reanalysis: {error}",
            job.report_path.display()
        );
        self.progress(Progress::AnalysisFailed);
    }
}

pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("ctx", &self.inner.ctx)
            .field("dump", &self.inner.dump)
            .field("analysis", &self.inner.analysis)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        ctx: Arc<PipelineContext>,
        backend: Arc<dyn RuntimeSnapshotBackend>,
        runner: Arc<dyn AnalysisRunner>,
        foreground: Arc<dyn ForegroundState>,
        hooks: PipelineHooks,
    ) -> Self {
        let config = ctx.config();
        let dumper = SnapshotDumper::new(
            Arc::clone(&backend),
            config.min_free_disk_bytes,
            Duration::from_millis(config.dump_wait_timeout_ms),
        );
        let dump = Arc::new(DumpTrigger::new(Arc::clone(&ctx), dumper));
        let analysis =
            Arc::new(AnalysisTrigger::new(Arc::clone(ctx.persistence()), runner, foreground));
        analysis.watch_foreground();

        let inner = Arc::new_cyclic(|this| PipelineInner {
            ctx,
            backend,
            dump,
            analysis,
            hooks,
            this: this.clone(),
        });
        Self { inner }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.inner.ctx
    }

    #[must_use]
    pub fn dump_trigger(&self) -> &Arc<DumpTrigger> {
        &self.inner.dump
    }

    #[must_use]
    pub fn analysis_trigger(&self) -> &Arc<AnalysisTrigger> {
        &self.inner.analysis
    }

    /// Check eligibility, run the recovery scan, then either resume a
    /// previous pair or start the monitors.
    ///
    /// # Errors
    /// Returns [`PipelineError::Ineligible`] before anything is touched, or
    /// an error from the recovery scan, the resumed analysis, or the monitor
    /// thread spawn.
    pub fn start(&self) -> Result<StartOutcome, PipelineError> {
        PipelineInner::start(&self.inner)
    }

    /// Run [`Pipeline::start`] on a background thread after the configured
    /// start delay.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn_delayed(&self) -> std::io::Result<JoinHandle<()>> {
        let inner = Arc::clone(&self.inner);
        let delay = Duration::from_millis(inner.ctx.config().start_delay_ms);
        std::thread::Builder::new().name("heapwatch-start".to_string()).spawn(move || {
            std::thread::sleep(delay);
            match PipelineInner::start(&inner) {
                Ok(outcome) => info!("Pipeline started: {outcome:?}"),
                Err(e) => error!("Pipeline did not start: {e}"),
            }
        })
    }

    /// Dump now, then analyze in this lifetime.
    pub fn manual_trigger(&self) -> DumpOutcome {
        self.inner.dump.trigger(DumpReason::Manual, self.inner.as_ref())
    }

    /// Dump now, leaving analysis to the next launch.
    pub fn manual_trigger_on_crash(&self) -> DumpOutcome {
        self.inner.dump.trigger(DumpReason::ManualOnCrash, self.inner.as_ref())
    }

    pub fn stop(&self) {
        self.inner.dump.stop_track();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
