//! Analysis trigger: foreground-gated, at most once per process lifetime
//!
//! A trigger while the host is backgrounded is parked and replayed when it
//! returns to the foreground. The latch is taken only when a job actually
//! starts, so a parked job does not block itself.

use heapwatch_common::{AnalysisJob, AnalysisReason};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::worker::AnalysisRunner;
use crate::domain::PipelineError;
use crate::foreground::ForegroundState;
use crate::report::store::{ReportPersistence, ReportStore};

/// Analysis lifecycle callbacks. All methods default to no-ops.
pub trait AnalysisListener: Send + Sync {
    fn on_analysis_start(&self, _job: &AnalysisJob) {}

    fn on_analysis_done(&self, _job: &AnalysisJob) {}

    fn on_analysis_failed(&self, _job: &AnalysisJob, _error: &PipelineError) {}
}

#[derive(Debug)]
pub enum AnalysisOutcome {
    /// Parked until the host returns to the foreground
    Deferred,
    /// Latch already taken, or a job is already parked
    Skipped,
    Started,
    Failed(PipelineError),
}

struct Pending {
    job: AnalysisJob,
    listener: Arc<dyn AnalysisListener>,
}

pub struct AnalysisTrigger {
    persistence: Arc<dyn ReportPersistence>,
    runner: Arc<dyn AnalysisRunner>,
    foreground: Arc<dyn ForegroundState>,
    triggered: AtomicBool,
    pending: Mutex<Option<Pending>>,
}

impl std::fmt::Debug for AnalysisTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisTrigger")
            .field("triggered", &self.is_triggered())
            .field("pending", &self.has_pending())
            .finish_non_exhaustive()
    }
}

impl AnalysisTrigger {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn ReportPersistence>,
        runner: Arc<dyn AnalysisRunner>,
        foreground: Arc<dyn ForegroundState>,
    ) -> Self {
        Self {
            persistence,
            runner,
            foreground,
            triggered: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    /// Replay the parked job whenever the host comes to the foreground.
    pub fn watch_foreground(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.foreground.on_foreground_changed(Box::new(move |foreground| {
            if !foreground {
                return;
            }
            if let Some(trigger) = weak.upgrade() {
                trigger.replay_pending();
            }
        }));
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending().is_some()
    }

    fn pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn trigger(
        &self,
        job: AnalysisJob,
        listener: Arc<dyn AnalysisListener>,
    ) -> AnalysisOutcome {
        if self.is_triggered() {
            info!("Analysis already triggered, ignoring {}", job.reason);
            return AnalysisOutcome::Skipped;
        }
        if !self.foreground.is_foreground() {
            {
                let mut pending = self.pending();
                if pending.is_some() {
                    warn!("Analysis already parked, ignoring {}", job.reason);
                    return AnalysisOutcome::Skipped;
                }
                info!("Host in background, parking {} analysis", job.reason);
                *pending = Some(Pending { job, listener });
            }
            // The host may have come back between the check and the park.
            if self.foreground.is_foreground() {
                self.replay_pending();
            }
            return AnalysisOutcome::Deferred;
        }
        self.start(job, listener)
    }

    fn replay_pending(&self) {
        let parked = self.pending().take();
        if let Some(Pending { job, listener }) = parked {
            info!("Host in foreground, starting parked {} analysis", job.reason);
            self.start(job, listener);
        }
    }

    fn start(&self, job: AnalysisJob, listener: Arc<dyn AnalysisListener>) -> AnalysisOutcome {
        if self.triggered.swap(true, Ordering::SeqCst) {
            info!("Analysis already triggered, ignoring {}", job.reason);
            return AnalysisOutcome::Skipped;
        }

        if let Err(e) = self.record_start(&job) {
            error!("Cannot start analysis of {}: {e}", job.snapshot_path.display());
            listener.on_analysis_failed(&job, &e);
            return AnalysisOutcome::Failed(e);
        }
        listener.on_analysis_start(&job);

        let finished_job = job.clone();
        let finished_listener = Arc::clone(&listener);
        let done = Box::new(move |result: Result<(), PipelineError>| match result {
            Ok(()) => finished_listener.on_analysis_done(&finished_job),
            Err(e) => {
                error!("Analysis of {} failed: {e}", finished_job.snapshot_path.display());
                finished_listener.on_analysis_failed(&finished_job, &e);
            }
        });

        match self.runner.run(job.clone(), done) {
            Ok(()) => AnalysisOutcome::Started,
            Err(e) => {
                error!("Cannot launch analysis: {e}");
                listener.on_analysis_failed(&job, &e);
                AnalysisOutcome::Failed(e)
            }
        }
    }

    fn record_start(&self, job: &AnalysisJob) -> Result<(), PipelineError> {
        let mut store = ReportStore::open(&job.report_path, Arc::clone(&self.persistence))?;
        store.add_analysis_reason(job.reason)?;
        if job.reason == AnalysisReason::Reanalysis {
            store.record_reanalysis()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::worker::CompletionCallback;
    use crate::foreground::{AlwaysForeground, ForegroundSignal};
    use crate::report::store::JsonFilePersistence;
    use std::sync::atomic::AtomicUsize;

    /// Completes every job synchronously.
    #[derive(Default)]
    struct ImmediateRunner {
        runs: AtomicUsize,
    }

    impl AnalysisRunner for ImmediateRunner {
        fn run(&self, _job: AnalysisJob, done: CompletionCallback) -> Result<(), PipelineError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            done(Ok(()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<&'static str>>);

    impl AnalysisListener for Events {
        fn on_analysis_start(&self, _job: &AnalysisJob) {
            self.0.lock().unwrap().push("start");
        }

        fn on_analysis_done(&self, _job: &AnalysisJob) {
            self.0.lock().unwrap().push("done");
        }

        fn on_analysis_failed(&self, _job: &AnalysisJob, _error: &PipelineError) {
            self.0.lock().unwrap().push("failed");
        }
    }

    fn job(dir: &tempfile::TempDir, reason: AnalysisReason) -> AnalysisJob {
        let report_path = dir.path().join("a.json");
        ReportStore::create(&report_path, Arc::new(JsonFilePersistence)).unwrap();
        AnalysisJob { snapshot_path: dir.path().join("a.hprof"), report_path, reason }
    }

    fn trigger(
        foreground: Arc<dyn ForegroundState>,
    ) -> (Arc<AnalysisTrigger>, Arc<ImmediateRunner>) {
        let runner = Arc::new(ImmediateRunner::default());
        let trigger = Arc::new(AnalysisTrigger::new(
            Arc::new(JsonFilePersistence),
            runner.clone(),
            foreground,
        ));
        trigger.watch_foreground();
        (trigger, runner)
    }

    #[test]
    fn test_runs_once_per_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let (trigger, runner) = trigger(Arc::new(AlwaysForeground));
        let events = Arc::new(Events::default());
        let first = trigger.trigger(job(&dir, AnalysisReason::Immediate), events.clone());
        assert!(matches!(first, AnalysisOutcome::Started));
        let second = trigger.trigger(job(&dir, AnalysisReason::Test), events.clone());
        assert!(matches!(second, AnalysisOutcome::Skipped));
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert_eq!(*events.0.lock().unwrap(), vec!["start", "done"]);
    }

    #[test]
    fn test_background_defers_until_foreground() {
        let dir = tempfile::tempdir().unwrap();
        let signal = Arc::new(ForegroundSignal::new(false));
        let (trigger, runner) = trigger(signal.clone());
        let events = Arc::new(Events::default());

        let outcome = trigger.trigger(job(&dir, AnalysisReason::Immediate), events.clone());
        assert!(matches!(outcome, AnalysisOutcome::Deferred));
        assert!(trigger.has_pending());
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);

        signal.set_foreground(true);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert!(!trigger.has_pending());
        assert!(trigger.is_triggered());

        // A second trip through the background replays nothing.
        signal.set_foreground(false);
        signal.set_foreground(true);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reanalysis_counts_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let (trigger, _) = trigger(Arc::new(AlwaysForeground));
        let job = job(&dir, AnalysisReason::Reanalysis);
        trigger.trigger(job.clone(), Arc::new(Events::default()));
        let report = JsonFilePersistence.load(&job.report_path).unwrap();
        assert_eq!(report.re_analysis_times, Some(1));
        assert_eq!(report.running_info.analysis_reason.as_deref(), Some("REANALYSIS"));
    }

    #[test]
    fn test_missing_report_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let (trigger, runner) = trigger(Arc::new(AlwaysForeground));
        let events = Arc::new(Events::default());
        let job = AnalysisJob {
            snapshot_path: dir.path().join("gone.hprof"),
            report_path: dir.path().join("gone.json"),
            reason: AnalysisReason::Immediate,
        };
        assert!(matches!(trigger.trigger(job, events.clone()), AnalysisOutcome::Failed(_)));
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
        assert_eq!(*events.0.lock().unwrap(), vec!["failed"]);
    }
}
