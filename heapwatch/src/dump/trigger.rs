//! Dump trigger: at most one snapshot per process lifetime
//!
//! Fire events from the monitor thread and manual requests from the host
//! race on one latch; the loser is a silent no-op.

use heapwatch_common::DumpReason;
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::dumper::SnapshotDumper;
use crate::context::PipelineContext;
use crate::domain::PipelineError;
use crate::monitor::{Monitor, MonitorScheduler};
use crate::report::files::HeapFiles;
use crate::report::store::ReportStore;

/// Dump lifecycle callbacks. All methods default to no-ops.
pub trait DumpListener: Send + Sync {
    fn on_dump_trigger(&self, _reason: DumpReason) {}

    fn on_heap_dumped(&self, _reason: DumpReason, _files: &HeapFiles) {}

    /// Both files are deleted after this returns.
    fn on_heap_dump_failed(&self, _reason: DumpReason, _error: &PipelineError) {}
}

#[derive(Debug)]
pub enum DumpOutcome {
    /// Latch already taken
    Skipped,
    Captured(HeapFiles),
    Failed(PipelineError),
}

pub struct DumpTrigger {
    ctx: Arc<PipelineContext>,
    dumper: SnapshotDumper,
    triggered: AtomicBool,
    scheduler: Mutex<MonitorScheduler>,
}

impl std::fmt::Debug for DumpTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpTrigger")
            .field("triggered", &self.is_triggered())
            .finish_non_exhaustive()
    }
}

impl DumpTrigger {
    #[must_use]
    pub fn new(ctx: Arc<PipelineContext>, dumper: SnapshotDumper) -> Self {
        Self {
            ctx,
            dumper,
            triggered: AtomicBool::new(false),
            scheduler: Mutex::new(MonitorScheduler::new()),
        }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    fn scheduler(&self) -> MutexGuard<'_, MonitorScheduler> {
        self.scheduler.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Start polling `monitors`; the first to fire triggers a dump.
    ///
    /// # Errors
    /// Returns an error if the monitor thread cannot be spawned.
    pub fn start_track(
        self: &Arc<Self>,
        monitors: Vec<Monitor>,
        listener: Arc<dyn DumpListener>,
    ) -> std::io::Result<()> {
        if self.is_triggered() {
            info!("Dump already triggered, not starting monitors");
            return Ok(());
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler().start(monitors, move |event| {
            if let Some(trigger) = weak.upgrade() {
                info!("{} monitor fired at {:?}", event.metric, event.value);
                // The scheduler already stopped itself before calling back.
                trigger.run(event.reason, listener.as_ref(), false);
            }
        })
    }

    /// Stop the monitors without dumping.
    pub fn stop_track(&self) {
        self.scheduler().stop();
    }

    /// Dump now. Monitors are stopped first.
    pub fn trigger(&self, reason: DumpReason, listener: &dyn DumpListener) -> DumpOutcome {
        self.run(reason, listener, true)
    }

    fn run(
        &self,
        reason: DumpReason,
        listener: &dyn DumpListener,
        stop_monitors: bool,
    ) -> DumpOutcome {
        if self.triggered.swap(true, Ordering::SeqCst) {
            info!("Dump already triggered, ignoring {reason}");
            return DumpOutcome::Skipped;
        }
        if stop_monitors {
            self.stop_track();
        }

        info!("Dump triggered: {reason}");
        listener.on_dump_trigger(reason);

        let files = match self.ctx.layout().new_pair(self.dumper.produces_stripped()) {
            Ok(files) => files,
            Err(e) => {
                let e = PipelineError::CaptureFailed(format!("cannot create snapshot files: {e}"));
                error!("{e}");
                listener.on_heap_dump_failed(reason, &e);
                return DumpOutcome::Failed(e);
            }
        };

        match self.capture(reason, &files) {
            Ok(()) => {
                listener.on_heap_dumped(reason, &files);
                DumpOutcome::Captured(files)
            }
            Err(e) => {
                error!("Dump for {reason} failed: {e}");
                listener.on_heap_dump_failed(reason, &e);
                files.delete();
                DumpOutcome::Failed(e)
            }
        }
    }

    fn capture(&self, reason: DumpReason, files: &HeapFiles) -> Result<(), PipelineError> {
        let mut store =
            ReportStore::create(&files.report.path, Arc::clone(self.ctx.persistence()))?;
        store.add_dump_reason(reason)?;
        store.add_running_info(self.ctx.running_info())?;
        self.dumper.try_dump(&files.snapshot.path)?;
        Ok(())
    }
}
