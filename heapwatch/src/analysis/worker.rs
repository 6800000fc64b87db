//! Analysis execution
//!
//! Analysis can exhaust memory on its own, so the stock runner executes it in
//! a separate worker process. The job travels as JSON in
//! [`ANALYSIS_JOB_ENV`]; the worker's exit status is the completion signal.
//!
//! Worker side (the `heapwatch worker` subcommand does this):
//!
//! ```ignore
//! if let Some(job) = worker::job_from_env()? {
//!     std::process::exit(worker::run_job(&job, &analyzer, persistence));
//! }
//! ```

use anyhow::Context;
use heapwatch_common::{AnalysisJob, ANALYSIS_JOB_ENV, WORKER_EXIT_FAILED, WORKER_EXIT_OK};
use log::{debug, error, info, warn};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use super::analyzer::HeapAnalyzer;
use crate::domain::PipelineError;
use crate::report::store::ReportPersistence;

/// Called exactly once when a started analysis finishes.
pub type CompletionCallback = Box<dyn FnOnce(Result<(), PipelineError>) + Send>;

pub trait AnalysisRunner: Send + Sync {
    /// Start `job` in the background.
    ///
    /// # Errors
    /// Returns an error if the job could not be started; `done` is not
    /// called in that case.
    fn run(&self, job: AnalysisJob, done: CompletionCallback) -> Result<(), PipelineError>;
}

/// Runs each job in a fresh worker process.
#[derive(Debug, Clone)]
pub struct ProcessAnalysisRunner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessAnalysisRunner {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl AnalysisRunner for ProcessAnalysisRunner {
    fn run(&self, job: AnalysisJob, done: CompletionCallback) -> Result<(), PipelineError> {
        let payload = job.to_env_value().map_err(|e| {
            PipelineError::AnalysisFailed(format!("cannot encode analysis job: {e}"))
        })?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(ANALYSIS_JOB_ENV, payload)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                PipelineError::AnalysisFailed(format!(
                    "cannot launch analysis worker {}: {e}",
                    self.program.display()
                ))
            })?;
        info!("Analysis worker {} started for {}", child.id(), job.snapshot_path.display());

        let pid = child.id();
        let (child_tx, child_rx) = crossbeam_channel::bounded::<Child>(1);
        let spawned =
            std::thread::Builder::new().name("heapwatch-analysis-wait".to_string()).spawn(move || {
                let Ok(mut child) = child_rx.recv() else {
                    return;
                };
                let result = match child.wait() {
                    Ok(status) if status.success() => Ok(()),
                    Ok(status) => Err(PipelineError::AnalysisFailed(format!(
                        "analysis worker exited with {status}"
                    ))),
                    Err(e) => Err(PipelineError::Io(e)),
                };
                done(result);
            });
        if let Err(e) = spawned {
            warn!("No wait thread for analysis worker {pid}, killing it");
            reap(&mut child);
            return Err(PipelineError::Io(e));
        }
        if child_tx.send(child).is_err() {
            return Err(PipelineError::AnalysisFailed(format!(
                "wait thread for analysis worker {pid} exited early"
            )));
        }
        Ok(())
    }
}

/// Kill `child` and collect its exit status so no zombie is left.
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("kill of analysis worker {} failed: {e}", child.id());
    }
    if let Err(e) = child.wait() {
        debug!("wait for analysis worker {} failed: {e}", child.id());
    }
}

/// Runs each job on a background thread of the calling process.
pub struct InProcessAnalysisRunner {
    analyzer: Arc<HeapAnalyzer>,
    persistence: Arc<dyn ReportPersistence>,
}

impl InProcessAnalysisRunner {
    #[must_use]
    pub fn new(analyzer: Arc<HeapAnalyzer>, persistence: Arc<dyn ReportPersistence>) -> Self {
        Self { analyzer, persistence }
    }
}

impl AnalysisRunner for InProcessAnalysisRunner {
    fn run(&self, job: AnalysisJob, done: CompletionCallback) -> Result<(), PipelineError> {
        let analyzer = Arc::clone(&self.analyzer);
        let persistence = Arc::clone(&self.persistence);
        std::thread::Builder::new().name("heapwatch-analysis".to_string()).spawn(move || {
            done(analyzer.run_job(&job, persistence).map(|_| ()));
        })?;
        Ok(())
    }
}

/// Job handed to this process by a [`ProcessAnalysisRunner`], if any.
///
/// # Errors
/// Returns an error if the variable is set but is not a valid job.
pub fn job_from_env() -> anyhow::Result<Option<AnalysisJob>> {
    parse_job(std::env::var_os(ANALYSIS_JOB_ENV))
}

/// Decode the raw value of [`ANALYSIS_JOB_ENV`]. `None` means no job.
///
/// # Errors
/// Returns an error if the value is not UTF-8 or not a valid job.
pub fn parse_job(value: Option<OsString>) -> anyhow::Result<Option<AnalysisJob>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value
        .into_string()
        .map_err(|_| anyhow::anyhow!("{ANALYSIS_JOB_ENV} is not valid UTF-8"))?;
    let job = AnalysisJob::from_env_value(&value)
        .with_context(|| format!("Failed to parse {ANALYSIS_JOB_ENV}"))?;
    debug!("Worker received job for {}", job.snapshot_path.display());
    Ok(Some(job))
}

/// Worker entry point. Returns the process exit code.
pub fn run_job(
    job: &AnalysisJob,
    analyzer: &HeapAnalyzer,
    persistence: Arc<dyn ReportPersistence>,
) -> i32 {
    match analyzer.run_job(job, persistence) {
        Ok(_) => WORKER_EXIT_OK,
        Err(e) => {
            error!("Analysis of {} failed: {e}", job.snapshot_path.display());
            WORKER_EXIT_FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::heap_graph::{
        ArrayKind, ArrayRef, ClassRef, FieldValue, GcRootKind, HeapGraph, HeapGraphProvider,
        InstanceRef, LeakChain,
    };
    use crate::config::AnalysisConfig;
    use crate::domain::{ClassId, GraphError, ObjectId};
    use crate::report::store::{JsonFilePersistence, ReportStore};
    use crossbeam_channel::bounded;
    use heapwatch_common::AnalysisReason;
    use std::collections::HashSet;
    use std::path::Path;
    use std::time::Duration;

    fn job() -> AnalysisJob {
        AnalysisJob {
            snapshot_path: PathBuf::from("/tmp/a.hprof"),
            report_path: PathBuf::from("/tmp/a.json"),
            reason: AnalysisReason::Immediate,
        }
    }

    fn run_shell(script: &str) -> Result<(), PipelineError> {
        let (tx, rx) = bounded(1);
        ProcessAnalysisRunner::new("/bin/sh")
            .with_args(["-c", script])
            .run(job(), Box::new(move |result| {
                let _ = tx.send(result);
            }))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_worker_sees_job_and_exit_status() {
        assert!(run_shell(&format!("test -n \"${ANALYSIS_JOB_ENV}\"")).is_ok());
        let err = run_shell("exit 1").unwrap_err();
        assert!(matches!(err, PipelineError::AnalysisFailed(msg) if msg.contains("exit")));
    }

    #[test]
    fn test_missing_worker_program() {
        let runner = ProcessAnalysisRunner::new("/nonexistent/heapwatch-worker");
        let result = runner.run(job(), Box::new(|_| {}));
        assert!(matches!(result, Err(PipelineError::AnalysisFailed(_))));
    }

    #[test]
    fn test_reap_collects_killed_worker() {
        let mut child = Command::new("/bin/sh").args(["-c", "sleep 30"]).spawn().unwrap();
        reap(&mut child);
        let status = child.try_wait().unwrap().expect("worker still running");
        assert!(!status.success());
        // Reaping an already collected worker is harmless.
        reap(&mut child);
    }

    #[test]
    fn test_parse_job_from_runner_encoding() {
        let encoded = job().to_env_value().unwrap();
        assert_eq!(parse_job(Some(OsString::from(encoded))).unwrap(), Some(job()));
        assert_eq!(parse_job(None).unwrap(), None);
    }

    #[test]
    fn test_parse_job_malformed() {
        let err = parse_job(Some(OsString::from("{\"snapshotPath\": 3"))).unwrap_err();
        assert!(err.to_string().contains(ANALYSIS_JOB_ENV));
    }

    #[test]
    fn test_job_from_env_unset() {
        // Worker mode is off unless a runner set the variable.
        if std::env::var_os(ANALYSIS_JOB_ENV).is_none() {
            assert!(job_from_env().unwrap().is_none());
        }
    }

    struct EmptyGraph;

    impl HeapGraph for EmptyGraph {
        fn find_class_by_name(&self, _name: &str) -> Option<ClassRef> {
            None
        }

        fn class_hierarchy(&self, _class_id: ClassId) -> Vec<ClassRef> {
            Vec::new()
        }

        fn instances(&self) -> Box<dyn Iterator<Item = InstanceRef> + '_> {
            Box::new(std::iter::empty())
        }

        fn arrays(&self, _kind: ArrayKind) -> Box<dyn Iterator<Item = ArrayRef> + '_> {
            Box::new(std::iter::empty())
        }

        fn field(
            &self,
            _instance: ObjectId,
            _declaring_class: &str,
            _name: &str,
        ) -> Option<FieldValue> {
            None
        }

        fn find_leak_paths(
            &self,
            _candidates: &HashSet<ObjectId>,
            _gc_roots: &HashSet<GcRootKind>,
        ) -> Result<Vec<LeakChain>, GraphError> {
            Ok(Vec::new())
        }
    }

    struct Provider {
        readable: bool,
    }

    impl HeapGraphProvider for Provider {
        fn open(&self, snapshot: &Path) -> Result<Box<dyn HeapGraph>, GraphError> {
            if !self.readable {
                let detail = "truncated".to_string();
                return Err(GraphError::Open { path: snapshot.to_path_buf(), detail });
            }
            Ok(Box::new(EmptyGraph))
        }
    }

    fn job_in(dir: &tempfile::TempDir) -> AnalysisJob {
        let report_path = dir.path().join("a.json");
        ReportStore::create(&report_path, Arc::new(JsonFilePersistence)).unwrap();
        let snapshot_path = dir.path().join("a.hprof");
        AnalysisJob { snapshot_path, report_path, reason: AnalysisReason::Reanalysis }
    }

    fn analyzer(readable: bool) -> HeapAnalyzer {
        HeapAnalyzer::new(Arc::new(Provider { readable }), AnalysisConfig::default())
    }

    #[test]
    fn test_run_job_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(&dir);

        let broken = analyzer(false);
        assert_eq!(run_job(&job, &broken, Arc::new(JsonFilePersistence)), WORKER_EXIT_FAILED);
        assert!(!JsonFilePersistence.load(&job.report_path).unwrap().analysis_done);

        let readable = analyzer(true);
        assert_eq!(run_job(&job, &readable, Arc::new(JsonFilePersistence)), WORKER_EXIT_OK);
        assert!(JsonFilePersistence.load(&job.report_path).unwrap().analysis_done);
    }

    #[test]
    fn test_run_job_missing_report_fails() {
        let dir = tempfile::tempdir().unwrap();
        let job = AnalysisJob { report_path: dir.path().join("gone.json"), ..job() };
        let readable = analyzer(true);
        assert_eq!(run_job(&job, &readable, Arc::new(JsonFilePersistence)), WORKER_EXIT_FAILED);
    }
}
