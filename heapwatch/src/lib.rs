//! # heapwatch - In-process memory-pressure detection and leak diagnostics
//!
//! heapwatch samples a long-running process's memory metrics, decides when
//! the process is in a sustained out-of-memory trend, captures a heap
//! snapshot without pausing the host for the whole dump, and analyzes the
//! snapshot out of process to find suspiciously retained objects and the
//! reference chains keeping them alive.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Host Application                          │
//! │        (heap sampler, thread control, heap serializer)          │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ samples every poll interval
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  monitor: Threshold ─▶ Monitor ─▶ MonitorScheduler (1 thread)   │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ first fire wins
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  dump: DumpTrigger ─▶ SnapshotDumper ─▶ fork ─▶ child writes    │
//! │                       (parent resumes, waits on exit status)    │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ snapshot + report pair
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  analysis: AnalysisTrigger ─▶ worker process ─▶ LeakFinder      │
//! │            (foreground-gated)      │    detectors + generation  │
//! │                                    │    cache + path finding    │
//! └────────────────────────────────────┼────────────────────────────┘
//!                                      ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  report: ReportStore (flush per phase) + ReanalysisChecker      │
//! │          (startup recovery of incomplete pairs)                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`monitor`]: thresholds, hysteresis, the polling thread and stock metric sources
//! - [`dump`]: the fork-and-dump protocol and the once-per-lifetime dump latch
//! - [`analysis`]: heap graph interface, leak detectors, candidate finder,
//!   analysis trigger and worker runners
//! - [`report`]: report document, crash-resilient store, file pairing, recovery scan
//! - [`pipeline`]: wires the above together for one process lifetime
//! - [`context`]: per-run context replacing global state
//! - [`config`]: serde-backed configuration with stock defaults
//! - [`eligibility`]: runtime, disk and process checks run before anything starts
//! - [`foreground`], [`running_info`], [`proc_stats`]: host-facing helpers
//! - [`domain`]: newtypes and error enums
//! - [`cli`]: arguments of the `heapwatch` ops binary
//!
//! ## Typical Usage
//!
//! ```ignore
//! let ctx = Arc::new(PipelineContext::new(PipelineConfig::from_file(path)?)?);
//! let backend = Arc::new(LibcForkBackend::new(my_threads, my_serializer));
//! let runner = Arc::new(ProcessAnalysisRunner::new(worker_exe));
//! let pipeline = Pipeline::new(ctx, backend, runner, Arc::new(AlwaysForeground), PipelineHooks::default());
//! pipeline.spawn_delayed()?;
//! ```

pub mod analysis;
pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod dump;
pub mod eligibility;
pub mod foreground;
pub mod monitor;
pub mod pipeline;
pub mod proc_stats;
pub mod report;
pub mod running_info;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use pipeline::{Pipeline, PipelineHooks, Progress, StartOutcome};
