//! # heapwatch - Main Entry Point
//!
//! Ops tooling around the heapwatch library:
//! - **scan**: run the startup recovery scan over a storage root
//! - **show**: print a report document
//! - **watch**: run the stock monitors against another process's /proc metrics
//! - **worker**: analysis worker launched by `ProcessAnalysisRunner`

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use heapwatch::analysis::heap_graph::{HeapGraph, HeapGraphProvider};
use heapwatch::analysis::worker::{job_from_env, run_job};
use heapwatch::analysis::HeapAnalyzer;
use heapwatch::cli::{Args, Command};
use heapwatch::config::PipelineConfig;
use heapwatch::domain::{ConfigError, GraphError, Pid};
use heapwatch::monitor::{HeapUsageSampler, MonitorScheduler, RssHeapSampler};
use heapwatch::pipeline::stock_monitors;
use heapwatch::proc_stats::{self, ProcTarget};
use heapwatch::report::{
    Decision, HeapReport, JsonFilePersistence, ReanalysisChecker, ReportPersistence, StorageLayout,
};
use heapwatch_common::ANALYSIS_JOB_ENV;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_FIRED: i32 = 3;

const MB: u64 = 1024 * 1024;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(code) => code,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

/// Errors caused by how the binary was invoked.
#[derive(Debug, thiserror::Error)]
enum UsageError {
    #[error("No monitors enabled; pass --fd/--threads or enable one in the config")]
    NoMonitors,

    #[error("{ANALYSIS_JOB_ENV} is not set; the worker is started by the analysis runner")]
    NoJob,
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let usage = err
        .chain()
        .any(|cause| cause.is::<UsageError>() || cause.is::<ConfigError>());
    if usage {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Snapshot reader for the stock worker. The heap-graph library is linked by
/// the host's own worker build; this one records the failure in the report
/// so the pair stays eligible for reanalysis.
struct NoGraphReader;

impl HeapGraphProvider for NoGraphReader {
    fn open(&self, snapshot: &Path) -> Result<Box<dyn HeapGraph>, GraphError> {
        Err(GraphError::Open {
            path: snapshot.to_path_buf(),
            detail: "no heap graph reader in this build".to_string(),
        })
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Invalid configuration {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

#[tokio::main]
async fn run() -> Result<i32> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Scan { root, apply } => {
            let root = root.unwrap_or_else(|| config.root_dir.clone());
            scan(&root, config.reanalysis_max_times, apply)
        }
        Command::Show { report } => show(&report),
        Command::Watch { pid, rss_limit_mb, fd, threads, duration } => {
            let limit = rss_limit_mb.map(|mb| mb * MB).or(config.heap_limit_bytes);
            watch(&config, Pid(pid), limit, fd, threads, duration).await
        }
        Command::Worker => worker(&config),
    }
}

fn worker(config: &PipelineConfig) -> Result<i32> {
    let job = job_from_env()?.ok_or(UsageError::NoJob)?;
    info!("Worker analyzing {} ({})", job.snapshot_path.display(), job.reason);
    let analyzer = HeapAnalyzer::new(Arc::new(NoGraphReader), config.analysis.clone());
    Ok(run_job(&job, &analyzer, Arc::new(JsonFilePersistence)))
}

fn scan(root: &Path, max_times: u32, apply: bool) -> Result<i32> {
    let layout = StorageLayout::new(root);
    let scan = ReanalysisChecker::new(&layout, &JsonFilePersistence, max_times)
        .scan(apply)
        .with_context(|| format!("Recovery scan of {} failed", root.display()))?;

    if scan.decisions.is_empty() {
        println!("no reports under {}", root.display());
        return Ok(EXIT_SUCCESS);
    }
    for decision in &scan.decisions {
        match decision {
            Decision::Resume(job) => println!("resume    {}", job.report_path.display()),
            Decision::Deferred(job) => println!("deferred  {}", job.report_path.display()),
            Decision::Completed(path) => println!("done      {}", path.display()),
            Decision::Discard { path, reason, .. } => {
                let verb = if apply { "deleted" } else { "discard" };
                println!("{verb:<9} {} ({reason})", path.display());
            }
            Decision::Skipped { path, detail } => {
                println!("skipped   {} ({detail})", path.display());
            }
        }
    }
    Ok(EXIT_SUCCESS)
}

fn show(path: &Path) -> Result<i32> {
    let report = JsonFilePersistence
        .load(path)
        .with_context(|| format!("Failed to load report {}", path.display()))?;
    print_report(&report)?;
    Ok(EXIT_SUCCESS)
}

fn print_report(report: &HeapReport) -> Result<()> {
    let status = if report.analysis_done { "done" } else { "incomplete" };
    println!("analysis: {status}, reanalysis attempts: {}", report.re_analysis_times.unwrap_or(0));
    println!(
        "running info:\n{}",
        serde_json::to_string_pretty(&report.running_info).context("Failed to format running info")?
    );

    if !report.class_infos.is_empty() {
        println!("\n{:<48} {:>10} {:>10}", "CLASS", "INSTANCES", "LEAKING");
        for info in &report.class_infos {
            println!(
                "{:<48} {:>10} {:>10}",
                info.class_name, info.instance_count, info.leak_instance_count
            );
        }
    }

    if !report.leak_objects.is_empty() {
        println!("\nlarge objects:");
        for object in &report.leak_objects {
            let detail = object.ext_detail.as_deref().unwrap_or("");
            println!("  {} {} size={} {detail}", object.class_name, object.object_id, object.size);
        }
    }

    for (i, path) in report.gc_paths.iter().enumerate() {
        println!(
            "\n#{} {} (x{}) root: {}",
            i + 1,
            path.leak_reason,
            path.instance_count,
            path.gc_root
        );
        for item in &path.path {
            println!("    {} [{}]", item.reference, item.reference_type);
        }
    }
    Ok(())
}

async fn watch(
    config: &PipelineConfig,
    pid: Pid,
    limit_bytes: Option<u64>,
    fd: Option<u32>,
    threads: Option<u32>,
    duration: u64,
) -> Result<i32> {
    let target = ProcTarget::Other(pid);
    let status = proc_stats::read_status(target).with_context(|| format!("Cannot watch {pid}"))?;

    let mut monitors = config.monitors.clone();
    if let Some(count) = fd {
        monitors.fd.enabled = true;
        monitors.fd.count = count;
    }
    if let Some(count) = threads {
        monitors.thread.enabled = true;
        monitors.thread.count = count;
    }
    let sampler: Arc<dyn HeapUsageSampler> = Arc::new(RssHeapSampler::new(target, limit_bytes));
    let monitors = stock_monitors(&monitors, &sampler, target);
    if monitors.is_empty() {
        return Err(UsageError::NoMonitors.into());
    }

    println!(
        "heapwatch v{} watching {} ({}), {} monitors",
        env!("CARGO_PKG_VERSION"),
        pid,
        status.name,
        monitors.len()
    );

    let (fire_tx, fire_rx) = bounded(1);
    let mut scheduler = MonitorScheduler::new();
    scheduler
        .start(monitors, move |event| {
            let _ = fire_tx.send(event);
        })
        .context("Failed to start monitor thread")?;

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit = if duration > 0 { Some(Duration::from_secs(duration)) } else { None };
    let proc_dir = format!("/proc/{}", pid.0);

    let code = loop {
        if let Ok(event) = fire_rx.try_recv() {
            println!("{} fired: {} (sample {:?})", event.metric, event.reason, event.value);
            break EXIT_FIRED;
        }
        if duration_limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!("Duration limit reached");
            break EXIT_SUCCESS;
        }
        if !Path::new(&proc_dir).exists() {
            warn!("{pid} exited");
            break EXIT_SUCCESS;
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => {
                break EXIT_SUCCESS;
            }
        }
    };

    scheduler.stop();
    eprintln!("watched {} for {:.1}s", pid, started.elapsed().as_secs_f64());
    Ok(code)
}
