//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "heapwatch",
    version,
    about = "Inspect heapwatch storage and watch processes for memory pressure",
    after_help = "\
EXAMPLES:
    heapwatch scan --root /var/lib/app/heapwatch            Dry-run recovery scan
    heapwatch scan --root /var/lib/app/heapwatch --apply    Delete unrecoverable pairs
    heapwatch show report/2024-05-01_10-00-00.json          Print a report
    heapwatch watch --pid 1234 --rss-limit-mb 2048 --fd 800 Exit 3 when a monitor fires"
)]
pub struct Args {
    /// Pipeline configuration file (JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Classify stored reports the way a starting pipeline would
    Scan {
        /// Storage root (defaults to the configured root_dir)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Delete discarded files instead of only listing them
        #[arg(long)]
        apply: bool,
    },

    /// Print running info, class infos and GC paths of a report
    Show {
        #[arg(value_name = "REPORT")]
        report: PathBuf,
    },

    /// Run the stock monitors against another process's /proc metrics
    Watch {
        /// Process ID to watch
        #[arg(short, long)]
        pid: u32,

        /// Memory limit the heap ratio is computed against (default: physical memory)
        #[arg(long, value_name = "MB")]
        rss_limit_mb: Option<u64>,

        /// Enable the fd monitor with this open-descriptor threshold
        #[arg(long, value_name = "N")]
        fd: Option<u32>,

        /// Enable the thread monitor with this thread-count threshold
        #[arg(long, value_name = "N")]
        threads: Option<u32>,

        /// Stop after N seconds (0 = unlimited)
        #[arg(long, default_value = "0")]
        duration: u64,
    },

    /// Analyze the job passed in HEAPWATCH_ANALYSIS_JOB (started by the analysis runner)
    #[command(hide = true)]
    Worker,
}
