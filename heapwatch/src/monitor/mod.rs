//! Memory-pressure monitoring
//!
//! - [`threshold`]: trigger value, direction, over-count and poll interval
//! - [`metric_monitor`]: one metric evaluated with hysteresis
//! - [`scheduler`]: dedicated polling thread, first fire wins
//! - [`sources`]: heap, heap-thrashing, fd and thread metric sources

pub mod metric_monitor;
pub mod scheduler;
pub mod sources;
pub mod threshold;

pub use metric_monitor::{MetricSource, Monitor, MonitorSample};
pub use scheduler::{FireEvent, MonitorScheduler, PollLoop, SchedulerState};
pub use sources::{
    FdCountSource, HeapOccupancySource, HeapThrashingSource, HeapUsage, HeapUsageSampler,
    RssHeapSampler, ThreadCountSource,
};
pub use threshold::{Threshold, ValueKind};
