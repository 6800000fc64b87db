//! Pipeline configuration
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields the stock behaviour. Loaded once per pipeline run and carried by
//! [`crate::context::PipelineContext`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analysis::heap_graph::GcRootKind;
use crate::domain::ConfigError;

const MB: u64 = 1024 * 1024;

/// Heap ratio tiers keyed by the heap limit: bigger heaps trigger earlier.
const HEAP_RATIO_TIERS: [(u64, f64); 3] = [(510 * MB, 80.0), (250 * MB, 85.0), (128 * MB, 90.0)];
const HEAP_RATIO_FALLBACK: f64 = 80.0;

/// Stock occupancy percentage for a heap of `max_bytes`.
#[must_use]
pub fn heap_ratio_for_max(max_bytes: u64) -> f64 {
    HEAP_RATIO_TIERS
        .iter()
        .find(|(floor, _)| max_bytes >= *floor)
        .map_or(HEAP_RATIO_FALLBACK, |(_, ratio)| *ratio)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Snapshots land in `<root>/hprof`, reports in `<root>/report`
    pub root_dir: PathBuf,
    pub monitors: MonitorsConfig,
    pub analysis: AnalysisConfig,
    /// Incomplete reports resumed this many times before being discarded
    pub reanalysis_max_times: u32,
    pub min_free_disk_bytes: u64,
    pub dump_wait_timeout_ms: u64,
    pub start_delay_ms: u64,
    /// Only a process with this name may run the pipeline
    pub process_name: Option<String>,
    /// Overrides the heap limit reported by the default sampler
    pub heap_limit_bytes: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join("heapwatch"),
            monitors: MonitorsConfig::default(),
            analysis: AnalysisConfig::default(),
            reanalysis_max_times: 2,
            min_free_disk_bytes: 5 * 1024 * MB,
            dump_wait_timeout_ms: 120_000,
            start_delay_ms: 10_000,
            process_name: None,
            heap_limit_bytes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MonitorsConfig {
    pub heap: HeapMonitorConfig,
    pub heap_thrashing: ThrashingMonitorConfig,
    pub fd: FdMonitorConfig,
    pub thread: ThreadMonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapMonitorConfig {
    pub enabled: bool,
    /// `None` picks the tier from the heap limit
    pub ratio_percent: Option<f64>,
    /// Any sample above this fires without waiting for the over-count
    pub force_ratio_percent: Option<f64>,
    pub over_count: u32,
    pub poll_interval_ms: u64,
}

impl Default for HeapMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ratio_percent: None,
            force_ratio_percent: Some(95.0),
            over_count: 3,
            poll_interval_ms: 5_000,
        }
    }
}

impl HeapMonitorConfig {
    /// Ratio in effect for a heap limit of `max_bytes`.
    #[must_use]
    pub fn effective_ratio(&self, max_bytes: u64) -> f64 {
        self.ratio_percent.unwrap_or_else(|| heap_ratio_for_max(max_bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrashingMonitorConfig {
    pub enabled: bool,
    pub delta_bytes: u64,
    pub over_count: u32,
    pub poll_interval_ms: u64,
}

impl Default for ThrashingMonitorConfig {
    fn default() -> Self {
        Self { enabled: false, delta_bytes: 100 * MB, over_count: 3, poll_interval_ms: 5_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdMonitorConfig {
    pub enabled: bool,
    pub count: u32,
    pub over_count: u32,
    pub poll_interval_ms: u64,
}

impl Default for FdMonitorConfig {
    fn default() -> Self {
        Self { enabled: false, count: 800, over_count: 3, poll_interval_ms: 15_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadMonitorConfig {
    pub enabled: bool,
    pub count: u32,
    pub over_count: u32,
    pub poll_interval_ms: u64,
}

impl Default for ThreadMonitorConfig {
    fn default() -> Self {
        Self { enabled: false, count: 750, over_count: 3, poll_interval_ms: 15_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Element count at which a primitive array is reported
    pub big_primitive_array: usize,
    /// Element count at which an object array is reported
    pub big_object_array: usize,
    pub big_bitmap_pixels: u64,
    /// Leaking instances of one class forwarded to path finding
    pub same_class_leak_cap: usize,
    pub gc_roots: Vec<GcRootKind>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            big_primitive_array: 256 * 1024,
            big_object_array: 256 * 1024,
            big_bitmap_pixels: 768 * 1366,
            same_class_leak_cap: 45,
            gc_roots: GcRootKind::DEFAULT_SET.to_vec(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails [`PipelineConfig::validate`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|error| ConfigError::Parse { path: path.to_path_buf(), error })?;
        config.validate()?;
        Ok(config)
    }

    /// Location of the snapshot directory.
    #[must_use]
    pub fn snapshot_dir(&self) -> PathBuf {
        self.root_dir.join("hprof")
    }

    /// Location of the report directory.
    #[must_use]
    pub fn report_dir(&self) -> PathBuf {
        self.root_dir.join("report")
    }

    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.monitors;
        let over_counts = [
            ("monitors.heap.over_count", m.heap.over_count),
            ("monitors.heap_thrashing.over_count", m.heap_thrashing.over_count),
            ("monitors.fd.over_count", m.fd.over_count),
            ("monitors.thread.over_count", m.thread.over_count),
        ];
        for (name, value) in over_counts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }

        let intervals = [
            ("monitors.heap.poll_interval_ms", m.heap.poll_interval_ms),
            ("monitors.heap_thrashing.poll_interval_ms", m.heap_thrashing.poll_interval_ms),
            ("monitors.fd.poll_interval_ms", m.fd.poll_interval_ms),
            ("monitors.thread.poll_interval_ms", m.thread.poll_interval_ms),
            ("dump_wait_timeout_ms", self.dump_wait_timeout_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }

        let percents = [
            ("monitors.heap.ratio_percent", m.heap.ratio_percent),
            ("monitors.heap.force_ratio_percent", m.heap.force_ratio_percent),
        ];
        for (name, value) in percents {
            if let Some(p) = value {
                if !(p > 0.0 && p <= 100.0) {
                    return Err(ConfigError::Invalid(format!(
                        "{name} must be in (0, 100], got {p}"
                    )));
                }
            }
        }

        if self.analysis.same_class_leak_cap == 0 {
            return Err(ConfigError::Invalid(
                "analysis.same_class_leak_cap must be at least 1".to_string(),
            ));
        }
        if self.reanalysis_max_times == 0 {
            return Err(ConfigError::Invalid("reanalysis_max_times must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_heap_ratio_tiers() {
        assert!((heap_ratio_for_max(512 * MB) - 80.0).abs() < f64::EPSILON);
        assert!((heap_ratio_for_max(256 * MB) - 85.0).abs() < f64::EPSILON);
        assert!((heap_ratio_for_max(128 * MB) - 90.0).abs() < f64::EPSILON);
        assert!((heap_ratio_for_max(64 * MB) - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.monitors.heap.over_count, 3);
        assert_eq!(config.monitors.fd.count, 800);
        assert_eq!(config.analysis.big_primitive_array, 262_144);
        assert_eq!(config.analysis.same_class_leak_cap, 45);
        assert_eq!(config.reanalysis_max_times, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"monitors": {{"fd": {{"enabled": true}}}}, "reanalysis_max_times": 3}}"#)
            .unwrap();
        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert!(config.monitors.fd.enabled);
        assert_eq!(config.monitors.fd.count, 800);
        assert_eq!(config.monitors.thread.count, 750);
        assert_eq!(config.reanalysis_max_times, 3);
    }

    #[test]
    fn test_validate_rejects_zero_over_count() {
        let mut config = PipelineConfig::default();
        config.monitors.thread.over_count = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("monitors.thread.over_count"));
    }

    #[test]
    fn test_validate_rejects_bad_percent() {
        let mut config = PipelineConfig::default();
        config.monitors.heap.ratio_percent = Some(120.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = PipelineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
