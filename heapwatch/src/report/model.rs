//! Report document
//!
//! One JSON document per snapshot. Field names are camelCase on disk; the
//! top-level keys are `runningInfo`, `gcPaths`, `classInfos`, `leakObjects`,
//! `analysisDone` and `reAnalysisTimes`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeapReport {
    pub running_info: RunningInfo,
    pub gc_paths: Vec<GcPath>,
    pub class_infos: Vec<ClassInfo>,
    pub leak_objects: Vec<LeakObject>,
    pub analysis_done: bool,
    /// `None` until the first reanalysis
    pub re_analysis_times: Option<u32>,
}

/// Process and host state at dump time, plus analysis timings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunningInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap_max_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap_used_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vss_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pss_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fd_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heapwatch_version: Option<String>,
    /// Instance classification time (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_instance_time: Option<u64>,
    /// Path finding time (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub find_gc_path_time: Option<u64>,
}

/// Reference chain shared by `instance_count` leaking objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GcPath {
    pub instance_count: usize,
    pub leak_reason: String,
    pub gc_root: String,
    /// Hash of the chain shape
    pub signature: String,
    /// Root first, leaking object last
    pub path: Vec<PathItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PathItem {
    /// `Class.field`, or the class alone for array entries
    pub reference: String,
    pub reference_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_class: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassInfo {
    pub class_name: String,
    pub instance_count: u64,
    pub leak_instance_count: u64,
}

/// Oversized object (big array or bitmap).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LeakObject {
    pub class_name: String,
    pub size: u64,
    pub object_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_detail: Option<String>,
}
