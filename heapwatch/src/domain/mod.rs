//! Domain model for heapwatch
//!
//! Newtypes for the ids that cross layer boundaries (heap objects, classes,
//! processes, monitor over-counts) and the error enums each layer returns.

pub mod errors;
pub mod types;

pub use types::{ClassId, ObjectId, OverCount, Pid};

pub use errors::{
    BackendError, ConfigError, GraphError, IneligibleReason, PipelineError, ReportError,
};
