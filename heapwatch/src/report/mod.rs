//! Report ledger: document model, persistence, file pairing and the
//! startup recovery scan.

pub mod files;
pub mod model;
pub mod recovery;
pub mod store;

pub use files::{HeapFiles, ReportFile, SnapshotFile, StorageLayout};
pub use model::{ClassInfo, GcPath, HeapReport, LeakObject, PathItem, RunningInfo};
pub use recovery::{Decision, DiscardReason, ReanalysisChecker, RecoveryScan};
pub use store::{JsonFilePersistence, ReportPersistence, ReportStore};
