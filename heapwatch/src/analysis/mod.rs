//! Leak analysis
//!
//! - [`heap_graph`]: the snapshot graph interface analysis runs against
//! - [`hierarchy`]: per-class generation cache for O(1) subclass tests
//! - [`detectors`]: the closed set of per-kind leak heuristics
//! - [`finder`]: one pass over the heap, capped candidates, grouped paths
//! - [`analyzer`]: phase-by-phase analysis of a snapshot into its report
//! - [`trigger`]: foreground-gated, once-per-lifetime analysis start
//! - [`worker`]: out-of-process and in-process runners

pub mod analyzer;
pub mod detectors;
pub mod finder;
pub mod heap_graph;
pub mod hierarchy;
pub mod trigger;
pub mod worker;

pub use analyzer::{AnalysisSummary, HeapAnalyzer};
pub use detectors::{ClassCounter, DetectorKind, LeakDetector};
pub use finder::{chain_signature, group_chains, Classification, LeakCandidate, LeakFinder};
pub use heap_graph::{
    ArrayKind, ArrayRef, ChainReference, ClassRef, FieldValue, GcRootKind, HeapGraph,
    HeapGraphProvider, InstanceRef, LeakChain, ReferenceKind,
};
pub use hierarchy::{ClassGeneration, ClassHierarchyCache};
pub use trigger::{AnalysisListener, AnalysisOutcome, AnalysisTrigger};
pub use worker::{
    AnalysisRunner, CompletionCallback, InProcessAnalysisRunner, ProcessAnalysisRunner,
};
