//! Heap snapshot capture
//!
//! - [`backend`]: the runtime primitives the capture protocol runs on
//! - [`libc_backend`]: `fork(2)`-based backend for Linux hosts
//! - [`dumper`]: suspend, duplicate, serialize in the child, wait in the parent
//! - [`trigger`]: one dump per process lifetime, report pair bookkeeping

pub mod backend;
pub mod dumper;
pub mod libc_backend;
pub mod trigger;

pub use backend::{ForkBranch, RuntimeSnapshotBackend};
pub use dumper::{DumpMode, SnapshotDumper};
pub use libc_backend::{HeapSerializer, LibcForkBackend, NoThreadControl, ThreadControl};
pub use trigger::{DumpListener, DumpOutcome, DumpTrigger};
