//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep heap object ids, class ids and process ids
//! from being mixed up across the monitor, dump and analysis layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process ID
///
/// Represents a process ID in the system (the dumping child, a worker, or a
/// watched process).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i32> for Pid {
    #[allow(clippy::cast_sign_loss)]
    fn from(pid: i32) -> Self {
        Pid(pid as u32)
    }
}

impl From<Pid> for i32 {
    #[allow(clippy::cast_possible_wrap)]
    fn from(pid: Pid) -> Self {
        pid.0 as i32
    }
}

/// Heap object id
///
/// Identifier assigned to an instance or array by the heap graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.0)
    }
}

/// Heap class id
///
/// Identifier of a class object in the heap graph. Stable for the lifetime of
/// one opened snapshot only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(pub u64);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class@{:#x}", self.0)
    }
}

/// Consecutive-over-count of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct OverCount(pub u32);

impl OverCount {
    #[must_use]
    pub fn increment(self) -> Self {
        OverCount(self.0.saturating_add(1))
    }
}

impl fmt::Display for OverCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
