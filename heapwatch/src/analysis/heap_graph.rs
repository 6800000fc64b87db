//! Heap graph interface
//!
//! The snapshot file format and the shortest-path search from GC roots live
//! behind [`HeapGraphProvider`] / [`HeapGraph`]. The classification engine
//! only enumerates instances and arrays, reads fields, and hands a bounded
//! candidate set to [`HeapGraph::find_leak_paths`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::domain::{ClassId, GraphError, ObjectId};

// ============================================================================
// GC Roots
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcRootKind {
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    MonitorUsed,
    ThreadObject,
    JniMonitor,
}

impl GcRootKind {
    /// Roots used for path finding unless configured otherwise. Java frames
    /// and monitors are excluded: they anchor short-lived references.
    pub const DEFAULT_SET: [GcRootKind; 7] = [
        GcRootKind::JniGlobal,
        GcRootKind::JniLocal,
        GcRootKind::NativeStack,
        GcRootKind::StickyClass,
        GcRootKind::ThreadBlock,
        GcRootKind::ThreadObject,
        GcRootKind::JniMonitor,
    ];

    /// Human-readable description stored in the report.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            GcRootKind::JniGlobal => "Global variable in native code",
            GcRootKind::JniLocal => "Local variable in native code",
            GcRootKind::JavaFrame => "Java local variable",
            GcRootKind::NativeStack => "Input or output parameters in native code",
            GcRootKind::StickyClass => "System class",
            GcRootKind::ThreadBlock => "Thread block",
            GcRootKind::MonitorUsed => {
                "Monitor (anything that called the wait() or notify() methods, or that is synchronized.)"
            }
            GcRootKind::ThreadObject => "Thread object",
            GcRootKind::JniMonitor => "Root JNI monitor",
        }
    }
}

impl fmt::Display for GcRootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

// ============================================================================
// Graph Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRef {
    pub id: ClassId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    pub object_id: ObjectId,
    pub class_id: ClassId,
    pub class_name: String,
    /// Boxed primitives (`Integer`, `Boolean`, ...)
    pub is_primitive_wrapper: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Primitive,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayRef {
    pub object_id: ObjectId,
    pub class_name: String,
    /// Element count
    pub length: usize,
}

/// Value of an instance field. `None` from [`HeapGraph::field`] means the
/// field does not exist on the named class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Boolean(bool),
    Int(i32),
    Long(i64),
    Object(Option<ObjectId>),
    Other,
}

impl FieldValue {
    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(self) -> Option<i32> {
        match self {
            FieldValue::Int(i) => Some(i),
            _ => None,
        }
    }

    /// `Some(None)` for a null reference, `None` for a non-reference field.
    #[must_use]
    pub fn as_object(self) -> Option<Option<ObjectId>> {
        match self {
            FieldValue::Object(o) => Some(o),
            _ => None,
        }
    }
}

// ============================================================================
// Leak Chains
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceKind {
    InstanceField,
    StaticField,
    ArrayEntry,
    Local,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferenceKind::InstanceField => "INSTANCE_FIELD",
            ReferenceKind::StaticField => "STATIC_FIELD",
            ReferenceKind::ArrayEntry => "ARRAY_ENTRY",
            ReferenceKind::Local => "LOCAL",
        };
        f.write_str(s)
    }
}

/// One hop of a reference chain, from the GC root toward the leaking object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReference {
    /// Class of the object holding the reference
    pub origin_class: String,
    /// Field name, or `[index]` for array entries
    pub display_name: String,
    pub kind: ReferenceKind,
    /// Class declaring the field (differs from `origin_class` for inherited fields)
    pub declared_class: String,
}

/// Shortest path from a GC root to one leak candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakChain {
    pub leaking_object: ObjectId,
    pub gc_root: GcRootKind,
    pub references: Vec<ChainReference>,
    pub leaking_class: String,
    /// `INSTANCE`, `ARRAY` or `CLASS`
    pub leaking_type: String,
    /// Set when the chain matches a known library leak pattern
    pub library_leak: Option<String>,
}

// ============================================================================
// Provider Traits
// ============================================================================

/// Opens snapshot files into queryable graphs.
pub trait HeapGraphProvider: Send + Sync {
    /// # Errors
    /// Returns [`GraphError::Open`] if the snapshot cannot be indexed.
    fn open(&self, snapshot: &Path) -> Result<Box<dyn HeapGraph>, GraphError>;
}

pub trait HeapGraph {
    fn find_class_by_name(&self, name: &str) -> Option<ClassRef>;

    /// Ancestor chain of `class_id`, leaf first, ending at the root type.
    fn class_hierarchy(&self, class_id: ClassId) -> Vec<ClassRef>;

    fn instances(&self) -> Box<dyn Iterator<Item = InstanceRef> + '_>;

    fn arrays(&self, kind: ArrayKind) -> Box<dyn Iterator<Item = ArrayRef> + '_>;

    /// Field `name` declared by `declaring_class` on `instance`.
    fn field(&self, instance: ObjectId, declaring_class: &str, name: &str) -> Option<FieldValue>;

    /// # Errors
    /// Returns [`GraphError::PathFinding`] if the search fails.
    fn find_leak_paths(
        &self,
        candidates: &HashSet<ObjectId>,
        gc_roots: &HashSet<GcRootKind>,
    ) -> Result<Vec<LeakChain>, GraphError>;
}
