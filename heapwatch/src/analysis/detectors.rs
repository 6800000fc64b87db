//! Per-kind leak heuristics
//!
//! The detector set is closed: [`DetectorKind`] names every heuristic and
//! [`LeakDetector::is_leak`] dispatches on it. A detector is built against
//! one opened graph; its tracked class id and generation come from that
//! snapshot.
//!
//! Malformed or missing fields never abort the scan: the instance is logged
//! as abnormal and counted as not leaking.

use log::{debug, warn};

use super::heap_graph::{FieldValue, HeapGraph, InstanceRef};
use super::hierarchy::{leaf_generation, ClassHierarchyCache};
use crate::config::AnalysisConfig;
use crate::domain::ClassId;

pub const ACTIVITY_CLASS: &str = "android.app.Activity";
pub const ANDROIDX_FRAGMENT_CLASS: &str = "androidx.fragment.app.Fragment";
pub const NATIVE_FRAGMENT_CLASS: &str = "android.app.Fragment";
pub const SUPPORT_FRAGMENT_CLASS: &str = "android.support.v4.app.Fragment";
pub const BITMAP_CLASS: &str = "android.graphics.Bitmap";
pub const WINDOW_CLASS: &str = "android.view.Window";
pub const NATIVE_ALLOCATION_CLASS: &str = "libcore.util.NativeAllocationRegistry";
pub const NATIVE_ALLOCATION_THUNK_CLASS: &str =
    "libcore.util.NativeAllocationRegistry$CleanerThunk";

/// Lookup order for fragment base classes; first match wins.
pub const FRAGMENT_CLASSES: [&str; 3] =
    [ANDROIDX_FRAGMENT_CLASS, NATIVE_FRAGMENT_CLASS, SUPPORT_FRAGMENT_CLASS];

const DESTROYED_FIELD: &str = "mDestroyed";
const FINISHED_FIELD: &str = "mFinished";
const FRAGMENT_MANAGER_FIELD: &str = "mFragmentManager";
const FRAGMENT_CALLED_FIELD: &str = "mCalled";
const BITMAP_WIDTH_FIELD: &str = "mWidth";
const BITMAP_HEIGHT_FIELD: &str = "mHeight";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Activity,
    Fragment,
    Bitmap,
    Window,
    NativeAllocation,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 5] = [
        DetectorKind::Activity,
        DetectorKind::Fragment,
        DetectorKind::Bitmap,
        DetectorKind::NativeAllocation,
        DetectorKind::Window,
    ];

    /// Reason recorded for candidates flagged by this detector.
    #[must_use]
    pub fn leak_reason(self) -> &'static str {
        match self {
            DetectorKind::Activity => "Activity Leak",
            DetectorKind::Fragment => "Fragment Leak",
            DetectorKind::Bitmap => "Bitmap Size",
            DetectorKind::Window => "Window",
            DetectorKind::NativeAllocation => "NativeAllocation",
        }
    }
}

/// Instance totals per detector, reported as class infos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassCounter {
    pub instances_count: u64,
    pub leak_instances_count: u64,
}

#[derive(Debug, Clone)]
pub struct LeakDetector {
    kind: DetectorKind,
    class_id: ClassId,
    class_name: String,
    /// Second tracked class (the native allocation cleaner thunk)
    companion_class_id: Option<ClassId>,
    generation: usize,
    supported: bool,
    big_bitmap_pixels: u64,
    counter: ClassCounter,
}

impl LeakDetector {
    /// Build the detector for `kind`, or `None` when its class is absent
    /// from the snapshot. The native allocation detector is always built and
    /// marked unsupported when either of its classes is missing.
    #[must_use]
    pub fn for_graph(
        kind: DetectorKind,
        graph: &dyn HeapGraph,
        config: &AnalysisConfig,
    ) -> Option<Self> {
        let (class, companion_class_id, supported) = match kind {
            DetectorKind::Activity => (graph.find_class_by_name(ACTIVITY_CLASS)?, None, true),
            DetectorKind::Fragment => (
                FRAGMENT_CLASSES.iter().find_map(|name| graph.find_class_by_name(name))?,
                None,
                true,
            ),
            DetectorKind::Bitmap => (graph.find_class_by_name(BITMAP_CLASS)?, None, true),
            DetectorKind::Window => (graph.find_class_by_name(WINDOW_CLASS)?, None, true),
            DetectorKind::NativeAllocation => {
                let registry = graph.find_class_by_name(NATIVE_ALLOCATION_CLASS);
                let thunk = graph.find_class_by_name(NATIVE_ALLOCATION_THUNK_CLASS);
                match (registry, thunk) {
                    (Some(registry), Some(thunk)) => (registry, Some(thunk.id), true),
                    (registry, _) => {
                        debug!("NativeAllocationRegistry classes missing, detector unsupported");
                        let placeholder = registry.unwrap_or(super::heap_graph::ClassRef {
                            id: ClassId(0),
                            name: NATIVE_ALLOCATION_CLASS.to_string(),
                        });
                        (placeholder, None, false)
                    }
                }
            }
        };

        let generation = if supported {
            leaf_generation(&graph.class_hierarchy(class.id))?
        } else {
            1
        };

        Some(Self {
            kind,
            class_id: class.id,
            class_name: class.name,
            companion_class_id,
            generation,
            supported,
            big_bitmap_pixels: config.big_bitmap_pixels,
            counter: ClassCounter::default(),
        })
    }

    /// Every detector whose classes exist in `graph`, in [`DetectorKind::ALL`] order.
    #[must_use]
    pub fn all_for_graph(graph: &dyn HeapGraph, config: &AnalysisConfig) -> Vec<Self> {
        DetectorKind::ALL
            .iter()
            .filter_map(|&kind| {
                let detector = Self::for_graph(kind, graph, config);
                if detector.is_none() {
                    debug!("{kind:?} detector skipped: class not in snapshot");
                }
                detector
            })
            .collect()
    }

    #[must_use]
    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    #[must_use]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Position of the tracked class in its own hierarchy (root = 0).
    #[must_use]
    pub fn generation(&self) -> usize {
        self.generation
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.supported
    }

    #[must_use]
    pub fn counter(&self) -> ClassCounter {
        self.counter
    }

    #[must_use]
    pub fn leak_reason(&self) -> &'static str {
        self.kind.leak_reason()
    }

    /// Whether `class_id` descends from the tracked class. The class must
    /// already be processed by `cache`.
    #[must_use]
    pub fn is_subclass(&self, cache: &ClassHierarchyCache, class_id: ClassId) -> bool {
        if !self.supported {
            return false;
        }
        match cache.id_of_generation(class_id, self.generation) {
            Some(id) => id == self.class_id || Some(id) == self.companion_class_id,
            None => false,
        }
    }

    /// Apply the heuristic to one matching instance, updating the counters.
    pub fn is_leak(&mut self, graph: &dyn HeapGraph, instance: &InstanceRef) -> bool {
        if !self.supported {
            return false;
        }
        self.counter.instances_count += 1;
        let leak = match self.kind {
            DetectorKind::Activity => self.activity_leak(graph, instance),
            DetectorKind::Fragment => self.fragment_leak(graph, instance),
            DetectorKind::Bitmap => self.bitmap_leak(graph, instance),
            DetectorKind::Window | DetectorKind::NativeAllocation => false,
        };
        if leak {
            self.counter.leak_instances_count += 1;
        }
        leak
    }

    fn activity_leak(&self, graph: &dyn HeapGraph, instance: &InstanceRef) -> bool {
        let destroyed = graph
            .field(instance.object_id, &self.class_name, DESTROYED_FIELD)
            .and_then(FieldValue::as_bool);
        let finished = graph
            .field(instance.object_id, &self.class_name, FINISHED_FIELD)
            .and_then(FieldValue::as_bool);
        let (Some(destroyed), Some(finished)) = (destroyed, finished) else {
            warn!(
                "ABNORMAL activity {} {}: {DESTROYED_FIELD}/{FINISHED_FIELD} unreadable",
                instance.class_name, instance.object_id
            );
            return false;
        };
        let leak = destroyed || finished;
        if leak {
            debug!("activity leak: {} {}", instance.class_name, instance.object_id);
        }
        leak
    }

    fn fragment_leak(&self, graph: &dyn HeapGraph, instance: &InstanceRef) -> bool {
        let manager = graph
            .field(instance.object_id, &self.class_name, FRAGMENT_MANAGER_FIELD)
            .and_then(FieldValue::as_object);
        if manager != Some(None) {
            return false;
        }
        let Some(called) = graph
            .field(instance.object_id, &self.class_name, FRAGMENT_CALLED_FIELD)
            .and_then(FieldValue::as_bool)
        else {
            warn!(
                "ABNORMAL fragment {} {}: {FRAGMENT_CALLED_FIELD} unreadable",
                instance.class_name, instance.object_id
            );
            return false;
        };
        if called {
            debug!("fragment leak: {} {}", instance.class_name, instance.object_id);
        }
        called
    }

    fn bitmap_leak(&self, graph: &dyn HeapGraph, instance: &InstanceRef) -> bool {
        let Some((width, height)) = self.bitmap_dimensions(graph, instance) else {
            warn!(
                "ABNORMAL bitmap {} {}: {BITMAP_WIDTH_FIELD}/{BITMAP_HEIGHT_FIELD} unreadable",
                instance.class_name, instance.object_id
            );
            return false;
        };
        let pixels = i64::from(width) * i64::from(height);
        let leak = u64::try_from(pixels).is_ok_and(|p| p >= self.big_bitmap_pixels);
        if leak {
            debug!("bitmap over threshold: {} {width}x{height}", instance.object_id);
        }
        leak
    }

    /// Width and height of a bitmap instance.
    #[must_use]
    pub fn bitmap_dimensions(
        &self,
        graph: &dyn HeapGraph,
        instance: &InstanceRef,
    ) -> Option<(i32, i32)> {
        let width = graph
            .field(instance.object_id, &self.class_name, BITMAP_WIDTH_FIELD)
            .and_then(FieldValue::as_int)?;
        let height = graph
            .field(instance.object_id, &self.class_name, BITMAP_HEIGHT_FIELD)
            .and_then(FieldValue::as_int)?;
        Some((width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::heap_graph::{ArrayKind, ArrayRef, ClassRef, GcRootKind, LeakChain};
    use crate::domain::{GraphError, ObjectId};
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct TinyGraph {
        classes: Vec<(ClassId, &'static str, Option<ClassId>)>,
        fields: HashMap<(ObjectId, &'static str), FieldValue>,
    }

    impl TinyGraph {
        fn class(mut self, id: u64, name: &'static str, parent: Option<u64>) -> Self {
            self.classes.push((ClassId(id), name, parent.map(ClassId)));
            self
        }

        fn field(mut self, object: u64, name: &'static str, value: FieldValue) -> Self {
            self.fields.insert((ObjectId(object), name), value);
            self
        }
    }

    impl HeapGraph for TinyGraph {
        fn find_class_by_name(&self, name: &str) -> Option<ClassRef> {
            self.classes
                .iter()
                .find(|(_, n, _)| *n == name)
                .map(|(id, n, _)| ClassRef { id: *id, name: (*n).to_string() })
        }

        fn class_hierarchy(&self, class_id: ClassId) -> Vec<ClassRef> {
            let mut chain = Vec::new();
            let mut current = Some(class_id);
            while let Some(id) = current {
                let Some((id, name, parent)) = self.classes.iter().find(|(c, _, _)| *c == id) else {
                    break;
                };
                chain.push(ClassRef { id: *id, name: (*name).to_string() });
                current = *parent;
            }
            chain
        }

        fn instances(&self) -> Box<dyn Iterator<Item = InstanceRef> + '_> {
            Box::new(std::iter::empty())
        }

        fn arrays(&self, _kind: ArrayKind) -> Box<dyn Iterator<Item = ArrayRef> + '_> {
            Box::new(std::iter::empty())
        }

        fn field(
            &self,
            instance: ObjectId,
            _declaring_class: &str,
            name: &str,
        ) -> Option<FieldValue> {
            self.fields.iter().find(|((o, n), _)| *o == instance && *n == name).map(|(_, v)| *v)
        }

        fn find_leak_paths(
            &self,
            _candidates: &HashSet<ObjectId>,
            _gc_roots: &HashSet<GcRootKind>,
        ) -> Result<Vec<LeakChain>, GraphError> {
            Ok(Vec::new())
        }
    }

    fn android_graph() -> TinyGraph {
        TinyGraph::default()
            .class(1, "java.lang.Object", None)
            .class(2, "android.content.Context", Some(1))
            .class(3, "android.content.ContextWrapper", Some(2))
            .class(4, "android.view.ContextThemeWrapper", Some(3))
            .class(5, ACTIVITY_CLASS, Some(4))
            .class(6, "com.example.MainActivity", Some(5))
            .class(7, ANDROIDX_FRAGMENT_CLASS, Some(1))
            .class(8, BITMAP_CLASS, Some(1))
            .class(9, WINDOW_CLASS, Some(1))
    }

    fn detector_for(kind: DetectorKind, graph: &TinyGraph) -> LeakDetector {
        LeakDetector::for_graph(kind, graph, &AnalysisConfig::default()).unwrap()
    }

    fn instance(object: u64, class: u64) -> InstanceRef {
        InstanceRef {
            object_id: ObjectId(object),
            class_id: ClassId(class),
            class_name: "test".to_string(),
            is_primitive_wrapper: false,
        }
    }

    #[test]
    fn test_activity_destroyed_or_finished() {
        let graph = android_graph()
            .field(100, DESTROYED_FIELD, FieldValue::Boolean(true))
            .field(100, FINISHED_FIELD, FieldValue::Boolean(false))
            .field(101, DESTROYED_FIELD, FieldValue::Boolean(false))
            .field(101, FINISHED_FIELD, FieldValue::Boolean(false));
        let config = AnalysisConfig::default();
        let mut detector =
            LeakDetector::for_graph(DetectorKind::Activity, &graph, &config).unwrap();
        assert_eq!(detector.generation(), 4);
        assert!(detector.is_leak(&graph, &instance(100, 6)));
        assert!(!detector.is_leak(&graph, &instance(101, 6)));
        let expected = ClassCounter { instances_count: 2, leak_instances_count: 1 };
        assert_eq!(detector.counter(), expected);
    }

    #[test]
    fn test_activity_missing_field_is_not_leak() {
        let graph = android_graph().field(100, DESTROYED_FIELD, FieldValue::Boolean(true));
        let mut detector = detector_for(DetectorKind::Activity, &graph);
        assert!(!detector.is_leak(&graph, &instance(100, 6)));
        assert_eq!(detector.counter().instances_count, 1);
        assert_eq!(detector.counter().leak_instances_count, 0);
    }

    #[test]
    fn test_fragment_manager_null_and_called() {
        let graph = android_graph()
            .field(200, FRAGMENT_MANAGER_FIELD, FieldValue::Object(None))
            .field(200, FRAGMENT_CALLED_FIELD, FieldValue::Boolean(true))
            .field(201, FRAGMENT_MANAGER_FIELD, FieldValue::Object(Some(ObjectId(9))))
            .field(201, FRAGMENT_CALLED_FIELD, FieldValue::Boolean(true))
            .field(202, FRAGMENT_MANAGER_FIELD, FieldValue::Object(None));
        let mut detector = detector_for(DetectorKind::Fragment, &graph);
        assert_eq!(detector.class_name(), ANDROIDX_FRAGMENT_CLASS);
        assert_eq!(detector.generation(), 1);
        assert!(detector.is_leak(&graph, &instance(200, 7)));
        assert!(!detector.is_leak(&graph, &instance(201, 7)));
        assert!(!detector.is_leak(&graph, &instance(202, 7)));
    }

    #[test]
    fn test_fragment_lookup_falls_back_to_support_class() {
        let graph = TinyGraph::default()
            .class(1, "java.lang.Object", None)
            .class(2, SUPPORT_FRAGMENT_CLASS, Some(1));
        let detector = detector_for(DetectorKind::Fragment, &graph);
        assert_eq!(detector.class_name(), SUPPORT_FRAGMENT_CLASS);
    }

    #[test]
    fn test_bitmap_pixel_threshold() {
        let graph = android_graph()
            .field(300, BITMAP_WIDTH_FIELD, FieldValue::Int(768))
            .field(300, BITMAP_HEIGHT_FIELD, FieldValue::Int(1366))
            .field(301, BITMAP_WIDTH_FIELD, FieldValue::Int(767))
            .field(301, BITMAP_HEIGHT_FIELD, FieldValue::Int(1366))
            .field(302, BITMAP_WIDTH_FIELD, FieldValue::Long(1));
        let mut detector = detector_for(DetectorKind::Bitmap, &graph);
        assert!(detector.is_leak(&graph, &instance(300, 8)));
        assert!(!detector.is_leak(&graph, &instance(301, 8)));
        assert!(!detector.is_leak(&graph, &instance(302, 8)));
    }

    #[test]
    fn test_window_only_counts() {
        let graph = android_graph();
        let mut detector = detector_for(DetectorKind::Window, &graph);
        assert!(!detector.is_leak(&graph, &instance(400, 9)));
        let expected = ClassCounter { instances_count: 1, leak_instances_count: 0 };
        assert_eq!(detector.counter(), expected);
    }

    #[test]
    fn test_native_allocation_unsupported_without_thunk() {
        let graph = android_graph().class(10, NATIVE_ALLOCATION_CLASS, Some(1));
        let config = AnalysisConfig::default();
        let mut detector =
            LeakDetector::for_graph(DetectorKind::NativeAllocation, &graph, &config).unwrap();
        assert!(!detector.is_supported());
        let cache = ClassHierarchyCache::new([1]);
        cache.process(ClassId(10), || graph.class_hierarchy(ClassId(10)));
        assert!(!detector.is_subclass(&cache, ClassId(10)));
        assert!(!detector.is_leak(&graph, &instance(500, 10)));
        assert_eq!(detector.counter().instances_count, 0);
    }

    #[test]
    fn test_native_allocation_matches_both_classes() {
        let graph = android_graph()
            .class(10, NATIVE_ALLOCATION_CLASS, Some(1))
            .class(11, NATIVE_ALLOCATION_THUNK_CLASS, Some(1));
        let detector = LeakDetector::for_graph(
            DetectorKind::NativeAllocation,
            &graph,
            &AnalysisConfig::default(),
        )
        .unwrap();
        let cache = ClassHierarchyCache::new([1]);
        for id in [10, 11, 8] {
            cache.process(ClassId(id), || graph.class_hierarchy(ClassId(id)));
        }
        assert!(detector.is_subclass(&cache, ClassId(10)));
        assert!(detector.is_subclass(&cache, ClassId(11)));
        assert!(!detector.is_subclass(&cache, ClassId(8)));
    }

    #[test]
    fn test_missing_class_not_registered() {
        let graph = TinyGraph::default().class(1, "java.lang.Object", None);
        let detectors = LeakDetector::all_for_graph(&graph, &AnalysisConfig::default());
        assert_eq!(detectors.len(), 1);
        assert_eq!(detectors[0].kind(), DetectorKind::NativeAllocation);
    }

    #[test]
    fn test_activity_subclass_via_generation() {
        let graph = android_graph();
        let detector = detector_for(DetectorKind::Activity, &graph);
        let cache = ClassHierarchyCache::new([detector.generation()]);
        cache.process(ClassId(6), || graph.class_hierarchy(ClassId(6)));
        cache.process(ClassId(3), || graph.class_hierarchy(ClassId(3)));
        assert!(detector.is_subclass(&cache, ClassId(6)));
        assert!(!detector.is_subclass(&cache, ClassId(3)));
    }
}
