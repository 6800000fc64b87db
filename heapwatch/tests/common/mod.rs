//! Shared fixtures for the integration tests: an in-memory heap graph, a
//! provider handing out copies of it, and a backend that writes a stub
//! snapshot without forking.

#![allow(dead_code)]

use heapwatch::analysis::{
    ArrayKind, ArrayRef, ChainReference, ClassRef, FieldValue, GcRootKind, HeapGraph,
    HeapGraphProvider, InstanceRef, LeakChain, ReferenceKind,
};
use heapwatch::domain::{BackendError, ClassId, GraphError, ObjectId, Pid};
use heapwatch::dump::{ForkBranch, RuntimeSnapshotBackend};
use heapwatch::pipeline::{Progress, ProgressListener};
use heapwatch::report::ClassInfo;
use heapwatch::PipelineConfig;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const ACTIVITY: ClassId = ClassId(5);
pub const MAIN_ACTIVITY: ClassId = ClassId(6);
pub const BITMAP: ClassId = ClassId(10);
pub const INTEGER: ClassId = ClassId(12);

pub const STUB_SNAPSHOT: &[u8] = b"JAVA PROFILE 1.0.2\0";

// ============================================================================
// Heap Graph
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FakeHeap {
    classes: Vec<(ClassId, String, Option<ClassId>)>,
    instances: Vec<InstanceRef>,
    arrays: Vec<(ArrayKind, ArrayRef)>,
    fields: HashMap<(ObjectId, &'static str), FieldValue>,
    next_object: u64,
}

impl FakeHeap {
    /// Class tree of a small Android app, no objects.
    pub fn android() -> Self {
        let mut heap = Self { next_object: 1000, ..Self::default() };
        heap.class(1, "java.lang.Object", None);
        heap.class(2, "android.content.Context", Some(1));
        heap.class(3, "android.content.ContextWrapper", Some(2));
        heap.class(4, "android.view.ContextThemeWrapper", Some(3));
        heap.class(ACTIVITY.0, "android.app.Activity", Some(4));
        heap.class(MAIN_ACTIVITY.0, "com.example.MainActivity", Some(ACTIVITY.0));
        heap.class(BITMAP.0, "android.graphics.Bitmap", Some(1));
        heap.class(11, "android.view.Window", Some(1));
        heap.class(INTEGER.0, "java.lang.Integer", Some(1));
        heap
    }

    pub fn class(&mut self, id: u64, name: &str, parent: Option<u64>) {
        self.classes.push((ClassId(id), name.to_string(), parent.map(ClassId)));
    }

    fn class_name(&self, id: ClassId) -> String {
        self.classes
            .iter()
            .find(|(c, _, _)| *c == id)
            .map(|(_, n, _)| n.clone())
            .unwrap_or_default()
    }

    fn next_id(&mut self) -> ObjectId {
        self.next_object += 1;
        ObjectId(self.next_object)
    }

    pub fn instance(&mut self, class_id: ClassId) -> ObjectId {
        let object_id = self.next_id();
        self.instances.push(InstanceRef {
            object_id,
            class_id,
            class_name: self.class_name(class_id),
            is_primitive_wrapper: class_id == INTEGER,
        });
        object_id
    }

    pub fn activity(&mut self, destroyed: bool, finished: bool) -> ObjectId {
        let id = self.instance(MAIN_ACTIVITY);
        self.fields.insert((id, "mDestroyed"), FieldValue::Boolean(destroyed));
        self.fields.insert((id, "mFinished"), FieldValue::Boolean(finished));
        id
    }

    pub fn bitmap(&mut self, width: i32, height: i32) -> ObjectId {
        let id = self.instance(BITMAP);
        self.fields.insert((id, "mWidth"), FieldValue::Int(width));
        self.fields.insert((id, "mHeight"), FieldValue::Int(height));
        id
    }

    pub fn array(&mut self, kind: ArrayKind, class_name: &str, length: usize) -> ObjectId {
        let object_id = self.next_id();
        let array = ArrayRef { object_id, class_name: class_name.to_string(), length };
        self.arrays.push((kind, array));
        object_id
    }

    fn chain(object: ObjectId, leaking_class: &str, leaking_type: &str) -> LeakChain {
        LeakChain {
            leaking_object: object,
            gc_root: GcRootKind::StickyClass,
            references: vec![
                ChainReference {
                    origin_class: "com.example.Registry".to_string(),
                    display_name: "leaks".to_string(),
                    kind: ReferenceKind::StaticField,
                    declared_class: "com.example.Registry".to_string(),
                },
                ChainReference {
                    origin_class: "java.lang.Object[]".to_string(),
                    display_name: format!("[{}]", object.0),
                    kind: ReferenceKind::ArrayEntry,
                    declared_class: "java.lang.Object[]".to_string(),
                },
            ],
            leaking_class: leaking_class.to_string(),
            leaking_type: leaking_type.to_string(),
            library_leak: None,
        }
    }
}

impl HeapGraph for FakeHeap {
    fn find_class_by_name(&self, name: &str) -> Option<ClassRef> {
        self.classes
            .iter()
            .find(|(_, n, _)| n == name)
            .map(|(id, n, _)| ClassRef { id: *id, name: n.clone() })
    }

    fn class_hierarchy(&self, class_id: ClassId) -> Vec<ClassRef> {
        let mut chain = Vec::new();
        let mut current = Some(class_id);
        while let Some(id) = current {
            let Some((id, name, parent)) = self.classes.iter().find(|(c, _, _)| *c == id) else {
                break;
            };
            chain.push(ClassRef { id: *id, name: name.clone() });
            current = *parent;
        }
        chain
    }

    fn instances(&self) -> Box<dyn Iterator<Item = InstanceRef> + '_> {
        Box::new(self.instances.iter().cloned())
    }

    fn arrays(&self, kind: ArrayKind) -> Box<dyn Iterator<Item = ArrayRef> + '_> {
        Box::new(self.arrays.iter().filter(move |(k, _)| *k == kind).map(|(_, a)| a.clone()))
    }

    fn field(&self, instance: ObjectId, _declaring_class: &str, name: &str) -> Option<FieldValue> {
        self.fields.iter().find(|((o, n), _)| *o == instance && *n == name).map(|(_, v)| *v)
    }

    fn find_leak_paths(
        &self,
        candidates: &HashSet<ObjectId>,
        _gc_roots: &HashSet<GcRootKind>,
    ) -> Result<Vec<LeakChain>, GraphError> {
        let instances = self
            .instances
            .iter()
            .filter(|i| candidates.contains(&i.object_id))
            .map(|i| Self::chain(i.object_id, &i.class_name, "INSTANCE"));
        let arrays = self
            .arrays
            .iter()
            .filter(|(_, a)| candidates.contains(&a.object_id))
            .map(|(_, a)| Self::chain(a.object_id, &a.class_name, "ARRAY"));
        Ok(instances.chain(arrays).collect())
    }
}

/// Opens every snapshot as a copy of the same heap.
#[derive(Debug, Default)]
pub struct FakeProvider {
    heap: FakeHeap,
    opens: AtomicUsize,
}

impl FakeProvider {
    pub fn new(heap: FakeHeap) -> Self {
        Self { heap, opens: AtomicUsize::new(0) }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl HeapGraphProvider for FakeProvider {
    fn open(&self, snapshot: &Path) -> Result<Box<dyn HeapGraph>, GraphError> {
        if !snapshot.is_file() {
            let detail = "no such file".to_string();
            return Err(GraphError::Open { path: snapshot.to_path_buf(), detail });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.heap.clone()))
    }
}

// ============================================================================
// Snapshot Backend
// ============================================================================

/// Direct-mode backend writing [`STUB_SNAPSHOT`].
#[derive(Debug, Default)]
pub struct StubBackend {
    dumps: AtomicUsize,
}

impl StubBackend {
    pub fn dumps(&self) -> usize {
        self.dumps.load(Ordering::SeqCst)
    }
}

impl RuntimeSnapshotBackend for StubBackend {
    fn supports_fork(&self) -> bool {
        false
    }

    fn check_compatible(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn suspend_threads(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn duplicate_process(&self) -> Result<ForkBranch, BackendError> {
        Err(BackendError::Unsupported("stub backend".to_string()))
    }

    fn serialize_heap(&self, path: &Path) -> Result<(), BackendError> {
        self.dumps.fetch_add(1, Ordering::SeqCst);
        std::fs::write(path, STUB_SNAPSHOT)
            .map_err(|e| BackendError::SerializeFailed(e.to_string()))
    }

    fn resume_threads(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn wait_for_exit(&self, _pid: Pid, _timeout: Duration) -> Result<bool, BackendError> {
        Ok(true)
    }

    fn exit_child(&self, success: bool) -> ! {
        panic!("stub backend never forks (success={success})")
    }
}

// ============================================================================
// Config and Progress
// ============================================================================

/// Config rooted at `root` with every monitor off and no disk floor.
pub fn quiet_config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig {
        root_dir: root.to_path_buf(),
        min_free_disk_bytes: 0,
        start_delay_ms: 0,
        ..PipelineConfig::default()
    };
    config.monitors.heap.enabled = false;
    config
}

#[derive(Debug, Default)]
pub struct ProgressLog {
    events: Mutex<Vec<Progress>>,
}

impl ProgressLog {
    pub fn events(&self) -> Vec<Progress> {
        self.events.lock().unwrap().clone()
    }

    /// Poll until `progress` has been seen, up to five seconds.
    pub fn wait_for(&self, progress: Progress) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.events().contains(&progress) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

impl ProgressListener for ProgressLog {
    fn on_progress(&self, progress: Progress) {
        self.events.lock().unwrap().push(progress);
    }
}

pub fn progress_log() -> Arc<ProgressLog> {
    Arc::new(ProgressLog::default())
}

pub fn class_info<'a>(infos: &'a [ClassInfo], class_name: &str) -> &'a ClassInfo {
    infos.iter().find(|c| c.class_name == class_name).unwrap()
}
