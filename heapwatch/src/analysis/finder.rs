//! Suspicious object finder
//!
//! One pass over every instance of the snapshot:
//!
//! 1. Skip boxed primitives.
//! 2. Process the instance's class through the generation cache.
//! 3. Ask each detector whose class the instance descends from whether it
//!    leaks. Leaking instances of one detector are forwarded to path finding
//!    only while that detector's leak count is within the cap; the rest are
//!    still counted.
//!
//! Then oversized primitive/object arrays are flagged regardless of class,
//! and the candidate set goes to [`HeapGraph::find_leak_paths`]. Chains with
//! the same shape collapse into one [`GcPath`] with an instance count.

use log::{debug, info};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::detectors::{DetectorKind, LeakDetector};
use super::heap_graph::{ArrayKind, HeapGraph, LeakChain};
use super::hierarchy::ClassHierarchyCache;
use crate::config::AnalysisConfig;
use crate::domain::{GraphError, ObjectId};
use crate::report::model::{ClassInfo, GcPath, LeakObject, PathItem};

const KB: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakCandidate {
    pub object_id: ObjectId,
    pub reason: String,
}

/// Output of [`LeakFinder::classify`].
#[derive(Debug, Clone, Default)]
pub struct Classification {
    candidates: Vec<LeakCandidate>,
    index: HashMap<ObjectId, usize>,
    pub class_infos: Vec<ClassInfo>,
    pub leak_objects: Vec<LeakObject>,
    pub elapsed: Duration,
}

impl Classification {
    fn add(&mut self, object_id: ObjectId, reason: String) {
        if let Some(&i) = self.index.get(&object_id) {
            self.candidates[i].reason = reason;
            return;
        }
        self.index.insert(object_id, self.candidates.len());
        self.candidates.push(LeakCandidate { object_id, reason });
    }

    /// Candidates in discovery order.
    #[must_use]
    pub fn candidates(&self) -> &[LeakCandidate] {
        &self.candidates
    }

    #[must_use]
    pub fn candidate_ids(&self) -> HashSet<ObjectId> {
        self.candidates.iter().map(|c| c.object_id).collect()
    }

    #[must_use]
    pub fn reason_of(&self, object_id: ObjectId) -> Option<&str> {
        self.index.get(&object_id).map(|&i| self.candidates[i].reason.as_str())
    }
}

pub struct LeakFinder<'g> {
    graph: &'g dyn HeapGraph,
    config: &'g AnalysisConfig,
    detectors: Vec<LeakDetector>,
    cache: ClassHierarchyCache,
}

impl<'g> LeakFinder<'g> {
    #[must_use]
    pub fn new(graph: &'g dyn HeapGraph, config: &'g AnalysisConfig) -> Self {
        let detectors = LeakDetector::all_for_graph(graph, config);
        let cache = ClassHierarchyCache::new(detectors.iter().map(LeakDetector::generation));
        info!(
            "Leak detectors: {:?}, tracked generations {:?}",
            detectors.iter().map(LeakDetector::kind).collect::<Vec<_>>(),
            cache.tracked_generations()
        );
        Self { graph, config, detectors, cache }
    }

    #[must_use]
    pub fn detectors(&self) -> &[LeakDetector] {
        &self.detectors
    }

    #[must_use]
    pub fn cache(&self) -> &ClassHierarchyCache {
        &self.cache
    }

    /// Classify every instance and array of the snapshot.
    pub fn classify(&mut self) -> Classification {
        let started = Instant::now();
        let mut result = Classification::default();
        let graph = self.graph;
        let cap = u64::try_from(self.config.same_class_leak_cap).unwrap_or(u64::MAX);

        for instance in graph.instances() {
            if instance.is_primitive_wrapper {
                continue;
            }
            self.cache.process(instance.class_id, || graph.class_hierarchy(instance.class_id));

            for detector in &mut self.detectors {
                if !detector.is_subclass(&self.cache, instance.class_id) {
                    continue;
                }
                if !detector.is_leak(graph, &instance) {
                    continue;
                }
                if detector.counter().leak_instances_count > cap {
                    continue;
                }
                result.add(instance.object_id, detector.leak_reason().to_string());
                if detector.kind() == DetectorKind::Bitmap {
                    if let Some((width, height)) = detector.bitmap_dimensions(graph, &instance) {
                        result.leak_objects.push(LeakObject {
                            class_name: instance.class_name.clone(),
                            size: u64::try_from(i64::from(width) * i64::from(height)).unwrap_or(0),
                            object_id: instance.object_id.0.to_string(),
                            ext_detail: Some(format!("{width} x {height}")),
                        });
                    }
                }
            }
        }

        result.class_infos = self
            .detectors
            .iter()
            .map(|d| ClassInfo {
                class_name: d.class_name().to_string(),
                instance_count: d.counter().instances_count,
                leak_instance_count: d.counter().leak_instances_count,
            })
            .collect();

        self.find_array_leaks(&mut result);

        result.elapsed = started.elapsed();
        info!(
            "Classified heap in {:?}: {} candidates, {} generation walks",
            result.elapsed,
            result.candidates.len(),
            self.cache.walk_count()
        );
        result
    }

    fn find_array_leaks(&self, result: &mut Classification) {
        for array in self.graph.arrays(ArrayKind::Primitive) {
            if array.length < self.config.big_primitive_array {
                continue;
            }
            debug!(
                "primitive array {} {}: {} elements",
                array.class_name, array.object_id, array.length
            );
            result.add(
                array.object_id,
                format!(
                    "primitive array size over threshold:{},{}KB",
                    array.length,
                    array.length / KB
                ),
            );
            result.leak_objects.push(LeakObject {
                class_name: array.class_name,
                size: u64::try_from(array.length).unwrap_or(u64::MAX),
                object_id: array.object_id.0.to_string(),
                ext_detail: None,
            });
        }

        for array in self.graph.arrays(ArrayKind::Object) {
            if array.length < self.config.big_object_array {
                continue;
            }
            debug!(
                "object array {} {}: {} elements",
                array.class_name, array.object_id, array.length
            );
            result.add(
                array.object_id,
                format!("object array size over threshold:{}", array.length),
            );
            result.leak_objects.push(LeakObject {
                class_name: array.class_name,
                size: u64::try_from(array.length).unwrap_or(u64::MAX),
                object_id: array.object_id.0.to_string(),
                ext_detail: None,
            });
        }
    }

    /// Run path finding for the candidates and group the chains.
    ///
    /// # Errors
    /// Returns the graph's path-finding error unchanged.
    pub fn find_paths(
        &self,
        classification: &Classification,
    ) -> Result<(Vec<GcPath>, Duration), GraphError> {
        let started = Instant::now();
        let candidates = classification.candidate_ids();
        if candidates.is_empty() {
            return Ok((Vec::new(), started.elapsed()));
        }
        let roots = self.config.gc_roots.iter().copied().collect();
        let chains = self.graph.find_leak_paths(&candidates, &roots)?;
        let paths = group_chains(&chains, |id| classification.reason_of(id));
        info!(
            "Found {} chains for {} candidates, {} distinct paths",
            chains.len(),
            candidates.len(),
            paths.len()
        );
        Ok((paths, started.elapsed()))
    }
}

/// Signature of a chain's shape. Array indices are ignored so entries of
/// the same array hash alike.
#[must_use]
pub fn chain_signature(chain: &LeakChain) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chain.gc_root.description().as_bytes());
    for reference in &chain.references {
        hasher.update(b"|");
        hasher.update(reference.origin_class.as_bytes());
        hasher.update(b".");
        if reference.display_name.starts_with('[') {
            hasher.update(b"[]");
        } else {
            hasher.update(reference.display_name.as_bytes());
        }
        hasher.update(b":");
        hasher.update(reference.kind.to_string().as_bytes());
    }
    hasher.update(b"|");
    hasher.update(chain.leaking_class.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collapse chains by signature, keeping first-seen order. The first chain
/// of each group is its representative.
pub fn group_chains<'a, F>(chains: &[LeakChain], reason_of: F) -> Vec<GcPath>
where
    F: Fn(ObjectId) -> Option<&'a str>,
{
    let mut paths: Vec<GcPath> = Vec::new();
    let mut by_signature: HashMap<String, usize> = HashMap::new();

    for chain in chains {
        let signature = chain_signature(chain);
        if let Some(&i) = by_signature.get(&signature) {
            paths[i].instance_count += 1;
            continue;
        }

        let reason = reason_of(chain.leaking_object).unwrap_or("unknown");
        let leak_reason = match &chain.library_leak {
            Some(pattern) => format!("{reason} {pattern}"),
            None => reason.to_string(),
        };

        let mut path: Vec<PathItem> = chain
            .references
            .iter()
            .map(|r| PathItem {
                reference: if r.display_name.starts_with('[') {
                    r.origin_class.clone()
                } else {
                    format!("{}.{}", r.origin_class, r.display_name)
                },
                reference_type: r.kind.to_string(),
                declared_class: Some(r.declared_class.clone()),
            })
            .collect();
        path.push(PathItem {
            reference: chain.leaking_class.clone(),
            reference_type: chain.leaking_type.clone(),
            declared_class: None,
        });

        by_signature.insert(signature.clone(), paths.len());
        paths.push(GcPath {
            instance_count: 1,
            leak_reason,
            gc_root: chain.gc_root.description().to_string(),
            signature,
            path,
        });
    }
    paths
}
