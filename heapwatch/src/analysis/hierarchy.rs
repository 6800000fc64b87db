//! Class generation cache
//!
//! A class's generation table maps generation index to ancestor id, where
//! generation 0 is the root type and the leaf class has the highest index.
//! Only the generations some detector tracks are kept, so the subclass test
//! becomes one lookup per instance instead of a hierarchy walk.
//!
//! The cache is scoped to one analysis run and only ever grows.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::heap_graph::ClassRef;
use crate::domain::ClassId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassGeneration {
    pub class_id: ClassId,
    pub generation: usize,
}

/// Full generation table of a leaf-first hierarchy, root first.
#[must_use]
pub fn generations_of(hierarchy: &[ClassRef]) -> Vec<ClassGeneration> {
    hierarchy
        .iter()
        .rev()
        .enumerate()
        .map(|(generation, class)| ClassGeneration { class_id: class.id, generation })
        .collect()
}

/// Generation of the leaf class of a leaf-first hierarchy.
#[must_use]
pub fn leaf_generation(hierarchy: &[ClassRef]) -> Option<usize> {
    hierarchy.len().checked_sub(1)
}

#[derive(Debug)]
pub struct ClassHierarchyCache {
    tracked: BTreeSet<usize>,
    entries: Mutex<HashMap<ClassId, Arc<[ClassGeneration]>>>,
    walks: AtomicUsize,
}

impl ClassHierarchyCache {
    pub fn new(tracked: impl IntoIterator<Item = usize>) -> Self {
        Self {
            tracked: tracked.into_iter().collect(),
            entries: Mutex::new(HashMap::new()),
            walks: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn tracked_generations(&self) -> &BTreeSet<usize> {
        &self.tracked
    }

    /// Generation table of `class_id`. `hierarchy` is only called (and the
    /// ancestor chain only walked) the first time a class is seen.
    pub fn process<F>(&self, class_id: ClassId, hierarchy: F) -> Arc<[ClassGeneration]>
    where
        F: FnOnce() -> Vec<ClassRef>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(cached) = entries.get(&class_id) {
            return Arc::clone(cached);
        }

        let chain = hierarchy();
        self.walks.fetch_add(1, Ordering::Relaxed);
        let depth = chain.len();
        let table: Arc<[ClassGeneration]> = self
            .tracked
            .iter()
            .filter(|&&generation| generation < depth)
            .map(|&generation| ClassGeneration {
                class_id: chain[depth - 1 - generation].id,
                generation,
            })
            .collect();
        entries.insert(class_id, Arc::clone(&table));
        table
    }

    /// Ancestor of `class_id` at `generation`, if the class was processed
    /// and is that deep.
    #[must_use]
    pub fn id_of_generation(&self, class_id: ClassId, generation: usize) -> Option<ClassId> {
        let entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .get(&class_id)?
            .iter()
            .find(|g| g.generation == generation)
            .map(|g| g.class_id)
    }

    /// Number of ancestor walks performed (cache misses).
    #[must_use]
    pub fn walk_count(&self) -> usize {
        self.walks.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
