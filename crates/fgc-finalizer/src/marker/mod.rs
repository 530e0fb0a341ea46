//! Marker Module - Reachability Tracing
//!
//! Computes the set of objects reachable from the heap roots plus any extra
//! roots the caller supplies. The finalizer subsystem passes the objects it
//! is holding (queued or running finalizer arguments) as extra roots.
//!
//! Finalizer associations are never edges: a tracked object reachable only
//! through its own finalizer registration is left unmarked, which is exactly
//! what makes it eligible.

pub mod mark_queue;

pub use mark_queue::{MarkQueue, MarkQueueStats};

use crate::heap::Heap;
use indexmap::IndexSet;

/// Set of marked object addresses
#[derive(Debug, Default, Clone)]
pub struct MarkSet {
    marked: IndexSet<usize>,
}

impl MarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark address, returning true if it was not marked before
    pub fn insert(&mut self, address: usize) -> bool {
        self.marked.insert(address)
    }

    /// Check if address is marked
    pub fn is_marked(&self, address: usize) -> bool {
        self.marked.contains(&address)
    }

    /// Number of marked objects
    pub fn len(&self) -> usize {
        self.marked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }
}

/// Marker - transitive closure over heap edges
pub struct Marker {
    queue: MarkQueue,
}

impl Marker {
    pub fn new() -> Self {
        Self {
            queue: MarkQueue::new(),
        }
    }

    /// Mark everything reachable from the heap roots and `extra_roots`
    pub fn mark(&mut self, heap: &Heap, extra_roots: impl IntoIterator<Item = usize>) -> MarkSet {
        let mut marks = MarkSet::new();
        self.queue.extend(heap.roots());
        self.queue.extend(extra_roots);
        self.drain(heap, &mut marks);
        marks
    }

    /// Extend an existing mark set from additional start points
    ///
    /// Used after classification so that everything a queued finalizer can
    /// reach survives the sweep.
    pub fn mark_from(
        &mut self,
        heap: &Heap,
        marks: &mut MarkSet,
        objects: impl IntoIterator<Item = usize>,
    ) {
        self.queue.extend(objects);
        self.drain(heap, marks);
    }

    fn drain(&mut self, heap: &Heap, marks: &mut MarkSet) {
        while let Some(address) = self.queue.pop() {
            let Some(object) = heap.get(crate::heap::ObjectRef::from_address(address)) else {
                continue;
            };
            if !marks.insert(address) {
                continue;
            }
            self.queue.extend(object.edges());
        }
    }

    /// Queue statistics since creation
    pub fn stats(&self) -> MarkQueueStats {
        self.queue.stats()
    }
}

impl Default for Marker {
    fn default() -> Self {
        Self::new()
    }
}
