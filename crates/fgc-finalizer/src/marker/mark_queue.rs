//! Mark Queue - Work List for Marking
//!
//! FIFO of object addresses still to be scanned. Marking runs stop-the-world
//! on the collecting thread, so the queue is owned by a single marker.

use std::collections::VecDeque;

/// MarkQueue - grey objects waiting to be scanned
pub struct MarkQueue {
    /// Pending addresses
    queue: VecDeque<usize>,

    /// Counters
    enqueued_count: usize,
    processed_count: usize,
}

impl MarkQueue {
    /// Create new mark queue
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            enqueued_count: 0,
            processed_count: 0,
        }
    }

    /// Push object to queue
    pub fn push(&mut self, object: usize) {
        self.queue.push_back(object);
        self.enqueued_count += 1;
    }

    /// Push every object from an iterator
    pub fn extend(&mut self, objects: impl IntoIterator<Item = usize>) {
        for object in objects {
            self.push(object);
        }
    }

    /// Pop object from queue
    pub fn pop(&mut self) -> Option<usize> {
        let object = self.queue.pop_front();
        if object.is_some() {
            self.processed_count += 1;
        }
        object
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get queue size
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Get statistics
    pub fn stats(&self) -> MarkQueueStats {
        MarkQueueStats {
            enqueued: self.enqueued_count,
            processed: self.processed_count,
            pending: self.queue.len(),
        }
    }
}

impl Default for MarkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for mark queue
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MarkQueueStats {
    /// Total enqueued objects
    pub enqueued: usize,
    /// Total processed objects
    pub processed: usize,
    /// Pending objects in queue
    pub pending: usize,
}
