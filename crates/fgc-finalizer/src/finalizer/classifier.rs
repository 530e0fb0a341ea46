//! Reachability Classifier - Finding Finalizable Objects
//!
//! Runs inside every collection cycle, after marking and before the sweep.
//!
//! 1. Tracked objects that were marked stay in the table.
//! 2. Tracked objects left unmarked are removed from the table and turned
//!    into queue entries in registration order. The collector then marks
//!    from them so that they, and everything they reach, survive this cycle.
//! 3. Objects whose callbacks completed since the last cycle are confirmed:
//!    marked means the callback (or someone else) resurrected the object,
//!    unmarked means it is swept now.

use super::queue::FinalizerQueueEntry;
use super::table::IdentityTable;
use crate::heap::{Heap, ObjectRef};
use crate::marker::MarkSet;

/// Result of classifying tracked objects in one cycle
#[derive(Debug, Default)]
pub struct Classification {
    /// Entries to enqueue, in detection order
    pub entries: Vec<FinalizerQueueEntry>,
    /// Tracked objects still reachable
    pub reachable: usize,
}

impl Classification {
    /// Addresses of the newly eligible objects
    pub fn addresses(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|entry| entry.address())
    }
}

/// Fate of objects whose callbacks completed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub resurrected: Vec<usize>,
    pub reclaimable: Vec<usize>,
}

/// ReachabilityClassifier - per-cycle eligibility decisions
pub struct ReachabilityClassifier {
    /// Cycles an unmarked tracked object may go unqueued
    max_detection_cycles: u32,
}

impl ReachabilityClassifier {
    pub fn new(max_detection_cycles: u32) -> Self {
        Self {
            max_detection_cycles,
        }
    }

    /// Classify every tracked object against this cycle's marks
    ///
    /// The collector queues every unmarked tracked object before it sweeps,
    /// so a tracked object missing from the heap only arises when the heap
    /// is swept or corrupted outside a cycle. The audit below guards
    /// against that.
    ///
    /// # Panics
    /// If an unmarked tracked object could not be queued for more than
    /// `max_detection_cycles` consecutive cycles.
    pub fn on_cycle_complete(
        &self,
        heap: &Heap,
        table: &IdentityTable,
        cycle: u64,
        marks: &MarkSet,
    ) -> Classification {
        let mut classification = Classification::default();
        let mut tracked = table.lock();

        let mut eligible = Vec::new();
        for (&address, object) in tracked.iter_mut() {
            if marks.is_marked(address) {
                object.reset_missed();
                classification.reachable += 1;
                continue;
            }
            if heap.get(ObjectRef::from_address(address)).is_some() {
                eligible.push(address);
                continue;
            }

            // Freed without passing through a cycle

            let missed = object.note_missed();
            log::warn!(
                "[FIN] Tracked object {:#x} is unmarked but not in the heap (cycle {}, {} missed)",
                address,
                cycle,
                missed
            );
            if missed > self.max_detection_cycles {
                crate::fatal_invariant!(
                    "object {:#x} unreachable for {} cycles without being queued",
                    address,
                    missed
                );
            }
        }

        for address in eligible {
            let Some(object) = heap.get(ObjectRef::from_address(address)) else {
                continue;
            };
            if let Some(entry) = tracked.shift_remove(&address) {
                log::trace!("[FIN] {:#x} eligible in cycle {}", address, cycle);
                classification
                    .entries
                    .push(FinalizerQueueEntry::new(entry, object.handle(), cycle));
            }
        }

        classification
    }

    /// Split finalized objects into resurrected and reclaimable
    pub fn confirm(&self, completed: &[usize], marks: &MarkSet) -> Confirmation {
        let mut confirmation = Confirmation::default();
        for &address in completed {
            if marks.is_marked(address) {
                log::trace!("[FIN] {:#x} resurrected", address);
                confirmation.resurrected.push(address);
            } else {
                confirmation.reclaimable.push(address);
            }
        }
        confirmation
    }

    pub fn max_detection_cycles(&self) -> u32 {
        self.max_detection_cycles
    }
}
