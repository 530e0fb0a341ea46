//! GC Core Module - Collection Cycle Management
//!
//! A small stop-the-world mark-sweep collector hosting the finalizer
//! subsystem. One cycle runs these phases under the heap lock:
//!
//! 1. Mark from the heap roots plus every object retained by a queued or
//!    running finalizer.
//! 2. Classify tracked objects; unmarked ones become queue entries.
//! 3. Mark from the newly queued objects so they survive this cycle.
//! 4. Confirm objects whose callbacks completed: resurrected or reclaimable.
//! 5. Sweep everything unmarked.
//! 6. Publish the new entries to the queue, waking the runner.
//!
//! Once the runner has stopped, step 3 is skipped and the queue refuses
//! new entries, so finalizable garbage is swept without its callback.
//!
//! Lock order is heap, then identity table, then queue. Callbacks leaving
//! the table or the queue are dropped after the heap lock is released.

use crate::config::FinalizerConfig;
use crate::error::{FinError, Result};
use crate::finalizer::{
    Callback, FinalizerQueue, FinalizerQueueEntry, IdentityTable, ReachabilityClassifier,
};
use crate::heap::{Handle, Heap, HeapStats, ObjectRef};
use crate::logging::{EventLog, FinEvent};
use crate::marker::Marker;
use crate::stats::{CyclePhase, CycleTimer, FinalizerStats, PhaseTimes};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// GC cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    /// No cycle in progress
    Idle,
    /// Tracing from roots
    Marking,
    /// Deciding which tracked objects are finalizable
    Classifying,
    /// Freeing unmarked objects
    Sweeping,
}

/// Reason for a collection cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcReason {
    /// Explicit request (`force_cycle`)
    Explicit,
    /// Allocation count reached the configured trigger
    AllocationPressure { allocations: usize, threshold: usize },
}

impl fmt::Display for GcReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcReason::Explicit => write!(f, "explicit"),
            GcReason::AllocationPressure {
                allocations,
                threshold,
            } => write!(f, "allocation pressure ({}/{})", allocations, threshold),
        }
    }
}

/// Summary of one completed cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub reason: GcReason,
    /// Objects marked live, including finalizer-retained ones
    pub marked: usize,
    /// Objects newly handed to the finalizer queue
    pub enqueued: usize,
    /// Finalized objects found reachable again
    pub resurrected: usize,
    pub reclaimed_objects: usize,
    pub reclaimed_bytes: usize,
    pub duration: Duration,
    /// Breakdown of `duration` by phase
    pub phases: PhaseTimes,
}

struct HeapState {
    heap: Heap,
    marker: Marker,
}

/// GarbageCollector - heap, marker and finalizer bookkeeping
///
/// All mutator operations and collection cycles serialize on the heap lock.
pub struct GarbageCollector {
    heap: Mutex<HeapState>,

    table: IdentityTable,
    classifier: ReachabilityClassifier,
    queue: Arc<FinalizerQueue>,

    config: Arc<FinalizerConfig>,
    stats: Arc<FinalizerStats>,
    events: Arc<EventLog>,

    state: Mutex<GcState>,
    cycle_count: AtomicU64,
}

impl GarbageCollector {
    /// Create a collector with an empty heap
    ///
    /// # Errors
    /// `Configuration` if `config` does not validate.
    pub fn new(
        config: Arc<FinalizerConfig>,
        stats: Arc<FinalizerStats>,
        events: Arc<EventLog>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            heap: Mutex::new(HeapState {
                heap: Heap::new(),
                marker: Marker::new(),
            }),
            table: IdentityTable::new(),
            classifier: ReachabilityClassifier::new(config.max_detection_cycles),
            queue: Arc::new(FinalizerQueue::new()),
            config,
            stats,
            events,
            state: Mutex::new(GcState::Idle),
            cycle_count: AtomicU64::new(0),
        })
    }

    /// Run one full cycle now
    pub fn force_cycle(&self) -> Result<CycleReport> {
        self.collect(GcReason::Explicit)
    }

    /// Run one full cycle
    ///
    /// Blocks until any cycle already in progress has finished.
    pub fn collect(&self, reason: GcReason) -> Result<CycleReport> {
        let mut guard = self.heap.lock();
        let (report, dropped) = self.collect_locked(&mut guard, reason)?;
        drop(guard);
        drop(dropped);
        Ok(report)
    }

    /// Run a cycle with the heap lock held
    ///
    /// Also returns the entries the stopped queue refused; the caller drops
    /// them once the heap lock is released.
    fn collect_locked(
        &self,
        state: &mut HeapState,
        reason: GcReason,
    ) -> Result<(CycleReport, Vec<FinalizerQueueEntry>)> {
        let cycle = self.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut timer = CycleTimer::start();
        self.events.log(FinEvent::CycleStart {
            cycle,
            reason: reason.to_string(),
        });

        let HeapState { heap, marker } = state;

        // Phase 1: mark
        self.set_state(GcState::Marking);
        let snapshot = self.queue.cycle_snapshot();
        let mut marks = marker.mark(heap, snapshot.retained.iter().copied());
        timer.lap(CyclePhase::Mark);

        // Phase 2-4: classify, keep queued objects alive, confirm
        self.set_state(GcState::Classifying);
        let classification = self
            .classifier
            .on_cycle_complete(heap, &self.table, cycle, &marks);
        let accepting = !self.queue.is_shutdown();
        if accepting {
            marker.mark_from(heap, &mut marks, classification.addresses());
        }
        let confirmation = self.classifier.confirm(&snapshot.completed, &marks);
        for &address in &confirmation.resurrected {
            self.events.log(FinEvent::Resurrected { address, cycle });
        }
        timer.lap(CyclePhase::Classify);

        // Phase 5: sweep
        self.set_state(GcState::Sweeping);
        let marked = marks.len();
        let (reclaimed_objects, reclaimed_bytes) = heap.sweep(|address| marks.is_marked(address));
        timer.lap(CyclePhase::Sweep);

        // Phase 6: publish
        let addresses: Vec<usize> = classification.addresses().collect();
        let (enqueued, dropped) = match self.queue.push_batch(classification.entries) {
            Ok(count) => {
                for address in addresses {
                    self.events.log(FinEvent::Enqueued { address, cycle });
                }
                (count, Vec::new())
            },
            Err(refused) => {
                if accepting {
                    // Stopped between classification and publish
                    log::warn!(
                        "[FIN] Cycle {}: runner stopped mid-cycle, {} finalizers not run",
                        cycle,
                        refused.len()
                    );
                } else {
                    log::debug!(
                        "[FIN] Cycle {}: runner stopped, {} finalizers not run",
                        cycle,
                        refused.len()
                    );
                }
                (0, refused)
            },
        };
        self.set_state(GcState::Idle);
        timer.lap(CyclePhase::Publish);

        let duration = timer.elapsed();
        let phases = timer.phases();
        log::trace!("[FIN] Cycle {} phases: {}", cycle, phases);
        self.stats.record_cycle(
            duration,
            enqueued,
            confirmation.resurrected.len(),
            (reclaimed_objects, reclaimed_bytes),
        );
        self.events.log(FinEvent::CycleEnd {
            cycle,
            duration_ms: duration.as_secs_f64() * 1000.0,
            enqueued,
            reclaimed: reclaimed_objects,
        });

        let report = CycleReport {
            cycle,
            reason,
            marked,
            enqueued,
            resurrected: confirmation.resurrected.len(),
            reclaimed_objects,
            reclaimed_bytes,
            duration,
            phases,
        };
        Ok((report, dropped))
    }

    fn set_state(&self, state: GcState) {
        *self.state.lock() = state;
    }

    /// Allocate `value` on the managed heap
    ///
    /// Runs a cycle first when the allocation trigger is reached.
    pub fn allocate<T: Any + Send + Sync>(&self, value: T) -> Result<Handle<T>> {
        let mut guard = self.heap.lock();
        let threshold = self.config.gc_trigger_allocations;
        let allocations = guard.heap.allocations_since_cycle();
        let mut dropped = Vec::new();
        if threshold > 0 && allocations >= threshold {
            let (_, refused) = self.collect_locked(
                &mut guard,
                GcReason::AllocationPressure {
                    allocations,
                    threshold,
                },
            )?;
            dropped = refused;
        }
        let handle = guard.heap.allocate(value);
        drop(guard);
        drop(dropped);
        Ok(handle)
    }

    /// Attach a finalizer to `object`
    ///
    /// # Errors
    /// `InvalidState` once the runner has stopped, otherwise whatever the
    /// identity table rejects.
    pub fn register(&self, object: ObjectRef, callback: Callback) -> Result<()> {
        if self.queue.is_shutdown() {
            return Err(FinError::InvalidState {
                expected: "runner not stopped".to_string(),
                actual: "runner stopped".to_string(),
            });
        }

        let guard = self.heap.lock();
        let form = callback.form();
        let registered = self.table.register(
            &guard.heap,
            object,
            callback,
            self.cycle_count.load(Ordering::SeqCst),
        );
        drop(guard);
        if let Err((error, callback)) = registered {
            drop(callback);
            return Err(error);
        }

        self.stats.record_registered();
        self.events.log(FinEvent::Registered {
            address: object.address(),
            form: form.to_string(),
        });
        Ok(())
    }

    /// Detach the finalizer of `object`
    ///
    /// Returns false if there is nothing to detach: never registered,
    /// already queued, or already run.
    pub fn unregister(&self, object: ObjectRef) -> bool {
        // Holding the heap lock keeps this from interleaving with a cycle
        let removed = {
            let _guard = self.heap.lock();
            self.table.unregister(object)
        };
        let Some(tracked) = removed else {
            return false;
        };
        drop(tracked);
        self.stats.record_unregistered();
        self.events.log(FinEvent::Unregistered {
            address: object.address(),
        });
        true
    }

    /// Check if `object` carries a finalizer that has not been queued
    pub fn is_tracked(&self, object: ObjectRef) -> bool {
        self.table.contains(object)
    }

    pub fn add_root(&self, object: ObjectRef) -> Result<()> {
        self.heap.lock().heap.add_root(object)
    }

    pub fn remove_root(&self, object: ObjectRef) -> bool {
        self.heap.lock().heap.remove_root(object)
    }

    pub fn write_ref(&self, from: ObjectRef, to: ObjectRef) -> Result<()> {
        self.heap.lock().heap.write_ref(from, to)
    }

    pub fn clear_ref(&self, from: ObjectRef, to: ObjectRef) -> bool {
        self.heap.lock().heap.clear_ref(from, to)
    }

    /// Check if `object` is still a live allocation
    pub fn contains(&self, object: ObjectRef) -> bool {
        self.heap.lock().heap.contains(object)
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.lock().heap.stats()
    }

    /// Objects with a registered, not yet queued finalizer
    pub fn tracked_count(&self) -> usize {
        self.table.len()
    }

    /// Callbacks queued or running
    pub fn pending_finalizers(&self) -> usize {
        self.queue.in_flight()
    }

    pub fn queue(&self) -> &Arc<FinalizerQueue> {
        &self.queue
    }

    pub fn state(&self) -> GcState {
        *self.state.lock()
    }

    pub fn is_collecting(&self) -> bool {
        self.state() != GcState::Idle
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &FinalizerConfig {
        &self.config
    }
}

impl fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("state", &self.state())
            .field("cycles", &self.cycle_count())
            .field("tracked", &self.tracked_count())
            .field("pending", &self.pending_finalizers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalizer::queue::Next;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Weak;

    fn collector(config: FinalizerConfig) -> GarbageCollector {
        GarbageCollector::new(
            Arc::new(config),
            Arc::new(FinalizerStats::default()),
            Arc::new(EventLog::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_unreachable_objects_swept() {
        let gc = collector(FinalizerConfig::default());
        let root = gc.allocate(1u64).unwrap();
        let garbage = gc.allocate(2u64).unwrap();
        gc.add_root(root.object()).unwrap();

        let report = gc.force_cycle().unwrap();
        assert_eq!(report.cycle, 1);
        assert_eq!(report.reclaimed_objects, 1);
        assert!(report.phases.total() <= report.duration);
        assert!(gc.contains(root.object()));
        assert!(!gc.contains(garbage.object()));
        assert_eq!(gc.state(), GcState::Idle);
    }

    #[test]
    fn test_finalizable_object_survives_one_extra_cycle() {
        let gc = collector(FinalizerConfig::default());
        let obj = gc.allocate(7u64).unwrap();
        gc.register(obj.object(), Callback::interface(|_| ()))
            .unwrap();

        let first = gc.force_cycle().unwrap();
        assert_eq!(first.enqueued, 1);
        assert!(gc.contains(obj.object()));
        assert!(!gc.is_tracked(obj.object()));
        assert_eq!(gc.pending_finalizers(), 1);

        // Retained while queued
        let second = gc.force_cycle().unwrap();
        assert_eq!(second.enqueued, 0);
        assert!(gc.contains(obj.object()));

        // Stand in for the runner
        match gc.queue().next(|| {}) {
            Next::Run { entry, .. } => gc.queue().complete(entry.id()),
            Next::Stop => panic!("queue stopped"),
        }

        let third = gc.force_cycle().unwrap();
        assert_eq!(third.resurrected, 0);
        assert!(!gc.contains(obj.object()));
    }

    #[test]
    fn test_queued_object_keeps_referents_alive() {
        let gc = collector(FinalizerConfig::default());
        let owner = gc.allocate(1u64).unwrap();
        let child = gc.allocate(2u64).unwrap();
        gc.write_ref(owner.object(), child.object()).unwrap();
        gc.register(owner.object(), Callback::interface(|_| ()))
            .unwrap();

        gc.force_cycle().unwrap();
        assert!(gc.contains(child.object()));
    }

    #[test]
    fn test_unregister_before_cycle() {
        let gc = collector(FinalizerConfig::default());
        let obj = gc.allocate(7u64).unwrap();
        gc.register(obj.object(), Callback::interface(|_| ()))
            .unwrap();

        assert!(gc.unregister(obj.object()));
        assert!(!gc.unregister(obj.object()));

        let report = gc.force_cycle().unwrap();
        assert_eq!(report.enqueued, 0);
        assert!(!gc.contains(obj.object()));
    }

    #[test]
    fn test_allocation_pressure_triggers_cycle() {
        let gc = collector(FinalizerConfig {
            gc_trigger_allocations: 4,
            ..Default::default()
        });
        for i in 0..4u64 {
            gc.allocate(i).unwrap();
        }
        assert_eq!(gc.cycle_count(), 0);

        gc.allocate(99u64).unwrap();
        assert_eq!(gc.cycle_count(), 1);
        assert_eq!(gc.heap_stats().objects, 1);
    }
    /// Drop guard that calls back into the collector
    struct Reenters {
        gc: Weak<GarbageCollector>,
        object: ObjectRef,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Reenters {
        fn drop(&mut self) {
            if let Some(gc) = self.gc.upgrade() {
                let _ = gc.contains(self.object);
                let _ = gc.heap_stats();
            }
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reentrant_callback(
        gc: &Arc<GarbageCollector>,
        object: ObjectRef,
        drops: &Arc<AtomicUsize>,
    ) -> Callback {
        let guard = Reenters {
            gc: Arc::downgrade(gc),
            object,
            drops: drops.clone(),
        };
        Callback::interface(move |_| {
            let _ = &guard;
        })
    }

    #[test]
    fn test_register_rejected_after_shutdown() {
        let gc = collector(FinalizerConfig::default());
        assert!(gc.queue().shutdown().is_empty());

        for i in 0..100u64 {
            let obj = gc.allocate(i).unwrap();
            let err = gc
                .register(obj.object(), Callback::interface(|_| ()))
                .unwrap_err();
            assert!(matches!(err, FinError::InvalidState { .. }));
        }
        assert_eq!(gc.tracked_count(), 0);

        for _ in 0..5 {
            gc.force_cycle().unwrap();
        }
        assert_eq!(gc.heap_stats().objects, 0);
        assert_eq!(gc.pending_finalizers(), 0);
    }

    #[test]
    fn test_cycle_after_shutdown_sweeps_tracked_objects() {
        let gc = collector(FinalizerConfig::default());
        let obj = gc.allocate(7u64).unwrap();
        gc.register(obj.object(), Callback::interface(|_| ()))
            .unwrap();
        assert!(gc.queue().shutdown().is_empty());

        let report = gc.force_cycle().unwrap();
        assert_eq!(report.enqueued, 0);
        assert_eq!(report.reclaimed_objects, 1);
        assert!(!gc.contains(obj.object()));
        assert!(!gc.is_tracked(obj.object()));
        assert_eq!(gc.queue().in_flight(), 0);
    }

    #[test]
    fn test_rejected_callback_dropped_outside_heap_lock() {
        let gc = Arc::new(collector(FinalizerConfig::default()));
        let drops = Arc::new(AtomicUsize::new(0));
        let obj = gc.allocate(7u64).unwrap();
        gc.register(obj.object(), Callback::interface(|_| ()))
            .unwrap();

        let err = gc
            .register(obj.object(), reentrant_callback(&gc, obj.object(), &drops))
            .unwrap_err();
        assert!(matches!(err, FinError::AlreadyRegistered { .. }));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregistered_callback_dropped_outside_heap_lock() {
        let gc = Arc::new(collector(FinalizerConfig::default()));
        let drops = Arc::new(AtomicUsize::new(0));
        let obj = gc.allocate(7u64).unwrap();
        gc.register(obj.object(), reentrant_callback(&gc, obj.object(), &drops))
            .unwrap();

        assert!(gc.unregister(obj.object()));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refused_entries_dropped_outside_heap_lock() {
        let gc = Arc::new(collector(FinalizerConfig::default()));
        let drops = Arc::new(AtomicUsize::new(0));
        let obj = gc.allocate(7u64).unwrap();
        gc.register(obj.object(), reentrant_callback(&gc, obj.object(), &drops))
            .unwrap();
        assert!(gc.queue().shutdown().is_empty());

        gc.force_cycle().unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(!gc.contains(obj.object()));
    }
}
