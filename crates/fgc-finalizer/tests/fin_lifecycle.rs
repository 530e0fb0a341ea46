//! Finalizer Lifecycle Tests
//!
//! Registration, unregistration, exactly-once execution, the extra cycle
//! of life, resurrection and reclamation.
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

mod common;

use common::{Recorder, RuntimeFixture};
use fgc_finalizer::{
    Callback, FinError, FinEvent, FinalizerConfig, Handle, LogLevel, ObjectRef, Runtime,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// ============================================================================
/// EXACTLY ONCE
/// ============================================================================

/// An unreachable object's finalizer fires once, however many cycles run
///
/// **Bug this finds:** re-queueing finalized objects, duplicate dispatch
#[test]
fn test_finalizer_runs_exactly_once() {
    let fixture = RuntimeFixture::with_defaults();
    let count = Arc::new(Mutex::new(0u32));

    let obj = fixture.allocate(42u64);
    let sink = count.clone();
    fixture
        .runtime
        .set_finalizer_ptr(&obj, move |_: Handle<u64>| *sink.lock() += 1)
        .unwrap();

    for _ in 0..5 {
        fixture.cycle_and_settle(1);
    }

    assert_eq!(*count.lock(), 1);
    assert_eq!(fixture.runtime.tracked_count(), 0);
    assert_eq!(fixture.runtime.pending_finalizers(), 0);
}

/// Reachable objects are never finalized
///
/// **Bug this finds:** finalizing objects reachable through heap references
#[test]
fn test_reachable_object_not_finalized() {
    let fixture = RuntimeFixture::with_defaults();
    let seen = Recorder::<u64>::new();

    let root = fixture.allocate_rooted(0u64);
    let child = fixture.allocate(1u64);
    fixture
        .runtime
        .write_ref(root.object(), child.object())
        .unwrap();

    let sink = seen.sink();
    fixture
        .runtime
        .set_finalizer_ptr(&child, move |h: Handle<u64>| sink.lock().push(h.get()))
        .unwrap();

    fixture.cycle_and_settle(3);
    assert!(seen.values().is_empty());
    assert_eq!(fixture.runtime.tracked_count(), 1);

    assert!(fixture.runtime.clear_ref(root.object(), child.object()));
    fixture.cycle_and_settle(1);
    assert_eq!(seen.values(), vec![1]);
}

/// ============================================================================
/// UNREGISTER
/// ============================================================================

/// Unregistering before eligibility means the callback never runs
///
/// **Bug this finds:** stale table entries surviving unregister
#[test]
fn test_unregister_before_eligibility() {
    let fixture = RuntimeFixture::with_defaults();
    let seen = Recorder::<u64>::new();

    let obj = fixture.allocate(9u64);
    let sink = seen.sink();
    fixture
        .runtime
        .set_finalizer_ptr(&obj, move |h: Handle<u64>| sink.lock().push(h.get()))
        .unwrap();

    assert!(fixture.runtime.unregister(obj.object()));
    assert!(!fixture.runtime.unregister(obj.object()));

    let report = fixture.runtime.force_cycle().unwrap();
    fixture.settle();
    assert_eq!(report.enqueued, 0);
    assert!(seen.values().is_empty());
    assert!(!fixture.runtime.contains(obj.object()));
}

/// Unregistering after the object was queued is a safe no-op
///
/// **Bug this finds:** unregister racing the queue, double finalization
#[test]
fn test_unregister_after_queueing_is_noop() {
    let fixture = RuntimeFixture::unstarted(FinalizerConfig::default());
    let count = Arc::new(Mutex::new(0u32));

    let obj = fixture.allocate(1u64);
    let sink = count.clone();
    fixture
        .runtime
        .set_finalizer_ptr(&obj, move |_: Handle<u64>| *sink.lock() += 1)
        .unwrap();

    // Runner not started: the entry stays queued
    fixture.cycles(1);
    assert_eq!(fixture.runtime.pending_finalizers(), 1);
    assert!(!fixture.runtime.unregister(obj.object()));

    fixture.runtime.start().unwrap();
    fixture.cycle_and_settle(2);
    assert_eq!(*count.lock(), 1);
}

/// A fresh finalizer may be attached once the old one was removed
///
/// **Bug this finds:** registration id reuse, table not accepting re-adds
#[test]
fn test_reregister_after_unregister() {
    let fixture = RuntimeFixture::with_defaults();
    let seen = Recorder::<&'static str>::new();

    let obj = fixture.allocate(0u64);
    let sink = seen.sink();
    fixture
        .runtime
        .set_finalizer_iface(&obj, move |_| sink.lock().push("first"))
        .unwrap();
    assert!(fixture.runtime.unregister(obj.object()));

    let sink = seen.sink();
    fixture
        .runtime
        .set_finalizer_iface(&obj, move |_| sink.lock().push("second"))
        .unwrap();

    fixture.cycle_and_settle(1);
    assert_eq!(seen.values(), vec!["second"]);
}

/// Captured state that calls into the runtime from `Drop`
struct TouchesRuntimeOnDrop {
    runtime: Arc<Runtime>,
    object: ObjectRef,
    drops: Arc<Mutex<u32>>,
}

impl Drop for TouchesRuntimeOnDrop {
    fn drop(&mut self) {
        let _ = self.runtime.contains(self.object);
        let _ = self.runtime.heap_stats();
        *self.drops.lock() += 1;
    }
}

/// Rejected and unregistered callbacks are dropped without the heap lock
///
/// **Bug this finds:** self-deadlock when captured state re-enters the
/// collector while being dropped
#[test]
fn test_dropped_callback_may_reenter_runtime() {
    let fixture = RuntimeFixture::with_defaults();
    let drops = Arc::new(Mutex::new(0u32));
    let obj = fixture.allocate(5u64);
    let guard = || TouchesRuntimeOnDrop {
        runtime: fixture.runtime.clone(),
        object: obj.object(),
        drops: drops.clone(),
    };

    let held = guard();
    fixture
        .runtime
        .set_finalizer_iface(&obj, move |_| {
            let _ = &held;
        })
        .unwrap();

    // Duplicate registration: the refused callback is dropped
    let refused = guard();
    let err = fixture
        .runtime
        .set_finalizer_iface(&obj, move |_| {
            let _ = &refused;
        })
        .unwrap_err();
    assert!(matches!(err, FinError::AlreadyRegistered { .. }));
    assert_eq!(*drops.lock(), 1);

    // Type mismatch: same
    let mismatched = guard();
    let err = fixture
        .runtime
        .register(
            obj.object(),
            Callback::pointer(move |_: Handle<i32>| {
                let _ = &mismatched;
            }),
        )
        .unwrap_err();
    assert!(matches!(err, FinError::TypeMismatch { .. }));
    assert_eq!(*drops.lock(), 2);

    assert!(fixture.runtime.unregister(obj.object()));
    assert_eq!(*drops.lock(), 3);
}

/// ============================================================================
/// EXTRA CYCLE OF LIFE
/// ============================================================================

/// The finalized object and everything it references survive until the
/// callback has returned, then are reclaimed by the following cycle
///
/// **Bug this finds:** sweeping objects a pending callback still needs
#[test]
fn test_object_reclaimed_one_cycle_after_finalizer() {
    let fixture = RuntimeFixture::with_defaults();
    let seen = Recorder::<u64>::new();

    let owner = fixture.allocate(10u64);
    let child = fixture.allocate(20u64);
    fixture
        .runtime
        .write_ref(owner.object(), child.object())
        .unwrap();

    let sink = seen.sink();
    let gc = fixture.runtime.gc().clone();
    let child_ref = child.object();
    fixture
        .runtime
        .set_finalizer_ptr(&owner, move |h: Handle<u64>| {
            // The referent is still a live allocation while the callback runs
            if gc.contains(child_ref) {
                sink.lock().push(h.get());
            }
        })
        .unwrap();

    let first = fixture.runtime.force_cycle().unwrap();
    assert_eq!(first.enqueued, 1);
    assert_eq!(first.reclaimed_objects, 0);
    fixture.settle();
    assert_eq!(seen.values(), vec![10]);

    let second = fixture.runtime.force_cycle().unwrap();
    assert_eq!(second.reclaimed_objects, 2);
    assert!(!fixture.runtime.contains(owner.object()));
    assert!(!fixture.runtime.contains(child.object()));
}

/// ============================================================================
/// RESURRECTION
/// ============================================================================

/// A callback that roots its argument resurrects it
///
/// **Bug this finds:** reclaiming resurrected objects, re-running the
/// finalizer of a resurrected object
#[test]
fn test_resurrection_keeps_object_alive() {
    let fixture = RuntimeFixture::with_config(FinalizerConfig {
        event_level: LogLevel::Trace,
        ..Default::default()
    });
    let count = Arc::new(Mutex::new(0u32));

    let obj = fixture.allocate(5u64);
    let gc = fixture.runtime.gc().clone();
    let sink = count.clone();
    fixture
        .runtime
        .set_finalizer_ptr(&obj, move |h: Handle<u64>| {
            *sink.lock() += 1;
            gc.add_root(h.object())
        })
        .unwrap();

    fixture.cycle_and_settle(1);
    let confirm = fixture.runtime.force_cycle().unwrap();
    assert_eq!(confirm.resurrected, 1);

    fixture.cycle_and_settle(3);
    assert!(fixture.runtime.contains(obj.object()));
    assert_eq!(obj.get(), 5);
    assert_eq!(*count.lock(), 1);
    assert_eq!(fixture.runtime.stats().resurrected, 1);

    let address = obj.object().address();
    assert_eq!(
        fixture.runtime.events().count_matching(
            |e| matches!(e, FinEvent::Resurrected { address: a, .. } if *a == address)
        ),
        1
    );

    // Dropping the root again reclaims it without another callback
    fixture.runtime.remove_root(obj.object());
    fixture.cycle_and_settle(1);
    assert!(!fixture.runtime.contains(obj.object()));
    assert_eq!(*count.lock(), 1);
}

/// A callback may register a new finalizer on its own argument
///
/// **Bug this finds:** treating the object as permanently finalized
#[test]
fn test_callback_can_register_again() {
    let fixture = RuntimeFixture::with_defaults();
    let seen = Recorder::<&'static str>::new();

    let obj = fixture.allocate(1u64);
    let runtime_gc = fixture.runtime.gc().clone();
    let outer = seen.sink();
    let inner = seen.sink();
    fixture
        .runtime
        .set_finalizer_iface(&obj, move |v| {
            outer.lock().push("first");
            runtime_gc.register(
                v.object(),
                fgc_finalizer::Callback::interface(move |_| inner.lock().push("second")),
            )
        })
        .unwrap();

    fixture.cycle_and_settle(1);
    assert_eq!(seen.values(), vec!["first"]);
    assert_eq!(fixture.runtime.tracked_count(), 1);

    fixture.cycle_and_settle(1);
    assert_eq!(seen.values(), vec!["first", "second"]);

    fixture.cycle_and_settle(1);
    assert!(!fixture.runtime.contains(obj.object()));
}

/// ============================================================================
/// ORDERING
/// ============================================================================

/// Objects found unreachable in the same cycle run in registration order
///
/// **Bug this finds:** unordered table iteration, LIFO queue
#[test]
fn test_same_cycle_fifo_order() {
    let fixture = RuntimeFixture::unstarted(FinalizerConfig::default());
    let seen = Recorder::<u32>::new();

    for i in 0..16u32 {
        let obj = fixture.allocate(i);
        let sink = seen.sink();
        fixture
            .runtime
            .set_finalizer_ptr(&obj, move |h: Handle<u32>| sink.lock().push(h.get()))
            .unwrap();
    }

    fixture.cycles(1);
    fixture.runtime.start().unwrap();
    fixture.settle();

    assert_eq!(seen.values(), (0..16).collect::<Vec<_>>());
}

/// Dependent finalizable objects become eligible in the same cycle
///
/// **Bug this finds:** ordering between finalizable objects leaking in
#[test]
fn test_dependent_objects_finalized_together() {
    let fixture = RuntimeFixture::with_defaults();
    let seen = Recorder::<u64>::new();

    let outer = fixture.allocate(1u64);
    let inner = fixture.allocate(2u64);
    fixture
        .runtime
        .write_ref(outer.object(), inner.object())
        .unwrap();
    for obj in [&outer, &inner] {
        let sink = seen.sink();
        fixture
            .runtime
            .set_finalizer_ptr(obj, move |h: Handle<u64>| sink.lock().push(h.get()))
            .unwrap();
    }

    let report = fixture.runtime.force_cycle().unwrap();
    assert_eq!(report.enqueued, 2);
    fixture.settle();
    assert_eq!(seen.values(), vec![1, 2]);
}
