//! Identity Table - Objects With Registered Finalizers
//!
//! Maps object addresses to their pending finalizer. Insertion order is
//! preserved so that objects found unreachable in the same cycle are queued
//! in the order they were registered.

use super::marshal::{Callback, CallbackForm};
use crate::error::FinError;
use crate::heap::{Heap, ObjectRef};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};

/// Registration error paired with the callback it refused
pub type Rejected = (FinError, Callback);

/// Object carrying a finalizer that has not fired yet
#[derive(Debug)]
pub struct TrackedObject {
    id: u64,
    object: ObjectRef,
    callback: Callback,
    fired: bool,
    registered_cycle: u64,
    missed_cycles: u32,
}

impl TrackedObject {
    /// Unique registration id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn object(&self) -> ObjectRef {
        self.object
    }

    pub fn form(&self) -> CallbackForm {
        self.callback.form()
    }

    /// Cycle count at registration
    pub fn registered_cycle(&self) -> u64 {
        self.registered_cycle
    }

    /// Consecutive cycles this object was seen unmarked but left in the table
    pub fn missed_cycles(&self) -> u32 {
        self.missed_cycles
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Set the single-shot flag, returning whether it was already set
    pub(crate) fn mark_fired(&mut self) -> bool {
        std::mem::replace(&mut self.fired, true)
    }

    pub(crate) fn note_missed(&mut self) -> u32 {
        self.missed_cycles += 1;
        self.missed_cycles
    }

    pub(crate) fn reset_missed(&mut self) {
        self.missed_cycles = 0;
    }

    pub(crate) fn into_callback(self) -> Callback {
        self.callback
    }

    #[cfg(test)]
    pub(crate) fn duplicate_for_test(&self) -> Self {
        Self {
            id: self.id,
            object: self.object,
            callback: Callback::interface(|_| ()),
            fired: self.fired,
            registered_cycle: self.registered_cycle,
            missed_cycles: self.missed_cycles,
        }
    }
}

/// IdentityTable - registered finalizers keyed by object address
pub struct IdentityTable {
    entries: Mutex<IndexMap<usize, TrackedObject>>,
    next_id: AtomicU64,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Associate `callback` with `object`
    ///
    /// `object` must be the start of a live, non-zero-sized allocation in
    /// `heap`, and must not already carry an unfired finalizer.
    ///
    /// # Errors
    /// `InvalidTarget`, `TypeMismatch` or `AlreadyRegistered`. A rejected
    /// callback is handed back with the error so the caller decides where
    /// it is dropped.
    pub fn register(
        &self,
        heap: &Heap,
        object: ObjectRef,
        callback: Callback,
        cycle: u64,
    ) -> std::result::Result<(), Rejected> {
        let address = object.address();
        let descriptor = match heap.resolve(object) {
            Ok(header) => header.descriptor(),
            Err(e) => return Err((e, callback)),
        };
        if let Err(e) = callback.check_target(descriptor) {
            return Err((e, callback));
        }

        let mut entries = self.entries.lock();
        if entries.contains_key(&address) {
            drop(entries);
            return Err((FinError::AlreadyRegistered { address }, callback));
        }
        entries.insert(
            address,
            TrackedObject {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                object,
                callback,
                fired: false,
                registered_cycle: cycle,
                missed_cycles: 0,
            },
        );
        Ok(())
    }

    /// Remove the finalizer of `object` before it fires
    pub fn unregister(&self, object: ObjectRef) -> Option<TrackedObject> {
        self.entries.lock().shift_remove(&object.address())
    }

    pub fn contains(&self, object: ObjectRef) -> bool {
        self.entries.lock().contains_key(&object.address())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Tracked addresses in registration order
    pub fn addresses(&self) -> Vec<usize> {
        self.entries.lock().keys().copied().collect()
    }

    /// Exclusive access for the classifier
    pub(crate) fn lock(&self) -> MutexGuard<'_, IndexMap<usize, TrackedObject>> {
        self.entries.lock()
    }
}

impl Default for IdentityTable {
    fn default() -> Self {
        Self::new()
    }
}
