//! Heap Module - Object Storage for the Host Collector
//!
//! A non-moving, address-indexed object store. Addresses come from a bump
//! pointer, are 8-byte aligned and never reused, so a stale reference can
//! always be told apart from a live one.
//!
//! Reachability is expressed explicitly:
//! - Roots: counted registrations (`add_root` / `remove_root`)
//! - Edges: references stored in one object pointing at another
//!
//! Zero-sized values all share [`ZERO_BASE`]. They are never stored,
//! never swept and cannot carry finalizers.

pub mod object;

pub use object::{AnyHandle, Handle, ObjectRef, TypeDescriptor};

use crate::error::{FinError, Result};
use indexmap::{IndexMap, IndexSet};
use object::ErasedCell;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// First address handed out by the bump pointer
pub const HEAP_BASE: usize = 0x1000_0000;

/// Shared address of every zero-sized allocation
pub const ZERO_BASE: usize = 0x0fff_fff8;

/// Allocation alignment in bytes
pub const ALIGNMENT: usize = 8;

/// A single heap allocation
pub struct HeapObject {
    /// Start address
    address: usize,
    /// Allocated size (aligned)
    size: usize,
    /// Runtime type of the payload
    descriptor: TypeDescriptor,
    /// Payload cell, concretely `RwLock<T>`
    cell: ErasedCell,
    /// Outgoing references
    edges: IndexSet<usize>,
}

impl HeapObject {
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn descriptor(&self) -> TypeDescriptor {
        self.descriptor
    }

    /// Outgoing references
    pub fn edges(&self) -> impl Iterator<Item = usize> + '_ {
        self.edges.iter().copied()
    }

    /// Type-erased handle to this object
    pub fn handle(&self) -> AnyHandle {
        AnyHandle::from_parts(
            ObjectRef::from_address(self.address),
            self.descriptor,
            self.cell.clone(),
        )
    }
}

/// Result of looking up an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Address is the start of a live allocation
    Start,
    /// Address falls inside a live allocation at the given base
    Interior { base: usize },
    /// Address of the shared zero-sized allocation
    ZeroSized,
    /// Null reference
    Null,
    /// Address does not belong to any live allocation
    Unknown,
}

/// Heap statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub objects: usize,
    pub live_bytes: usize,
    pub roots: usize,
    pub total_allocated: usize,
}

/// Heap - address-indexed object store
pub struct Heap {
    /// Live objects by start address
    objects: BTreeMap<usize, HeapObject>,
    /// Root address -> registration count
    roots: IndexMap<usize, usize>,
    /// Next free address
    next_address: usize,
    /// Bytes in live objects
    live_bytes: usize,
    /// Total bytes ever allocated
    total_allocated: usize,
    /// Allocations since the last sweep
    allocations_since_cycle: usize,
}

impl Heap {
    /// Create empty heap
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            roots: IndexMap::new(),
            next_address: HEAP_BASE,
            live_bytes: 0,
            total_allocated: 0,
            allocations_since_cycle: 0,
        }
    }

    /// Allocate `value` and return a typed handle
    ///
    /// The new object is unreachable until rooted or referenced.
    pub fn allocate<T: Any + Send + Sync>(&mut self, value: T) -> Handle<T> {
        let cell = Arc::new(RwLock::new(value));
        let descriptor = TypeDescriptor::of::<T>();

        if descriptor.size() == 0 {
            return Handle::new(ObjectRef::from_address(ZERO_BASE), cell);
        }

        let size = align_up(descriptor.size());
        let address = self.next_address;
        self.next_address += size;

        self.objects.insert(
            address,
            HeapObject {
                address,
                size,
                descriptor,
                cell: cell.clone(),
                edges: IndexSet::new(),
            },
        );
        self.live_bytes += size;
        self.total_allocated += size;
        self.allocations_since_cycle += 1;

        Handle::new(ObjectRef::from_address(address), cell)
    }

    /// Classify an address
    pub fn lookup(&self, object: ObjectRef) -> Lookup {
        let address = object.address();
        if object.is_null() {
            return Lookup::Null;
        }
        if address == ZERO_BASE {
            return Lookup::ZeroSized;
        }
        match self.objects.range(..=address).next_back() {
            Some((&base, _)) if base == address => Lookup::Start,
            Some((&base, obj)) if address < base + obj.size => Lookup::Interior { base },
            _ => Lookup::Unknown,
        }
    }

    /// Resolve an address that must be the start of a live allocation
    ///
    /// # Errors
    /// `InvalidTarget` for null, zero-sized, interior or unknown addresses.
    pub fn resolve(&self, object: ObjectRef) -> Result<&HeapObject> {
        let address = object.address();
        match self.lookup(object) {
            Lookup::Start => self
                .objects
                .get(&address)
                .ok_or_else(|| FinError::invalid_target(address, "not a live allocation")),
            Lookup::Interior { base } => Err(FinError::invalid_target(
                address,
                format!("interior pointer into allocation at {:#x}", base),
            )),
            Lookup::ZeroSized => Err(FinError::invalid_target(
                address,
                "zero-sized allocation has no distinct address",
            )),
            Lookup::Null => Err(FinError::invalid_target(address, "null reference")),
            Lookup::Unknown => Err(FinError::invalid_target(address, "not a live allocation")),
        }
    }

    /// Check if the address is the start of a live allocation
    pub fn contains(&self, object: ObjectRef) -> bool {
        self.lookup(object) == Lookup::Start
    }

    /// Get object by start address
    pub fn get(&self, object: ObjectRef) -> Option<&HeapObject> {
        self.objects.get(&object.address())
    }

    /// Register a root
    ///
    /// Roots are counted; each `add_root` needs a matching `remove_root`.
    /// Zero-sized objects are immortal and need no root.
    pub fn add_root(&mut self, object: ObjectRef) -> Result<()> {
        if object.address() == ZERO_BASE {
            return Ok(());
        }
        self.resolve(object)?;
        *self.roots.entry(object.address()).or_insert(0) += 1;
        Ok(())
    }

    /// Remove one root registration
    ///
    /// Returns false if the object was not rooted.
    pub fn remove_root(&mut self, object: ObjectRef) -> bool {
        let address = object.address();
        match self.roots.get_mut(&address) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            },
            Some(_) => {
                self.roots.shift_remove(&address);
                true
            },
            None => false,
        }
    }

    /// Check if object is currently rooted
    pub fn is_root(&self, object: ObjectRef) -> bool {
        self.roots.contains_key(&object.address())
    }

    /// Store a reference from `from` to `to`
    ///
    /// # Errors
    /// `InvalidTarget` if either side is not a live allocation start.
    /// References to zero-sized objects are accepted and ignored.
    pub fn write_ref(&mut self, from: ObjectRef, to: ObjectRef) -> Result<()> {
        if to.address() != ZERO_BASE {
            self.resolve(to)?;
        }
        self.resolve(from)?;
        if to.address() == ZERO_BASE {
            return Ok(());
        }
        if let Some(obj) = self.objects.get_mut(&from.address()) {
            obj.edges.insert(to.address());
        }
        Ok(())
    }

    /// Remove a reference from `from` to `to`
    ///
    /// Returns false if no such reference existed.
    pub fn clear_ref(&mut self, from: ObjectRef, to: ObjectRef) -> bool {
        self.objects
            .get_mut(&from.address())
            .map(|obj| obj.edges.shift_remove(&to.address()))
            .unwrap_or(false)
    }

    /// Root addresses
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.roots.keys().copied()
    }

    /// Free every object whose address is not in `keep`
    ///
    /// Returns (objects freed, bytes freed). Roots pointing at freed
    /// objects cannot exist: marking treats every root as live.
    pub fn sweep(&mut self, keep: impl Fn(usize) -> bool) -> (usize, usize) {
        let dead: Vec<usize> = self
            .objects
            .keys()
            .copied()
            .filter(|&address| !keep(address))
            .collect();

        let mut bytes = 0;
        for address in &dead {
            if let Some(obj) = self.objects.remove(address) {
                bytes += obj.size;
            }
        }

        self.live_bytes -= bytes;
        self.allocations_since_cycle = 0;
        (dead.len(), bytes)
    }

    /// Allocations since the last sweep
    pub fn allocations_since_cycle(&self) -> usize {
        self.allocations_since_cycle
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Bytes in live objects
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Statistics snapshot
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            objects: self.objects.len(),
            live_bytes: self.live_bytes,
            roots: self.roots.len(),
            total_allocated: self.total_allocated,
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn align_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}
