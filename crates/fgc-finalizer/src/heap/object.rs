//! Object Model - References, Type Descriptors and Handles
//!
//! Objects are identified by their address. The heap hands out typed
//! [`Handle`]s; the finalizer machinery moves type-erased [`AnyHandle`]s
//! around and recovers the typed view only after checking the object's
//! [`TypeDescriptor`].

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Address of a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef(usize);

impl ObjectRef {
    /// Null reference
    pub const NULL: ObjectRef = ObjectRef(0);

    /// Create reference from raw address
    pub const fn from_address(address: usize) -> Self {
        ObjectRef(address)
    }

    /// Raw address
    pub const fn address(self) -> usize {
        self.0
    }

    /// Check if null
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Reference `bytes` past this one
    ///
    /// Produces interior references; useful for validating targets.
    pub const fn offset(self, bytes: usize) -> Self {
        ObjectRef(self.0 + bytes)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Runtime type descriptor carried by every heap object
#[derive(Debug, Clone, Copy)]
pub struct TypeDescriptor {
    id: TypeId,
    name: &'static str,
    size: usize,
}

impl TypeDescriptor {
    /// Descriptor of `T`
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Check if this describes `T`
    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeDescriptor {}

/// Type-erased payload cell. The concrete type is always `RwLock<T>`.
pub(crate) type ErasedCell = Arc<dyn Any + Send + Sync>;

/// Typed reference to a heap value
///
/// A handle keeps the value's memory valid, but it is not a GC root:
/// only roots and heap edges keep an object reachable.
pub struct Handle<T> {
    object: ObjectRef,
    cell: Arc<RwLock<T>>,
}

impl<T: Any + Send + Sync> Handle<T> {
    pub(crate) fn new(object: ObjectRef, cell: Arc<RwLock<T>>) -> Self {
        Self { object, cell }
    }

    /// Object address
    pub fn object(&self) -> ObjectRef {
        self.object
    }

    /// Runtime type descriptor
    pub fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::of::<T>()
    }

    /// Shared access to the value
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.cell.read()
    }

    /// Exclusive access to the value
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.cell.write()
    }

    /// Replace the value, returning the old one
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.cell.write(), value)
    }

    /// Erase the static type
    pub fn erase(&self) -> AnyHandle {
        AnyHandle {
            object: self.object,
            descriptor: TypeDescriptor::of::<T>(),
            cell: self.cell.clone(),
        }
    }
}

impl<T: Any + Send + Sync + Clone> Handle<T> {
    /// Copy of the current value
    pub fn get(&self) -> T {
        self.cell.read().clone()
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            object: self.object,
            cell: self.cell.clone(),
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("object", &self.object)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Type-erased reference to a heap value
#[derive(Clone)]
pub struct AnyHandle {
    object: ObjectRef,
    descriptor: TypeDescriptor,
    cell: ErasedCell,
}

impl AnyHandle {
    pub(crate) fn from_parts(
        object: ObjectRef,
        descriptor: TypeDescriptor,
        cell: ErasedCell,
    ) -> Self {
        Self {
            object,
            descriptor,
            cell,
        }
    }

    /// Object address
    pub fn object(&self) -> ObjectRef {
        self.object
    }

    /// Runtime type descriptor
    pub fn descriptor(&self) -> TypeDescriptor {
        self.descriptor
    }

    /// Recover the typed handle
    ///
    /// Returns None if the object is not a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Handle<T>> {
        if !self.descriptor.is::<T>() {
            return None;
        }
        self.cell
            .clone()
            .downcast::<RwLock<T>>()
            .ok()
            .map(|cell| Handle::new(self.object, cell))
    }
}

impl fmt::Debug for AnyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyHandle")
            .field("object", &self.object)
            .field("type", &self.descriptor.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_offset() {
        let obj = ObjectRef::from_address(0x1000);
        assert_eq!(obj.offset(8).address(), 0x1008);
        assert!(!obj.is_null());
        assert!(ObjectRef::NULL.is_null());
        assert_eq!(obj.to_string(), "0x1000");
    }

    #[test]
    fn test_descriptor_identity() {
        let a = TypeDescriptor::of::<i64>();
        assert!(a.is::<i64>());
        assert!(!a.is::<u64>());
        assert_eq!(a.size(), 8);
        assert_eq!(a, TypeDescriptor::of::<i64>());
    }

    #[test]
    fn test_erase_and_downcast() {
        let handle = Handle::new(ObjectRef::from_address(0x40), Arc::new(RwLock::new(7i64)));
        let erased = handle.erase();

        assert!(erased.downcast::<u32>().is_none());
        let back = erased.downcast::<i64>().expect("same type");
        assert_eq!(back.object(), handle.object());

        *handle.write() = -1;
        assert_eq!(back.get(), -1);
    }
}
