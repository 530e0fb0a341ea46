//! Argument Marshaller - Adapting Objects to Callback Shapes
//!
//! A callback is registered in one of two forms:
//!
//! - **Pointer form** accepts exactly one payload type and receives a typed
//!   [`Handle<T>`].
//! - **Interface form** accepts any payload and receives an [`Interface`]
//!   value wrapping the object together with its runtime type descriptor.
//!
//! The form is fixed at registration. When an entry reaches the runner,
//! [`marshal`] builds the argument and [`invoke`] calls the callback with it.
//! Whatever the callback returns is discarded unless it reports failure
//! (see [`FinalizerOutput`]).

use crate::error::{FinError, Result};
use crate::heap::{AnyHandle, Handle, ObjectRef, TypeDescriptor};
use std::any::Any;
use std::fmt;

/// Result of a callback once its return value has been discarded
pub type Outcome = std::result::Result<(), String>;

/// Values a finalizer callback may return
///
/// Return values are ignored, only an `Err` is kept and reported.
pub trait FinalizerOutput {
    fn into_outcome(self) -> Outcome;
}

impl FinalizerOutput for () {
    fn into_outcome(self) -> Outcome {
        Ok(())
    }
}

impl<T, E: fmt::Display> FinalizerOutput for std::result::Result<T, E> {
    fn into_outcome(self) -> Outcome {
        self.map(|_| ()).map_err(|e| e.to_string())
    }
}

macro_rules! impl_tuple_output {
    ($($name:ident),+) => {
        impl<$($name),+> FinalizerOutput for ($($name,)+) {
            fn into_outcome(self) -> Outcome {
                Ok(())
            }
        }
    };
}

impl_tuple_output!(A);
impl_tuple_output!(A, B);
impl_tuple_output!(A, B, C);
impl_tuple_output!(A, B, C, D);

/// Callback form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackForm {
    Pointer,
    Interface,
}

impl fmt::Display for CallbackForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackForm::Pointer => write!(f, "pointer"),
            CallbackForm::Interface => write!(f, "interface"),
        }
    }
}

type PointerFn = Box<dyn FnOnce(AnyHandle) -> Result<Outcome> + Send>;
type InterfaceFn = Box<dyn FnOnce(Interface) -> Outcome + Send>;

/// Pointer-form callback together with the payload type it accepts
pub struct PointerFinalizer {
    expects: TypeDescriptor,
    invoke: PointerFn,
}

impl PointerFinalizer {
    /// Payload type the callback was declared for
    pub fn expects(&self) -> TypeDescriptor {
        self.expects
    }
}

/// Interface-form callback
pub struct InterfaceFinalizer {
    invoke: InterfaceFn,
}

/// A finalizer callback
pub enum Callback {
    Pointer(PointerFinalizer),
    Interface(InterfaceFinalizer),
}

impl Callback {
    /// Pointer-form callback receiving a typed handle to a `T`
    pub fn pointer<T, F, R>(f: F) -> Self
    where
        T: Any + Send + Sync,
        F: FnOnce(Handle<T>) -> R + Send + 'static,
        R: FinalizerOutput,
    {
        let invoke = move |object: AnyHandle| match object.downcast::<T>() {
            Some(handle) => Ok(f(handle).into_outcome()),
            None => Err(FinError::Marshal(format!(
                "object {} is a {}, callback expects {}",
                object.object(),
                object.descriptor().name(),
                std::any::type_name::<T>()
            ))),
        };
        Callback::Pointer(PointerFinalizer {
            expects: TypeDescriptor::of::<T>(),
            invoke: Box::new(invoke),
        })
    }

    /// Interface-form callback receiving any payload
    pub fn interface<F, R>(f: F) -> Self
    where
        F: FnOnce(Interface) -> R + Send + 'static,
        R: FinalizerOutput,
    {
        Callback::Interface(InterfaceFinalizer {
            invoke: Box::new(move |value| f(value).into_outcome()),
        })
    }

    /// Form chosen at registration
    pub fn form(&self) -> CallbackForm {
        match self {
            Callback::Pointer(_) => CallbackForm::Pointer,
            Callback::Interface(_) => CallbackForm::Interface,
        }
    }

    /// Reject a pointer-form callback that cannot accept `descriptor`
    pub(crate) fn check_target(&self, descriptor: TypeDescriptor) -> Result<()> {
        match self {
            Callback::Pointer(p) if p.expects != descriptor => Err(FinError::TypeMismatch {
                expected: p.expects.name(),
                actual: descriptor.name(),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Pointer(p) => f
                .debug_struct("Callback::Pointer")
                .field("expects", &p.expects.name())
                .finish(),
            Callback::Interface(_) => f.debug_struct("Callback::Interface").finish(),
        }
    }
}

/// Object wrapped with its runtime type descriptor
#[derive(Debug, Clone)]
pub struct Interface {
    descriptor: TypeDescriptor,
    object: AnyHandle,
}

impl Interface {
    pub(crate) fn new(object: AnyHandle) -> Self {
        Self {
            descriptor: object.descriptor(),
            object,
        }
    }

    pub fn descriptor(&self) -> TypeDescriptor {
        self.descriptor
    }

    /// Name of the dynamic type
    pub fn type_name(&self) -> &'static str {
        self.descriptor.name()
    }

    /// Address of the wrapped object
    pub fn object(&self) -> ObjectRef {
        self.object.object()
    }

    pub fn handle(&self) -> &AnyHandle {
        &self.object
    }

    /// Check the dynamic type
    pub fn is<T: Any>(&self) -> bool {
        self.descriptor.is::<T>()
    }

    /// Recover a typed handle if the dynamic type is `T`
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Handle<T>> {
        self.object.downcast::<T>()
    }
}

/// Argument handed to a callback
#[derive(Debug)]
pub enum Argument {
    Pointer(AnyHandle),
    Interface(Interface),
}

/// Build the argument `callback` expects for `object`
pub fn marshal(callback: &Callback, object: &AnyHandle) -> Result<Argument> {
    match callback {
        Callback::Pointer(p) => {
            if p.expects != object.descriptor() {
                return Err(FinError::Marshal(format!(
                    "object {} is a {}, callback expects {}",
                    object.object(),
                    object.descriptor().name(),
                    p.expects.name()
                )));
            }
            Ok(Argument::Pointer(object.clone()))
        },
        Callback::Interface(_) => Ok(Argument::Interface(Interface::new(object.clone()))),
    }
}

/// Call `callback` with a marshalled argument
///
/// The outer `Result` reports marshalling problems, the inner [`Outcome`]
/// reports what the callback itself returned.
pub fn invoke(callback: Callback, argument: Argument) -> Result<Outcome> {
    match (callback, argument) {
        (Callback::Pointer(p), Argument::Pointer(object)) => (p.invoke)(object),
        (Callback::Interface(i), Argument::Interface(value)) => Ok((i.invoke)(value)),
        (callback, _) => Err(FinError::Marshal(format!(
            "argument shape does not match {} callback",
            callback.form()
        ))),
    }
}
