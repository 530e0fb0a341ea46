//! Error Module - Finalizer Error Types
//!
//! Defines all error types used by the finalizer subsystem.
//!
//! # Error Categories
//!
//! ## Registration Errors
//! - `AlreadyRegistered` - Object already carries a finalizer
//! - `InvalidTarget` - Reference is not the start of a distinct heap allocation
//! - `TypeMismatch` - Pointer-form callback cannot accept the object's type
//!
//! ## Runner Errors
//! - `Marshal` - Argument could not be adapted to the callback's shape
//! - `RunnerSpawn` - Dedicated finalizer thread could not be created
//!
//! ## Fatal Errors
//! - `InvariantViolation` - Double finalization, missed eligibility

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all finalizer operations
///
/// # Examples
///
/// ```rust
/// use fgc_finalizer::FinError;
///
/// fn handle_error(err: FinError) {
///     match err {
///         FinError::AlreadyRegistered { address } => {
///             eprintln!("finalizer already set for {:#x}", address);
///         }
///         FinError::InvalidTarget { address, reason } => {
///             eprintln!("cannot finalize {:#x}: {}", address, reason);
///         }
///         _ => eprintln!("other error: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum FinError {
    /// Object already holds an unfired finalizer
    ///
    /// **When returned:** `register` on an object still present in the identity table
    ///
    /// **Recovery strategy:** `unregister` first, or keep the existing finalizer
    #[error("Finalizer already registered for object {address:#x}")]
    AlreadyRegistered { address: usize },

    /// Reference does not point to a distinct heap allocation
    ///
    /// **When returned:** null, zero-sized sentinel, interior pointer, or an
    /// address the heap does not own (never allocated or already swept)
    ///
    /// **Recovery strategy:** pass the reference returned by allocation
    #[error("Invalid finalizer target {address:#x}: {reason}")]
    InvalidTarget { address: usize, reason: String },

    /// Pointer-form callback declared a different payload type
    ///
    /// **When returned:** `register` with `Callback::pointer::<T>` on an object of type `U`
    #[error("Finalizer expects {expected} but object is {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Argument marshalling failed
    ///
    /// **When returned:** runner could not adapt the stored object to the
    /// callback's expected shape. Reported as a finalizer failure.
    #[error("Argument marshalling failed: {0}")]
    Marshal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Runner thread could not be spawned
    #[error("Failed to spawn finalizer runner: {0}")]
    RunnerSpawn(String),

    /// Invalid state
    ///
    /// **Example scenario:** `start` on a runtime that was already shut down
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Operation timeout
    ///
    /// **Example scenario:** runner never went to sleep within the polling budget
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Internal invariant violated - indicates a bug
    ///
    /// **Recovery strategy:** Cannot recover. Memory may never be reclaimed or
    /// a callback may have run twice.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl FinError {
    /// Check if this error is recoverable by the caller
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FinError::AlreadyRegistered { .. }
                | FinError::InvalidTarget { .. }
                | FinError::TypeMismatch { .. }
                | FinError::Timeout(_)
        )
    }

    /// Check if this error is fatal for the whole subsystem
    pub fn is_fatal(&self) -> bool {
        matches!(self, FinError::InvariantViolation(_))
    }

    pub(crate) fn invalid_target(address: usize, reason: impl Into<String>) -> Self {
        FinError::InvalidTarget {
            address,
            reason: reason.into(),
        }
    }
}

/// Result type alias for finalizer operations
pub type Result<T> = std::result::Result<T, FinError>;

/// Log and abort on a broken subsystem invariant
///
/// Used for double finalization and missed eligibility, neither of which
/// leaves the collector in a state that can be continued from.
#[macro_export]
macro_rules! fatal_invariant {
    ($($arg:tt)*) => {{
        let err = $crate::error::FinError::InvariantViolation(format!($($arg)*));
        log::error!("[FIN] {}", err);
        panic!("{}", err);
    }};
}
