//! # FGC Finalizer - Finalizer Dispatch for a Tracing Collector
//!
//! Attach a callback to a heap object; after the collector proves the
//! object unreachable, the callback runs exactly once, on a dedicated
//! runner thread, with the object as its argument.
//!
//! ## Overview
//!
//! - **Identity table**: which objects carry a finalizer
//! - **Reachability classifier**: hooks every collection cycle and queues
//!   tracked objects that were not marked
//! - **Finalizer queue**: FIFO of due callbacks; queued objects stay alive
//!   as extra roots until their callback has run
//! - **Runner**: one named thread executing callbacks, with an observable
//!   asleep state
//! - **Argument marshaller**: pointer-form callbacks get a typed
//!   [`Handle<T>`], interface-form callbacks get an [`Interface`] value
//!   carrying the object's runtime type
//!
//! The host collector is a stop-the-world mark-sweep over an
//! address-indexed heap of typed values. Objects are kept alive only by
//! roots and heap references, never by Rust handles.
//!
//! ## Quick Start
//!
//! ```rust
//! use fgc_finalizer::{FinalizerConfig, Handle, Interface, Runtime};
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), fgc_finalizer::FinError> {
//!     let runtime = Runtime::new(FinalizerConfig::default())?;
//!     runtime.start()?;
//!
//!     let seen = Arc::new(Mutex::new(Vec::new()));
//!
//!     let a = runtime.allocate(-1i64)?;
//!     let sink = seen.clone();
//!     runtime.set_finalizer_ptr(&a, move |h: Handle<i64>| sink.lock().push(h.get()))?;
//!
//!     let b = runtime.allocate(-2i64)?;
//!     let sink = seen.clone();
//!     runtime.set_finalizer_iface(&b, move |v: Interface| {
//!         if let Some(h) = v.downcast::<i64>() {
//!             sink.lock().push(h.get());
//!         }
//!     })?;
//!
//!     // Neither object is rooted, so both are unreachable
//!     runtime.force_cycle()?;
//!     runtime.force_cycle()?;
//!     assert!(runtime.wait_until_idle(Duration::from_secs(5)));
//!
//!     let mut values = seen.lock().clone();
//!     values.sort();
//!     assert_eq!(values, vec![-2, -1]);
//!
//!     runtime.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Object Lifetime With a Finalizer
//!
//! ```text
//!  cycle N      unmarked  ──►  queued (retained, survives the sweep)
//!  runner                      callback runs once
//!  cycle N+k    marked    ──►  resurrected, lives on without finalizer
//!               unmarked  ──►  reclaimed
//! ```
//!
//! ## Thread Safety
//!
//! - `Runtime` and `GarbageCollector` are `Send + Sync`
//! - Cycles and mutator heap operations serialize on one heap lock
//! - Callbacks never run while that lock is held, so they may allocate,
//!   add roots or register new finalizers
//!
//! ## Modules
//!
//! - [`config`]: runtime configuration and validation
//! - [`error`]: error types
//! - [`finalizer`]: identity table, classifier, queue, runner, marshaller
//! - [`gc`]: collection cycle
//! - [`heap`]: object model and address-indexed heap
//! - [`logging`]: event log on top of the `log` facade
//! - [`marker`]: reachability tracing
//! - [`runtime`]: mutator-facing facade
//! - [`stats`]: counters and latency histograms

// Core modules
pub mod config;
pub mod error;
pub mod gc;

// Heap and tracing
pub mod heap;
pub mod marker;

// Finalization
pub mod finalizer;

// Runtime and monitoring
pub mod logging;
pub mod runtime;
pub mod stats;

pub use config::{ConfigError, FinalizerConfig};
pub use error::{FinError, Result};
pub use finalizer::{
    Callback, CallbackForm, FailureKind, FinalizerFailure, FinalizerOutput, Interface, RunnerState,
};
pub use gc::{CycleReport, GarbageCollector, GcReason, GcState};
pub use heap::{AnyHandle, Handle, ObjectRef, TypeDescriptor};
pub use logging::{EventLog, FinEvent, LogLevel};
pub use runtime::{Runtime, RuntimeState};
pub use stats::StatsSummary;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create and start a runtime with default configuration
///
/// # Examples
///
/// ```rust
/// let runtime = fgc_finalizer::init()?;
/// runtime.wait_for_runner_asleep()?;
/// runtime.stop()?;
/// # Ok::<(), fgc_finalizer::FinError>(())
/// ```
pub fn init() -> Result<Runtime> {
    init_with_config(FinalizerConfig::default())
}

/// Create and start a runtime with `config`
///
/// # Errors
/// `Configuration` if `config` is invalid, `RunnerSpawn` if the runner
/// thread cannot be created.
pub fn init_with_config(config: FinalizerConfig) -> Result<Runtime> {
    let runtime = Runtime::new(config)?;
    runtime.start()?;
    Ok(runtime)
}
