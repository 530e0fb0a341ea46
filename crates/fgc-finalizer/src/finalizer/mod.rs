//! Finalizer Module - Post-Mortem Callbacks
//!
//! Lets a mutator attach a callback to a heap object. Once the collector
//! proves the object unreachable, the callback runs exactly once on a
//! dedicated thread with the object as its argument.
//!
//! Lifecycle of one registration:
//!
//! ```text
//!  register ──► IdentityTable ──(unmarked)──► FinalizerQueue ──► FinalizerRunner
//!                    │                          (retained as root)       │
//!               unregister                                       callback returns
//!                    ▼                                                    ▼
//!               forgotten                     next cycle: resurrected or reclaimed
//! ```
//!
//! Components:
//! - [`table`]: identity table keyed by object address
//! - [`classifier`]: per-cycle eligibility and resurrection checks
//! - [`queue`]: FIFO of due callbacks, owns the runner state
//! - [`runner`]: the callback thread
//! - [`marshal`]: pointer-form and interface-form argument adaptation

pub mod classifier;
pub mod marshal;
pub mod queue;
pub mod runner;
pub mod table;

pub use classifier::{Classification, Confirmation, ReachabilityClassifier};
pub use marshal::{Argument, Callback, CallbackForm, FinalizerOutput, Interface, Outcome};
pub use queue::{CycleSnapshot, FinalizerQueue, FinalizerQueueEntry, RunnerState};
pub use runner::{FailureKind, FinalizerFailure, FinalizerRunner};
pub use table::{IdentityTable, Rejected, TrackedObject};
