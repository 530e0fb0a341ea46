//! Finalizer Runner - Dedicated Callback Thread
//!
//! One named thread drains the [`FinalizerQueue`]. Callbacks run
//! synchronously and one at a time, never on a mutator or collector thread.
//! A callback that panics or returns an error is reported through the log,
//! the statistics, the event log and the failure channel, and the runner
//! carries on with the next entry.

use super::marshal::{self, CallbackForm};
use super::queue::{FinalizerQueue, FinalizerQueueEntry, Next};
use crate::config::FinalizerConfig;
use crate::error::{FinError, Result};
use crate::heap::ObjectRef;
use crate::logging::{EventLog, FinEvent};
use crate::stats::FinalizerStats;
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// How a callback failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Callback panicked
    Panicked,
    /// Callback returned `Err`
    Returned,
    /// Argument could not be built; callback not run
    Marshal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Panicked => write!(f, "panicked"),
            FailureKind::Returned => write!(f, "returned error"),
            FailureKind::Marshal => write!(f, "marshal failed"),
        }
    }
}

/// Report of a failed callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizerFailure {
    pub object: ObjectRef,
    pub type_name: &'static str,
    pub form: CallbackForm,
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for FinalizerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} finalizer for {} ({}) {}: {}",
            self.form, self.object, self.type_name, self.kind, self.message
        )
    }
}

/// Shared state handed to the runner thread
struct RunnerContext {
    queue: Arc<FinalizerQueue>,
    events: Arc<EventLog>,
    stats: Arc<FinalizerStats>,
    failures: Sender<FinalizerFailure>,
}

/// FinalizerRunner - owns the runner thread
pub struct FinalizerRunner {
    queue: Arc<FinalizerQueue>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl FinalizerRunner {
    /// Spawn the runner thread
    pub fn spawn(
        config: &FinalizerConfig,
        queue: Arc<FinalizerQueue>,
        events: Arc<EventLog>,
        stats: Arc<FinalizerStats>,
        failures: Sender<FinalizerFailure>,
    ) -> Result<Self> {
        let mut builder = std::thread::Builder::new().name(config.runner_thread_name.clone());
        if let Some(stack_size) = config.runner_stack_size {
            builder = builder.stack_size(stack_size);
        }

        let context = RunnerContext {
            queue: queue.clone(),
            events,
            stats,
            failures,
        };

        queue.mark_started();
        let handle = builder
            .spawn(move || run_loop(context))
            .map_err(|e| FinError::RunnerSpawn(e.to_string()))?;

        log::debug!("[FIN] Runner thread '{}' started", config.runner_thread_name);

        Ok(Self {
            queue,
            thread_handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the runner and wait for it to exit
    ///
    /// A callback in progress finishes first; queued entries are dropped.
    pub fn stop(&self) -> Result<()> {
        let abandoned = self.queue.shutdown();
        if !abandoned.is_empty() {
            log::warn!(
                "[FIN] Runner stopping with {} finalizers not run",
                abandoned.len()
            );
        }
        drop(abandoned);

        let Some(handle) = self.thread_handle.lock().take() else {
            return Ok(());
        };
        if handle.thread().id() == std::thread::current().id() {
            return Err(FinError::InvalidState {
                expected: "caller outside the runner thread".to_string(),
                actual: "stop requested from a finalizer".to_string(),
            });
        }
        handle
            .join()
            .map_err(|_| FinError::InvariantViolation("runner thread panicked".to_string()))
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for FinalizerRunner {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("[FIN] Finalizer runner shutdown failed: {}", e);
        }
    }
}

fn run_loop(context: RunnerContext) {
    let on_sleep = || context.events.log(FinEvent::RunnerAsleep);

    loop {
        match context.queue.next(&on_sleep) {
            Next::Run {
                entry,
                woke,
                remaining,
            } => {
                if woke {
                    context.events.log(FinEvent::RunnerWoke {
                        queued: remaining + 1,
                    });
                }
                run_entry(&context, entry);
            },
            Next::Stop => {
                log::debug!("[FIN] Runner thread exiting");
                return;
            },
        }
    }
}

fn run_entry(context: &RunnerContext, entry: FinalizerQueueEntry) {
    let id = entry.id();
    let object = entry.object.object();
    let type_name = entry.object.descriptor().name();
    let form = entry.tracked.form();

    let started = Instant::now();
    let result = execute(entry);
    let elapsed = started.elapsed();

    // The object stays retained until here, so the next cycle either sees it
    // as an extra root or as completed.
    context.queue.complete(id);

    match result {
        Ok(()) => {
            context.stats.record_executed(elapsed);
            context.events.log(FinEvent::FinalizerRan {
                address: object.address(),
                duration_us: elapsed.as_micros() as u64,
            });
        },
        Err((kind, message)) => {
            let failure = FinalizerFailure {
                object,
                type_name,
                form,
                kind,
                message,
            };
            log::error!("[FIN] {}", failure);
            context.stats.record_failed();
            context.events.log(FinEvent::FinalizerFailed {
                address: object.address(),
                message: failure.to_string(),
            });
            // Nobody listening is fine
            let _ = context.failures.send(failure);
        },
    }
}

/// Marshal and invoke one entry
fn execute(entry: FinalizerQueueEntry) -> std::result::Result<(), (FailureKind, String)> {
    let FinalizerQueueEntry {
        mut tracked,
        object,
        ..
    } = entry;

    if tracked.mark_fired() {
        crate::fatal_invariant!("finalizer for {} fired twice", object.object());
    }

    let callback = tracked.into_callback();
    let argument = marshal::marshal(&callback, &object)
        .map_err(|e| (FailureKind::Marshal, e.to_string()))?;

    match panic::catch_unwind(AssertUnwindSafe(|| marshal::invoke(callback, argument))) {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(message))) => Err((FailureKind::Returned, message)),
        Ok(Err(e)) => Err((FailureKind::Marshal, e.to_string())),
        Err(payload) => Err((FailureKind::Panicked, panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
