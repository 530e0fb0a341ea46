//! Runtime Module - Finalizer Runtime Facade
//!
//! Owns the collector and the runner thread and exposes the mutator-facing
//! API: allocation and roots, finalizer registration, forced cycles and
//! runner observation.

use crate::config::FinalizerConfig;
use crate::error::{FinError, Result};
use crate::finalizer::{
    Callback, FinalizerFailure, FinalizerOutput, FinalizerRunner, Interface, RunnerState,
};
use crate::gc::{CycleReport, GarbageCollector, GcReason};
use crate::heap::{Handle, HeapStats, ObjectRef};
use crate::logging::{EventLog, EventLogConfig};
use crate::stats::{FinalizerStats, StatsSummary};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Created, runner not spawned
    Initialized,
    /// Runner thread active
    Running,
    /// Shutdown in progress
    Stopping,
    /// Runner joined
    Stopped,
}

/// Runtime - finalizer runtime orchestrator
pub struct Runtime {
    gc: Arc<GarbageCollector>,
    runner: Mutex<Option<FinalizerRunner>>,

    config: Arc<FinalizerConfig>,
    stats: Arc<FinalizerStats>,
    events: Arc<EventLog>,

    failures_tx: Sender<FinalizerFailure>,
    failures_rx: Receiver<FinalizerFailure>,

    state: Mutex<RuntimeState>,
}

impl Runtime {
    /// Create new runtime
    ///
    /// The runner thread is not spawned until [`start`](Self::start).
    pub fn new(config: FinalizerConfig) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let stats = Arc::new(FinalizerStats::new(config.stats_enabled));
        let events = Arc::new(EventLog::new(EventLogConfig::from(config.as_ref())));
        let gc = Arc::new(GarbageCollector::new(
            config.clone(),
            stats.clone(),
            events.clone(),
        )?);
        let (failures_tx, failures_rx) = channel::unbounded();

        Ok(Self {
            gc,
            runner: Mutex::new(None),
            config,
            stats,
            events,
            failures_tx,
            failures_rx,
            state: Mutex::new(RuntimeState::Initialized),
        })
    }

    /// Spawn the runner thread
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != RuntimeState::Initialized {
            return Err(FinError::InvalidState {
                expected: format!("{:?}", RuntimeState::Initialized),
                actual: format!("{:?}", *state),
            });
        }

        let runner = FinalizerRunner::spawn(
            &self.config,
            self.gc.queue().clone(),
            self.events.clone(),
            self.stats.clone(),
            self.failures_tx.clone(),
        )?;
        *self.runner.lock() = Some(runner);
        *state = RuntimeState::Running;

        if self.config.verbose {
            log::info!(
                "[FIN] Runtime started (runner '{}')",
                self.config.runner_thread_name
            );
        }
        Ok(())
    }

    /// Stop the runner thread
    ///
    /// Finalizers still queued are not run and their objects become
    /// ordinary garbage. Registration is refused from here on.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                RuntimeState::Stopping | RuntimeState::Stopped => return Ok(()),
                _ => *state = RuntimeState::Stopping,
            }
        }

        let pending = self.gc.pending_finalizers();
        let runner = self.runner.lock().take();
        let result = match runner {
            Some(runner) => runner.stop(),
            None => {
                let abandoned = self.gc.queue().shutdown();
                if !abandoned.is_empty() {
                    log::warn!(
                        "[FIN] Runtime stopping with {} finalizers not run",
                        abandoned.len()
                    );
                }
                drop(abandoned);
                Ok(())
            },
        };

        *self.state.lock() = RuntimeState::Stopped;
        if self.config.verbose {
            log::info!("[FIN] Runtime stopped ({} finalizers pending)", pending);
        }
        result
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.lock()
    }

    pub fn gc(&self) -> &Arc<GarbageCollector> {
        &self.gc
    }

    pub fn config(&self) -> &FinalizerConfig {
        &self.config
    }

    // ---- mutator ----

    /// Allocate `value` on the managed heap
    pub fn allocate<T: Any + Send + Sync>(&self, value: T) -> Result<Handle<T>> {
        self.gc.allocate(value)
    }

    pub fn add_root(&self, object: ObjectRef) -> Result<()> {
        self.gc.add_root(object)
    }

    pub fn remove_root(&self, object: ObjectRef) -> bool {
        self.gc.remove_root(object)
    }

    pub fn write_ref(&self, from: ObjectRef, to: ObjectRef) -> Result<()> {
        self.gc.write_ref(from, to)
    }

    pub fn clear_ref(&self, from: ObjectRef, to: ObjectRef) -> bool {
        self.gc.clear_ref(from, to)
    }

    /// Check if `object` is still a live allocation
    pub fn contains(&self, object: ObjectRef) -> bool {
        self.gc.contains(object)
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.gc.heap_stats()
    }

    // ---- finalizers ----

    /// Attach `callback` to `object`
    ///
    /// # Errors
    /// `InvalidTarget` for null, zero-sized, interior or dead references,
    /// `AlreadyRegistered` if a finalizer is pending, `TypeMismatch` if a
    /// pointer-form callback cannot accept the object, `InvalidState` after
    /// `stop`.
    pub fn register(&self, object: ObjectRef, callback: Callback) -> Result<()> {
        self.gc.register(object, callback)
    }

    /// Attach a pointer-form finalizer receiving the typed handle
    pub fn set_finalizer_ptr<T, F, R>(&self, handle: &Handle<T>, f: F) -> Result<()>
    where
        T: Any + Send + Sync,
        F: FnOnce(Handle<T>) -> R + Send + 'static,
        R: FinalizerOutput,
    {
        self.register(handle.object(), Callback::pointer::<T, F, R>(f))
    }

    /// Attach an interface-form finalizer receiving the object and its type
    pub fn set_finalizer_iface<T, F, R>(&self, handle: &Handle<T>, f: F) -> Result<()>
    where
        T: Any + Send + Sync,
        F: FnOnce(Interface) -> R + Send + 'static,
        R: FinalizerOutput,
    {
        self.register(handle.object(), Callback::interface(f))
    }

    /// Detach the finalizer of `object` before it fires
    pub fn unregister(&self, object: ObjectRef) -> bool {
        self.gc.unregister(object)
    }

    /// Run one collection cycle
    pub fn force_cycle(&self) -> Result<CycleReport> {
        self.gc.force_cycle()
    }

    pub fn collect(&self, reason: GcReason) -> Result<CycleReport> {
        self.gc.collect(reason)
    }

    pub fn cycle_count(&self) -> u64 {
        self.gc.cycle_count()
    }

    /// Objects with a registered, not yet queued finalizer
    pub fn tracked_count(&self) -> usize {
        self.gc.tracked_count()
    }

    /// Callbacks queued or running
    pub fn pending_finalizers(&self) -> usize {
        self.gc.pending_finalizers()
    }

    // ---- runner observation ----

    /// Check if the runner is parked on an empty queue
    pub fn is_runner_asleep(&self) -> bool {
        self.gc.queue().is_runner_asleep()
    }

    pub fn runner_state(&self) -> RunnerState {
        self.gc.queue().runner_state()
    }

    /// Poll until the runner is asleep
    ///
    /// Checks every `poll_interval_ms`, at most `poll_attempts` times.
    ///
    /// # Errors
    /// `Timeout` if the runner never went to sleep.
    pub fn wait_for_runner_asleep(&self) -> Result<()> {
        for _ in 0..self.config.poll_attempts {
            if self.is_runner_asleep() {
                return Ok(());
            }
            std::thread::sleep(self.config.poll_interval());
        }
        if self.is_runner_asleep() {
            return Ok(());
        }
        Err(FinError::Timeout(format!(
            "finalizer runner not asleep after {:?} (state {})",
            self.config.poll_budget(),
            self.runner_state()
        )))
    }

    /// Wait until every queued callback has run and the runner is asleep
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.gc.queue().wait_idle(timeout)
    }

    /// Receiver of failed callback reports
    ///
    /// Each failure is delivered to exactly one receiver clone.
    pub fn failures(&self) -> Receiver<FinalizerFailure> {
        self.failures_rx.clone()
    }

    pub fn stats(&self) -> StatsSummary {
        self.stats.summary()
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("[FIN] Runtime shutdown failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("runner", &self.runner_state())
            .field("gc", &self.gc)
            .finish()
    }
}
