//! Finalizer Queue - Pending Callbacks
//!
//! FIFO of entries whose objects were found unreachable, shared between the
//! collector (producer) and the runner thread (consumer).
//!
//! The queue also owns the runner's observable state. The runner publishes
//! `Asleep` under the queue lock right before it waits, and a producer that
//! finds it asleep flips it back to `Running` under the same lock before
//! signalling. So `is_runner_asleep()` never reports an idle runner while
//! work is queued.
//!
//! Objects referenced by queued or running entries are retained: the
//! collector treats them as extra roots. When a callback finishes, its
//! object moves to the completed list, which the next cycle drains to
//! decide between resurrection and reclamation.
//!
//! After shutdown the queue retains nothing new: pending entries are handed
//! back to the caller and later batches are refused, so their objects are
//! swept like any other garbage. Entries always leave through return values
//! so their callbacks are dropped outside the queue lock.

use super::table::TrackedObject;
use crate::heap::AnyHandle;
use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Runner thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Runner thread not spawned yet
    NotStarted,
    /// Parked on an empty queue
    Asleep,
    /// Executing or about to execute callbacks
    Running,
    /// Thread exited
    Stopped,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::NotStarted => write!(f, "NotStarted"),
            RunnerState::Asleep => write!(f, "Asleep"),
            RunnerState::Running => write!(f, "Running"),
            RunnerState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Entry whose callback is due
#[derive(Debug)]
pub struct FinalizerQueueEntry {
    pub(crate) tracked: TrackedObject,
    pub(crate) object: AnyHandle,
    pub(crate) cycle: u64,
}

impl FinalizerQueueEntry {
    pub(crate) fn new(tracked: TrackedObject, object: AnyHandle, cycle: u64) -> Self {
        Self {
            tracked,
            object,
            cycle,
        }
    }

    /// Registration id
    pub fn id(&self) -> u64 {
        self.tracked.id()
    }

    pub fn address(&self) -> usize {
        self.object.object().address()
    }

    /// Cycle in which the object was found unreachable
    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}

/// Addresses handed to a collection cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSnapshot {
    /// Objects referenced by queued or running entries
    pub retained: Vec<usize>,
    /// Objects whose callbacks completed since the previous snapshot
    pub completed: Vec<usize>,
}

struct QueueInner {
    entries: VecDeque<FinalizerQueueEntry>,
    /// Registration id -> address, for queued and running entries
    in_flight: IndexMap<u64, usize>,
    completed: Vec<usize>,
    state: RunnerState,
    shutdown: bool,
}

/// What the runner should do next
pub(crate) enum Next {
    Run {
        entry: FinalizerQueueEntry,
        /// Runner slept before this entry arrived
        woke: bool,
        /// Entries left behind this one
        remaining: usize,
    },
    Stop,
}

/// FinalizerQueue - FIFO shared by collector and runner
pub struct FinalizerQueue {
    inner: Mutex<QueueInner>,
    /// Signalled when work arrives or on shutdown
    work: Condvar,
    /// Signalled when the runner goes to sleep or stops
    idle: Condvar,
}

impl FinalizerQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::new(),
                in_flight: IndexMap::new(),
                completed: Vec::new(),
                state: RunnerState::NotStarted,
                shutdown: false,
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// Append entries in detection order and wake the runner
    ///
    /// Returns the number of entries pushed, or the whole batch back if the
    /// queue has been shut down.
    pub fn push_batch(
        &self,
        batch: Vec<FinalizerQueueEntry>,
    ) -> std::result::Result<usize, Vec<FinalizerQueueEntry>> {
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return Err(batch);
        }
        for entry in batch {
            if inner.in_flight.insert(entry.id(), entry.address()).is_some() {
                crate::fatal_invariant!(
                    "finalizer {} for {:#x} queued twice",
                    entry.id(),
                    entry.address()
                );
            }
            inner.entries.push_back(entry);
        }

        if inner.state == RunnerState::Asleep {
            inner.state = RunnerState::Running;
        }
        self.work.notify_one();
        Ok(count)
    }

    /// Block until an entry is available or the queue shuts down
    ///
    /// `on_sleep` runs under the queue lock each time the runner parks.
    pub(crate) fn next(&self, on_sleep: impl Fn()) -> Next {
        let mut inner = self.inner.lock();
        let mut woke = false;
        loop {
            if inner.shutdown {
                inner.state = RunnerState::Stopped;
                self.idle.notify_all();
                return Next::Stop;
            }
            if let Some(entry) = inner.entries.pop_front() {
                inner.state = RunnerState::Running;
                return Next::Run {
                    entry,
                    woke,
                    remaining: inner.entries.len(),
                };
            }
            if inner.state != RunnerState::Asleep {
                inner.state = RunnerState::Asleep;
                on_sleep();
                self.idle.notify_all();
            }
            woke = true;
            self.work.wait(&mut inner);
        }
    }

    /// Record that the callback for `id` returned
    pub(crate) fn complete(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(address) = inner.in_flight.shift_remove(&id) {
            inner.completed.push(address);
        }
    }

    /// Retained and completed addresses, draining the completed list
    ///
    /// Taken atomically so every finalized object is either still retained
    /// or up for confirmation, never neither.
    pub fn cycle_snapshot(&self) -> CycleSnapshot {
        let mut inner = self.inner.lock();
        CycleSnapshot {
            retained: inner.in_flight.values().copied().collect(),
            completed: std::mem::take(&mut inner.completed),
        }
    }

    /// Ask the runner to exit
    ///
    /// Returns the entries that were still waiting; they will never run and
    /// their objects are no longer retained. A callback already running
    /// stays retained until it completes.
    pub fn shutdown(&self) -> Vec<FinalizerQueueEntry> {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        if inner.state == RunnerState::NotStarted {
            inner.state = RunnerState::Stopped;
        }
        let abandoned: Vec<FinalizerQueueEntry> = inner.entries.drain(..).collect();
        for entry in &abandoned {
            inner.in_flight.shift_remove(&entry.id());
        }
        self.work.notify_all();
        abandoned
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    pub(crate) fn mark_started(&self) {
        let mut inner = self.inner.lock();
        if inner.state == RunnerState::NotStarted {
            inner.state = RunnerState::Running;
        }
    }

    pub fn runner_state(&self) -> RunnerState {
        self.inner.lock().state
    }

    /// Check if the runner is parked waiting for work
    pub fn is_runner_asleep(&self) -> bool {
        self.runner_state() == RunnerState::Asleep
    }

    /// Wait until the runner parks on an empty queue
    ///
    /// Returns false on timeout or if the runner stopped.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            match inner.state {
                RunnerState::Asleep if inner.entries.is_empty() => return true,
                RunnerState::Stopped => return false,
                _ => {},
            }
            if self.idle.wait_until(&mut inner, deadline).timed_out() {
                return inner.state == RunnerState::Asleep && inner.entries.is_empty();
            }
        }
    }

    /// Entries waiting to run
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Entries queued or running
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// Check if `address` is retained by a queued or running entry
    pub fn retains(&self, address: usize) -> bool {
        self.inner
            .lock()
            .in_flight
            .values()
            .any(|&retained| retained == address)
    }
}

impl Default for FinalizerQueue {
    fn default() -> Self {
        Self::new()
    }
}
