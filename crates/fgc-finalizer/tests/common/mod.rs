//! Test Utilities for the Finalizer Test Suite
//!
//! Every test builds its own [`RuntimeFixture`], so runtimes never share a
//! heap, a queue or a runner thread.

#![allow(dead_code)]

use fgc_finalizer::{FinalizerConfig, Handle, Runtime};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Maximum time any single wait may take
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// ============================================================================
/// RUNTIME FIXTURE
/// ============================================================================

/// Started runtime with a parked runner
pub struct RuntimeFixture {
    pub runtime: Arc<Runtime>,
}

impl RuntimeFixture {
    /// Default configuration, runner started and asleep
    pub fn with_defaults() -> Self {
        Self::with_config(FinalizerConfig::default())
    }

    /// Custom configuration, runner started and asleep
    pub fn with_config(config: FinalizerConfig) -> Self {
        let fixture = Self::unstarted(config);
        fixture
            .runtime
            .start()
            .expect("runner should start with valid config");
        fixture
            .runtime
            .wait_for_runner_asleep()
            .expect("fresh runner should go to sleep");
        fixture
    }

    /// Runtime whose runner thread has not been spawned
    pub fn unstarted(config: FinalizerConfig) -> Self {
        let runtime = Runtime::new(config).expect("runtime creation should succeed");
        Self {
            runtime: Arc::new(runtime),
        }
    }

    /// Allocate an unrooted object
    pub fn allocate<T: Any + Send + Sync>(&self, value: T) -> Handle<T> {
        self.runtime
            .allocate(value)
            .expect("allocation should succeed")
    }

    /// Allocate a rooted object
    pub fn allocate_rooted<T: Any + Send + Sync>(&self, value: T) -> Handle<T> {
        let handle = self.allocate(value);
        self.runtime
            .add_root(handle.object())
            .expect("fresh object can be rooted");
        handle
    }

    /// Run `n` forced cycles
    pub fn cycles(&self, n: usize) {
        for _ in 0..n {
            self.runtime
                .force_cycle()
                .expect("forced cycle should succeed");
        }
    }

    /// Wait until every queued callback ran and the runner is asleep
    pub fn settle(&self) {
        assert!(
            self.runtime.wait_until_idle(TEST_TIMEOUT),
            "runner did not drain the queue within {:?} (state {})",
            TEST_TIMEOUT,
            self.runtime.runner_state()
        );
    }

    /// Run `n` cycles, then settle
    pub fn cycle_and_settle(&self, n: usize) {
        self.cycles(n);
        self.settle();
    }
}

/// ============================================================================
/// OBSERVERS
/// ============================================================================

/// Shared record of what callbacks saw
pub struct Recorder<T> {
    values: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Closure-side handle; push from inside a callback
    pub fn sink(&self) -> Arc<Mutex<Vec<T>>> {
        self.values.clone()
    }

    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }
}

/// Poll `predicate` every 20ms, at most 100 times
pub fn wait_for(mut predicate: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    predicate()
}
