//! Stats Module - Finalizer Statistics
//!
//! Counters for every stage of the finalizer lifecycle plus latency
//! histograms for callbacks and collection cycles. All recording is lock-free
//! except histogram bucket updates.

pub mod histogram;
pub mod timer;

pub use histogram::Histogram;
pub use timer::{CyclePhase, CycleTimer, PhaseTimes};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// FinalizerStats - statistics collector
pub struct FinalizerStats {
    enabled: AtomicBool,

    cycles: AtomicU64,
    registered: AtomicU64,
    unregistered: AtomicU64,
    enqueued: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    resurrected: AtomicU64,
    reclaimed_objects: AtomicU64,
    reclaimed_bytes: AtomicU64,

    /// Callback run time
    callback_latency: Histogram,
    /// Stop-the-world cycle time
    cycle_duration: Histogram,

    start_time: std::time::Instant,
}

impl FinalizerStats {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            cycles: AtomicU64::new(0),
            registered: AtomicU64::new(0),
            unregistered: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            resurrected: AtomicU64::new(0),
            reclaimed_objects: AtomicU64::new(0),
            reclaimed_bytes: AtomicU64::new(0),
            callback_latency: Histogram::new(),
            cycle_duration: Histogram::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn bump(&self, counter: &AtomicU64, by: u64) {
        if self.is_enabled() {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    pub fn record_registered(&self) {
        self.bump(&self.registered, 1);
    }

    pub fn record_unregistered(&self) {
        self.bump(&self.unregistered, 1);
    }

    /// Record a finished cycle
    pub fn record_cycle(
        &self,
        duration: Duration,
        enqueued: usize,
        resurrected: usize,
        reclaimed: (usize, usize),
    ) {
        if !self.is_enabled() {
            return;
        }
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.enqueued.fetch_add(enqueued as u64, Ordering::Relaxed);
        self.resurrected
            .fetch_add(resurrected as u64, Ordering::Relaxed);
        self.reclaimed_objects
            .fetch_add(reclaimed.0 as u64, Ordering::Relaxed);
        self.reclaimed_bytes
            .fetch_add(reclaimed.1 as u64, Ordering::Relaxed);
        self.cycle_duration.record(duration.as_nanos() as u64);
    }

    /// Record a callback that returned normally
    pub fn record_executed(&self, latency: Duration) {
        if !self.is_enabled() {
            return;
        }
        self.executed.fetch_add(1, Ordering::Relaxed);
        self.callback_latency.record(latency.as_nanos() as u64);
    }

    /// Record a callback that panicked, returned an error or was not run
    pub fn record_failed(&self) {
        self.bump(&self.failed, 1);
    }

    pub fn callback_latency(&self) -> &Histogram {
        &self.callback_latency
    }

    pub fn cycle_duration(&self) -> &Histogram {
        &self.cycle_duration
    }

    /// Snapshot of all counters
    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            cycles: self.cycles.load(Ordering::Relaxed),
            registered: self.registered.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            resurrected: self.resurrected.load(Ordering::Relaxed),
            reclaimed_objects: self.reclaimed_objects.load(Ordering::Relaxed),
            reclaimed_bytes: self.reclaimed_bytes.load(Ordering::Relaxed),
            callback_p50_ns: self.callback_latency.p50(),
            callback_p99_ns: self.callback_latency.p99(),
            callback_max_ns: self.callback_latency.max(),
            cycle_mean_ns: self.cycle_duration.mean(),
            cycle_max_ns: self.cycle_duration.max(),
            uptime_ms: self.start_time.elapsed().as_millis() as u64,
        }
    }

    /// Reset every counter and histogram
    pub fn reset(&self) {
        for counter in [
            &self.cycles,
            &self.registered,
            &self.unregistered,
            &self.enqueued,
            &self.executed,
            &self.failed,
            &self.resurrected,
            &self.reclaimed_objects,
            &self.reclaimed_bytes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.callback_latency.clear();
        self.cycle_duration.clear();
    }
}

impl Default for FinalizerStats {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Serializable statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub cycles: u64,
    pub registered: u64,
    pub unregistered: u64,
    pub enqueued: u64,
    pub executed: u64,
    pub failed: u64,
    pub resurrected: u64,
    pub reclaimed_objects: u64,
    pub reclaimed_bytes: u64,
    pub callback_p50_ns: u64,
    pub callback_p99_ns: u64,
    pub callback_max_ns: u64,
    pub cycle_mean_ns: u64,
    pub cycle_max_ns: u64,
    pub uptime_ms: u64,
}

impl StatsSummary {
    /// Callbacks finished, successfully or not
    pub fn finished(&self) -> u64 {
        self.executed + self.failed
    }

    /// Queued callbacks not finished yet
    pub fn outstanding(&self) -> u64 {
        self.enqueued.saturating_sub(self.finished())
    }
}
