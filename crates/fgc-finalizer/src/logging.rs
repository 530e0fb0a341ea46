//! Finalizer Logging and Event Tracing
//!
//! Every diagnostic goes through the `log` facade. On top of that each
//! runtime owns an [`EventLog`]: a bounded, timestamped record of finalizer
//! events that tests and tooling can inspect after the fact.
//!
//! Log Levels:
//! - ERROR: finalizer failures
//! - WARN: unusual conditions
//! - INFO: collection cycles
//! - DEBUG: registration, queueing, runner wakeups
//! - TRACE: per-object confirmation results

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Log level for finalizer events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// Finalizer event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FinEvent {
    /// Collection cycle started
    CycleStart { cycle: u64, reason: String },

    /// Collection cycle completed
    CycleEnd {
        cycle: u64,
        duration_ms: f64,
        enqueued: usize,
        reclaimed: usize,
    },

    /// Finalizer associated with an object
    Registered { address: usize, form: String },

    /// Finalizer removed before it fired
    Unregistered { address: usize },

    /// Object became eligible and was queued
    Enqueued { address: usize, cycle: u64 },

    /// Callback returned normally
    FinalizerRan { address: usize, duration_us: u64 },

    /// Callback panicked, returned an error, or could not be marshalled
    FinalizerFailed { address: usize, message: String },

    /// Finalized object was reachable again on the confirmation cycle
    Resurrected { address: usize, cycle: u64 },

    /// Runner parked on an empty queue
    RunnerAsleep,

    /// Runner woke up with work
    RunnerWoke { queued: usize },
}

impl FinEvent {
    /// Get log level for event
    pub fn level(&self) -> LogLevel {
        match self {
            FinEvent::FinalizerFailed { .. } => LogLevel::Error,
            FinEvent::CycleStart { .. } | FinEvent::CycleEnd { .. } => LogLevel::Info,
            FinEvent::Registered { .. }
            | FinEvent::Unregistered { .. }
            | FinEvent::Enqueued { .. }
            | FinEvent::FinalizerRan { .. }
            | FinEvent::RunnerAsleep
            | FinEvent::RunnerWoke { .. } => LogLevel::Debug,
            FinEvent::Resurrected { .. } => LogLevel::Trace,
        }
    }

    /// Human-readable rendering
    pub fn describe(&self) -> String {
        match self {
            FinEvent::CycleStart { cycle, reason } => {
                format!("Cycle {} started (reason: {})", cycle, reason)
            },
            FinEvent::CycleEnd {
                cycle,
                duration_ms,
                enqueued,
                reclaimed,
            } => format!(
                "Cycle {} completed ({:.2}ms, {} queued, {} reclaimed)",
                cycle, duration_ms, enqueued, reclaimed
            ),
            FinEvent::Registered { address, form } => {
                format!("Registered {} finalizer for {:#x}", form, address)
            },
            FinEvent::Unregistered { address } => {
                format!("Unregistered finalizer for {:#x}", address)
            },
            FinEvent::Enqueued { address, cycle } => {
                format!("Queued {:#x} in cycle {}", address, cycle)
            },
            FinEvent::FinalizerRan {
                address,
                duration_us,
            } => format!("Finalizer for {:#x} ran in {} us", address, duration_us),
            FinEvent::FinalizerFailed { address, message } => {
                format!("Finalizer for {:#x} failed: {}", address, message)
            },
            FinEvent::Resurrected { address, cycle } => {
                format!("Object {:#x} resurrected (cycle {})", address, cycle)
            },
            FinEvent::RunnerAsleep => "Runner asleep".to_string(),
            FinEvent::RunnerWoke { queued } => format!("Runner woke ({} queued)", queued),
        }
    }
}

/// A recorded event with its wall-clock timestamp
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub timestamp: chrono::DateTime<chrono::Local>,
    pub event: FinEvent,
}

/// Event log configuration
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    /// Minimum level recorded
    pub level: LogLevel,

    /// Maximum retained events
    pub capacity: usize,

    /// Forward events to `log` as JSON instead of text
    pub json: bool,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            capacity: 1024,
            json: false,
        }
    }
}

impl From<&crate::config::FinalizerConfig> for EventLogConfig {
    fn from(config: &crate::config::FinalizerConfig) -> Self {
        let level = if config.verbose {
            config.event_level.max(LogLevel::Debug)
        } else {
            config.event_level
        };
        Self {
            level,
            capacity: config.event_capacity,
            json: config.json_events,
        }
    }
}

/// EventLog - bounded record of finalizer events
pub struct EventLog {
    config: EventLogConfig,
    events: Mutex<VecDeque<EventRecord>>,
    enabled: AtomicBool,
}

impl EventLog {
    /// Create new event log
    ///
    /// A capacity of zero is raised to one.
    pub fn new(mut config: EventLogConfig) -> Self {
        config.capacity = config.capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(config.capacity.min(4096))),
            config,
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable recording
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable recording
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if recording is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record an event and forward it to `log`
    pub fn log(&self, event: FinEvent) {
        let level = event.level();
        self.forward(&event, level);

        if !self.is_enabled() || level > self.config.level {
            return;
        }

        let mut events = self.events.lock();
        while events.len() >= self.config.capacity {
            events.pop_front();
        }
        events.push_back(EventRecord {
            timestamp: chrono::Local::now(),
            event,
        });
    }

    fn forward(&self, event: &FinEvent, level: LogLevel) {
        let level: log::Level = level.into();
        if !log::log_enabled!(level) {
            return;
        }

        if self.config.json {
            match serde_json::to_string(event) {
                Ok(json) => log::log!(level, "{}", json),
                Err(e) => log::warn!("[FIN] Failed to serialize event: {}", e),
            }
        } else {
            log::log!(level, "[FIN] {}", event.describe());
        }
    }

    /// Snapshot of all retained events
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().iter().cloned().collect()
    }

    /// Count retained events matching a predicate
    pub fn count_matching(&self, predicate: impl Fn(&FinEvent) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|record| predicate(&record.event))
            .count()
    }

    /// Clear all events
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(EventLogConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_start(cycle: u64) -> FinEvent {
        FinEvent::CycleStart {
            cycle,
            reason: "Explicit".to_string(),
        }
    }

    #[test]
    fn test_event_log_basic() {
        let log = EventLog::default();
        log.log(cycle_start(1));
        assert_eq!(log.event_count(), 1);
    }

    #[test]
    fn test_event_log_disable() {
        let log = EventLog::default();
        log.disable();
        log.log(cycle_start(1));
        assert_eq!(log.event_count(), 0);
    }

    #[test]
    fn test_level_filter() {
        let log = EventLog::default();
        log.log(FinEvent::RunnerAsleep);
        assert_eq!(log.event_count(), 0);

        let verbose = EventLog::new(EventLogConfig {
            level: LogLevel::Trace,
            ..Default::default()
        });
        verbose.log(FinEvent::RunnerAsleep);
        assert_eq!(verbose.event_count(), 1);
    }

    #[test]
    fn test_zero_capacity_stays_bounded() {
        let log = EventLog::new(EventLogConfig {
            capacity: 0,
            ..Default::default()
        });
        for cycle in 0..50 {
            log.log(cycle_start(cycle));
        }
        assert_eq!(log.event_count(), 1);
        assert!(matches!(
            log.events()[0].event,
            FinEvent::CycleStart { cycle: 49, .. }
        ));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = EventLog::new(EventLogConfig {
            capacity: 2,
            ..Default::default()
        });
        log.log(cycle_start(1));
        log.log(cycle_start(2));
        log.log(cycle_start(3));

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, cycle_start(2));
        assert_eq!(events[1].event, cycle_start(3));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(FinEvent::Enqueued {
            address: 16,
            cycle: 3,
        })
        .unwrap();
        assert_eq!(json["type"], "enqueued");
        assert_eq!(json["address"], 16);
        assert_eq!(json["cycle"], 3);
    }
}
