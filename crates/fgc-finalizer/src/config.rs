//! Configuration Module - Finalizer Tuning Parameters
//!
//! Manages all configuration parameters for the finalizer subsystem and the
//! host collector it is attached to.

use crate::logging::LogLevel;
use std::time::Duration;

/// Main configuration for the finalizer runtime
///
/// Most parameters have sensible defaults.
///
/// # Examples
///
/// ```rust
/// use fgc_finalizer::FinalizerConfig;
///
/// // Use default configuration
/// let config = FinalizerConfig::default();
///
/// // Collect every 1000 allocations and name the runner thread
/// let config = FinalizerConfig {
///     gc_trigger_allocations: 1000,
///     runner_thread_name: "app-finalizer".to_string(),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct FinalizerConfig {
    /// Name of the dedicated finalizer thread
    ///
    /// Default: "finalizer"
    pub runner_thread_name: String,

    /// Stack size of the finalizer thread in bytes
    ///
    /// If None, the platform default is used.
    /// Default: None
    pub runner_stack_size: Option<usize>,

    /// Cycles a tracked object may stay unmarked without being queued
    ///
    /// Exceeding this is a fatal invariant violation: the object's memory
    /// would never be reclaimed.
    /// Default: 2
    pub max_detection_cycles: u32,

    /// Allocations between automatic collection cycles
    ///
    /// If 0, cycles run only on explicit request.
    /// Default: 0
    pub gc_trigger_allocations: usize,

    /// Poll interval for `wait_for_runner_asleep` and friends
    ///
    /// Default: 20ms
    pub poll_interval_ms: u64,

    /// Poll attempts before `wait_for_runner_asleep` gives up
    ///
    /// Default: 100 (2 seconds with the default interval)
    pub poll_attempts: u32,

    /// Maximum number of events retained by the event log
    ///
    /// Oldest events are dropped first.
    /// Default: 1024
    pub event_capacity: usize,

    /// Minimum level recorded by the event log
    ///
    /// Default: Info
    pub event_level: LogLevel,

    /// Render events as JSON when forwarding them to `log`
    ///
    /// Default: false
    pub json_events: bool,

    /// Enable verbose cycle logging
    ///
    /// Default: false
    pub verbose: bool,

    /// Enable statistics collection
    ///
    /// Default: true
    pub stats_enabled: bool,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        FinalizerConfig {
            // Runner
            runner_thread_name: "finalizer".to_string(),
            runner_stack_size: None,

            // Classifier
            max_detection_cycles: 2,

            // Collector
            gc_trigger_allocations: 0,

            // Polling
            poll_interval_ms: 20,
            poll_attempts: 100,

            // Events
            event_capacity: 1024,
            event_level: LogLevel::Info,
            json_events: false,

            // Debug
            verbose: false,
            stats_enabled: true,
        }
    }
}

impl FinalizerConfig {
    /// Validate configuration
    ///
    /// Checks if all values are in valid ranges.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fgc_finalizer::FinalizerConfig;
    ///
    /// let config = FinalizerConfig {
    ///     max_detection_cycles: 0,  // Invalid!
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner_thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidRunner(
                "runner_thread_name must not be empty".to_string(),
            ));
        }

        if self.runner_thread_name.contains('\0') {
            return Err(ConfigError::InvalidRunner(
                "runner_thread_name must not contain NUL bytes".to_string(),
            ));
        }

        if let Some(stack) = self.runner_stack_size {
            if stack < MIN_STACK_SIZE {
                return Err(ConfigError::InvalidRunner(format!(
                    "runner_stack_size must be at least {} bytes",
                    MIN_STACK_SIZE
                )));
            }
        }

        if self.max_detection_cycles == 0 {
            return Err(ConfigError::InvalidDetectionBound(
                "max_detection_cycles must be > 0".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPolling(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.poll_attempts == 0 {
            return Err(ConfigError::InvalidPolling(
                "poll_attempts must be > 0".to_string(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidEventCapacity(
                "event_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - FIN_RUNNER_NAME
    /// - FIN_MAX_DETECTION_CYCLES
    /// - FIN_GC_TRIGGER
    /// - FIN_POLL_INTERVAL_MS
    /// - FIN_JSON_EVENTS
    /// - FIN_VERBOSE
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FIN_RUNNER_NAME") {
            if !val.trim().is_empty() {
                config.runner_thread_name = val;
            }
        }

        if let Ok(val) = std::env::var("FIN_MAX_DETECTION_CYCLES") {
            if let Ok(cycles) = val.parse::<u32>() {
                config.max_detection_cycles = cycles;
            }
        }

        if let Ok(val) = std::env::var("FIN_GC_TRIGGER") {
            if let Ok(count) = val.parse::<usize>() {
                config.gc_trigger_allocations = count;
            }
        }

        if let Ok(val) = std::env::var("FIN_POLL_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.poll_interval_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("FIN_JSON_EVENTS") {
            config.json_events = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("FIN_VERBOSE") {
            config.verbose = parse_flag(&val);
        }

        config
    }

    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total time budget of one polling wait
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval() * self.poll_attempts
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid runner settings: {0}")]
    InvalidRunner(String),

    #[error("Invalid detection bound: {0}")]
    InvalidDetectionBound(String),

    #[error("Invalid polling settings: {0}")]
    InvalidPolling(String),

    #[error("Invalid event capacity: {0}")]
    InvalidEventCapacity(String),
}

const MIN_STACK_SIZE: usize = 16 * 1024;

fn parse_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}
