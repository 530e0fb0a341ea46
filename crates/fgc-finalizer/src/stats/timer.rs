//! Cycle Timer - Per-Phase Stopwatch
//!
//! A collection cycle charges its wall time to the phase that spent it,
//! so a slow cycle can be attributed to marking, classification, sweeping
//! or publishing without a profiler.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Phase of a collection cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Mark,
    Classify,
    Sweep,
    Publish,
}

/// Wall time spent in each cycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimes {
    pub mark: Duration,
    pub classify: Duration,
    pub sweep: Duration,
    pub publish: Duration,
}

impl PhaseTimes {
    /// Sum over all phases
    pub fn total(&self) -> Duration {
        self.mark + self.classify + self.sweep + self.publish
    }

    fn slot(&mut self, phase: CyclePhase) -> &mut Duration {
        match phase {
            CyclePhase::Mark => &mut self.mark,
            CyclePhase::Classify => &mut self.classify,
            CyclePhase::Sweep => &mut self.sweep,
            CyclePhase::Publish => &mut self.publish,
        }
    }
}

impl fmt::Display for PhaseTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mark {:?}, classify {:?}, sweep {:?}, publish {:?}",
            self.mark, self.classify, self.sweep, self.publish
        )
    }
}

/// CycleTimer - stopwatch charging laps to cycle phases
pub struct CycleTimer {
    start: Instant,
    lap: Instant,
    phases: PhaseTimes,
}

impl CycleTimer {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            lap: now,
            phases: PhaseTimes::default(),
        }
    }

    /// Charge the time since the previous lap to `phase`
    pub fn lap(&mut self, phase: CyclePhase) {
        let now = Instant::now();
        *self.phases.slot(phase) += now - self.lap;
        self.lap = now;
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn phases(&self) -> PhaseTimes {
        self.phases
    }
}
