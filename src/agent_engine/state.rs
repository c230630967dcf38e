use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::executor::ActionOutcome;

/// What a single capture→detect→act cycle ended with.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CycleOutcome {
    Matched {
        state: String,
        pattern: String,
        confidence: f32,
        outcome: ActionOutcome,
    },
    Unknown {
        /// Best score any pattern reached.
        confidence: f32,
    },
}

impl CycleOutcome {
    pub fn state_name(&self) -> Option<&str> {
        match self {
            CycleOutcome::Matched { state, .. } => Some(state),
            CycleOutcome::Unknown { .. } => None,
        }
    }

    /// The action sequence stopped because the device could not be reached.
    pub fn device_lost(&self) -> bool {
        matches!(self, CycleOutcome::Matched { outcome, .. } if outcome.device_lost())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Interrupted,
    IterationLimit,
}

/// Totals reported when the loop exits cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub iterations: u64,
    pub matched: u64,
    pub unknown: u64,
    /// Matched cycles whose action sequence stopped early.
    pub partial_failures: u64,
    /// Cycles that could not complete (no capture, or the device dropped mid-actions).
    pub failed_cycles: u64,
    pub stop_reason: StopReason,
}

impl RunSummary {
    pub(crate) fn new(run_id: String) -> Self {
        Self {
            run_id,
            iterations: 0,
            matched: 0,
            unknown: 0,
            partial_failures: 0,
            failed_cycles: 0,
            stop_reason: StopReason::Interrupted,
        }
    }

    pub(crate) fn tally(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Matched { outcome, .. } => {
                self.matched += 1;
                if !outcome.is_success() {
                    self.partial_failures += 1;
                }
            }
            CycleOutcome::Unknown { .. } => self.unknown += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub poll_interval: Duration,
    pub max_iterations: Option<u64>,
    /// 0 disables escalation.
    pub max_consecutive_failures: u32,
}

impl From<&RunConfig> for LoopConfig {
    fn from(cfg: &RunConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            max_iterations: cfg.max_iterations,
            max_consecutive_failures: cfg.max_consecutive_failures,
        }
    }
}
