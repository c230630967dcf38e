pub mod diagnostics;
pub mod engine;
pub mod loop_control;
pub mod state;

pub use engine::BotEngine;
pub use state::{CycleOutcome, LoopConfig, RunSummary, StopReason};
