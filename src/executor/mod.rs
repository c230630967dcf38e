pub mod action;
pub mod actions;
pub mod retry;
pub mod runner;

pub use action::{Action, ActionContext};
pub use retry::{Backoff, RetryPolicy};
pub use runner::{ActionExecutor, ActionOutcome, ActionReport, OutcomeStatus};
