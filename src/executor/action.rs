use async_trait::async_trait;

use crate::device::Device;
use crate::errors::BotResult;
use crate::perception::capture::Capture;
use crate::perception::template::MatchSettings;

/// Everything an action may touch during one dispatch.
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub device: &'a dyn Device,
    /// The capture the state was detected on.
    pub capture: &'a Capture,
    pub state: &'a str,
    pub iteration: u64,
    /// 1-based attempt number of the current action, set by the executor.
    pub attempt: u32,
    pub match_settings: &'a MatchSettings,
}

/// A named step run when its state is detected.
///
/// `Ok(false)` and `Err(_)` are both failed attempts. Side effects on the
/// device cannot be undone, so implementations should be safe to repeat.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &ActionContext<'_>) -> BotResult<bool>;
}
