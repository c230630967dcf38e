use async_trait::async_trait;

use crate::errors::BotResult;
use crate::perception::capture::Capture;

/// The controlled device. Every call may fail with `BotError::DeviceUnavailable`.
#[async_trait]
pub trait Device: Send + Sync {
    async fn capture(&self) -> BotResult<Capture>;

    async fn tap(&self, x: i32, y: i32) -> BotResult<()>;

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> BotResult<()>;

    /// Android key code, e.g. 3 = HOME, 4 = BACK, 61 = TAB.
    async fn send_key_event(&self, code: u32) -> BotResult<()>;

    /// Physical screen size `(width, height)` in pixels.
    async fn screen_size(&self) -> BotResult<(u32, u32)>;

    /// Force-stop an application package.
    async fn stop_app(&self, package: &str) -> BotResult<()>;
}
