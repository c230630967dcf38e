// Built-in actions available to every state.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::GrayImage;

use crate::device::adb::KEYCODE_HOME;
use crate::errors::{BotError, BotResult};
use crate::executor::action::{Action, ActionContext};
use crate::perception::template;

/// Tap a fixed screen coordinate.
pub struct Tap {
    pub x: i32,
    pub y: i32,
}

#[async_trait]
impl Action for Tap {
    fn name(&self) -> &str {
        "tap"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> BotResult<bool> {
        ctx.device.tap(self.x, self.y).await?;
        Ok(true)
    }
}

/// Tap the middle of the physical screen.
pub struct TapCenter;

#[async_trait]
impl Action for TapCenter {
    fn name(&self) -> &str {
        "tap_center"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> BotResult<bool> {
        let (w, h) = ctx.device.screen_size().await?;
        ctx.device.tap((w / 2) as i32, (h / 2) as i32).await?;
        Ok(true)
    }
}

/// Locate a template on screen and tap its centre.
///
/// The first attempt uses the cycle's capture; retries take a fresh one so
/// an element that appears late can still be hit.
pub struct TapTemplate {
    label: String,
    template: Arc<GrayImage>,
    threshold: f32,
}

impl TapTemplate {
    pub fn new(label: impl Into<String>, template: GrayImage, threshold: f32) -> Self {
        Self {
            label: label.into(),
            template: Arc::new(template),
            threshold,
        }
    }
}

#[async_trait]
impl Action for TapTemplate {
    fn name(&self) -> &str {
        "tap_template"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> BotResult<bool> {
        let fresh = if ctx.attempt > 1 {
            Some(ctx.device.capture().await?)
        } else {
            None
        };
        let haystack = fresh.as_ref().unwrap_or(ctx.capture).gray();
        let tpl = self.template.clone();
        let settings = ctx.match_settings.clone();
        let found = tokio::task::spawn_blocking(move || template::locate(&haystack, &tpl, &settings))
            .await
            .map_err(|e| BotError::Action(format!("join: {e}")))??;

        if found.score < self.threshold {
            tracing::info!(template = %self.label, score = found.score, threshold = self.threshold, "template not on screen");
            return Ok(false);
        }
        let (x, y) = found.center();
        ctx.device.tap(x, y).await?;
        tracing::info!(template = %self.label, x, y, score = found.score, "tapped template");
        Ok(true)
    }
}

pub struct Swipe {
    pub from: (i32, i32),
    pub to: (i32, i32),
    pub duration_ms: u32,
}

#[async_trait]
impl Action for Swipe {
    fn name(&self) -> &str {
        "swipe"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> BotResult<bool> {
        ctx.device
            .swipe(self.from.0, self.from.1, self.to.0, self.to.1, self.duration_ms)
            .await?;
        Ok(true)
    }
}

pub struct KeyEvent {
    pub code: u32,
}

#[async_trait]
impl Action for KeyEvent {
    fn name(&self) -> &str {
        "key_event"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> BotResult<bool> {
        ctx.device.send_key_event(self.code).await?;
        Ok(true)
    }
}

/// Pause inside the action list, e.g. to let an animation finish.
pub struct Wait {
    pub duration: Duration,
}

#[async_trait]
impl Action for Wait {
    fn name(&self) -> &str {
        "wait"
    }

    async fn execute(&self, _ctx: &ActionContext<'_>) -> BotResult<bool> {
        tokio::time::sleep(self.duration).await;
        Ok(true)
    }
}

/// Force-stop the app, or send HOME when no package is known.
pub struct StopApp {
    pub package: Option<String>,
}

#[async_trait]
impl Action for StopApp {
    fn name(&self) -> &str {
        "stop_app"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> BotResult<bool> {
        match &self.package {
            Some(pkg) => ctx.device.stop_app(pkg).await?,
            None => ctx.device.send_key_event(KEYCODE_HOME).await?,
        }
        Ok(true)
    }
}
