// Test doubles shared by unit tests across the crate.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};

use crate::device::Device;
use crate::errors::{BotError, BotResult};
use crate::executor::action::{Action, ActionContext};
use crate::perception::capture::Capture;
use crate::perception::matcher::PatternMatcher;
use crate::perception::ocr::TextRecognizer;
use crate::perception::template::MatchSettings;
use crate::perception::types::Pattern;

// ── Frames ────────────────────────────────────────────────────────────────────

pub fn blank_capture() -> Capture {
    Capture::new(DynamicImage::new_rgb8(64, 48))
}

/// Blocky pseudo-random texture so template crops have a unique best match.
pub fn textured_frame(w: u32, h: u32) -> DynamicImage {
    let gray = GrayImage::from_fn(w, h, |x, y| {
        let (cx, cy) = (x / 8, y / 8);
        Luma([((cx * 73 + cy * 151 + cx * cy * 29) % 241) as u8])
    });
    DynamicImage::ImageLuma8(gray).to_rgb8().into()
}

pub fn template_pattern(label: &str, threshold: f32) -> Pattern {
    Pattern::template(label, GrayImage::new(4, 4), threshold)
}

fn settings() -> &'static MatchSettings {
    static SETTINGS: OnceLock<MatchSettings> = OnceLock::new();
    SETTINGS.get_or_init(MatchSettings::default)
}

pub fn context<'a>(device: &'a ScriptedDevice, capture: &'a Capture) -> ActionContext<'a> {
    ActionContext {
        device,
        capture,
        state: "test",
        iteration: 1,
        attempt: 1,
        match_settings: settings(),
    }
}

// ── Matcher ───────────────────────────────────────────────────────────────────

/// Returns preset scores by pattern label and records the evaluation order.
/// Unlisted labels score 0.
#[derive(Default)]
pub struct ScriptedMatcher {
    scores: HashMap<String, Option<f32>>,
    scored: Mutex<Vec<String>>,
}

impl ScriptedMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(mut self, label: &str, value: f32) -> Self {
        self.scores.insert(label.to_string(), Some(value));
        self
    }

    pub fn fail(mut self, label: &str) -> Self {
        self.scores.insert(label.to_string(), None);
        self
    }

    pub fn scored(&self) -> Vec<String> {
        self.scored.lock().unwrap().clone()
    }
}

#[async_trait]
impl PatternMatcher for ScriptedMatcher {
    async fn score(&self, _capture: &Capture, pattern: &Pattern) -> BotResult<f32> {
        self.scored.lock().unwrap().push(pattern.label.clone());
        match self.scores.get(&pattern.label) {
            Some(Some(v)) => Ok(*v),
            Some(None) => Err(BotError::Perception(format!("scripted failure for {}", pattern.label))),
            None => Ok(0.0),
        }
    }
}

// ── Recognizer ────────────────────────────────────────────────────────────────

pub struct FixedRecognizer {
    text: Option<String>,
    warmups: AtomicU32,
}

impl FixedRecognizer {
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            warmups: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: None,
            warmups: AtomicU32::new(0),
        }
    }

    pub fn warmups(&self) -> u32 {
        self.warmups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextRecognizer for FixedRecognizer {
    async fn recognize(&self, _image: &DynamicImage) -> BotResult<String> {
        self.text
            .clone()
            .ok_or_else(|| BotError::Ocr("scripted recognizer failure".into()))
    }

    async fn warmup(&self) -> BotResult<()> {
        self.warmups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Tap(i32, i32),
    Swipe(i32, i32, i32, i32),
    Key(u32),
    StopApp(String),
}

/// Records input calls; captures follow an optional online/offline script.
pub struct ScriptedDevice {
    frame: DynamicImage,
    size: (u32, u32),
    online: bool,
    capture_script: Mutex<VecDeque<bool>>,
    captures: AtomicU32,
    calls: Mutex<Vec<DeviceCall>>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self {
            frame: DynamicImage::new_rgb8(64, 48),
            size: (1600, 900),
            online: true,
            capture_script: Mutex::new(VecDeque::new()),
            captures: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Frame returned by `capture`.
    pub fn with_frame(mut self, frame: DynamicImage) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_screen_size(mut self, w: u32, h: u32) -> Self {
        self.size = (w, h);
        self
    }

    /// Every call fails with `DeviceUnavailable`.
    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    /// Per-capture availability; once exhausted, falls back to the online flag.
    pub fn with_capture_script(self, script: &[bool]) -> Self {
        *self.capture_script.lock().unwrap() = script.iter().copied().collect();
        self
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn captures(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> BotResult<()> {
        if self.online {
            Ok(())
        } else {
            Err(BotError::DeviceUnavailable("scripted device offline".into()))
        }
    }

    fn record(&self, call: DeviceCall) -> BotResult<()> {
        self.check_online()?;
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl Device for ScriptedDevice {
    async fn capture(&self) -> BotResult<Capture> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let scripted = self.capture_script.lock().unwrap().pop_front();
        match scripted {
            Some(true) => Ok(Capture::new(self.frame.clone())),
            Some(false) => Err(BotError::DeviceUnavailable("scripted capture failure".into())),
            None => self.check_online().map(|_| Capture::new(self.frame.clone())),
        }
    }

    async fn tap(&self, x: i32, y: i32) -> BotResult<()> {
        self.record(DeviceCall::Tap(x, y))
    }

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, _duration_ms: u32) -> BotResult<()> {
        self.record(DeviceCall::Swipe(x1, y1, x2, y2))
    }

    async fn send_key_event(&self, code: u32) -> BotResult<()> {
        self.record(DeviceCall::Key(code))
    }

    async fn screen_size(&self) -> BotResult<(u32, u32)> {
        self.check_online()?;
        Ok(self.size)
    }

    async fn stop_app(&self, package: &str) -> BotResult<()> {
        self.record(DeviceCall::StopApp(package.to_string()))
    }
}

// ── Actions ───────────────────────────────────────────────────────────────────

/// Returns scripted results in order, repeating the last one; counts calls.
pub struct ScriptedAction {
    name: String,
    script: Vec<bool>,
    error: Option<String>,
    calls: Arc<AtomicU32>,
    attempts_seen: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedAction {
    pub fn new(name: &str, script: &[bool]) -> Self {
        Self {
            name: name.to_string(),
            script: script.to_vec(),
            error: None,
            calls: Arc::new(AtomicU32::new(0)),
            attempts_seen: Arc::default(),
        }
    }

    pub fn erroring(msg: &str) -> Self {
        Self {
            name: "erroring".to_string(),
            script: Vec::new(),
            error: Some(msg.to_string()),
            calls: Arc::new(AtomicU32::new(0)),
            attempts_seen: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }

    /// `ctx.attempt` of every call, in order.
    pub fn attempts_seen(&self) -> Arc<Mutex<Vec<u32>>> {
        self.attempts_seen.clone()
    }
}

#[async_trait]
impl Action for ScriptedAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> BotResult<bool> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.attempts_seen.lock().unwrap().push(ctx.attempt);
        if let Some(msg) = &self.error {
            return Err(BotError::Action(msg.clone()));
        }
        Ok(self
            .script
            .get(n)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or(true))
    }
}
