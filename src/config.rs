use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{BotError, BotResult};
use crate::executor::retry::BackoffKind;
use crate::perception::template::MatchSettings;
use crate::states::StateSpec;

const CONFIG_ENV: &str = "SCREENLOOP_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    /// State manifest, registered in this order.
    #[serde(default)]
    pub states: Vec<StateSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_adb_path")]
    pub adb_path: String,
    /// `adb -s <serial>`; omit when only one device is attached.
    #[serde(default)]
    pub serial: Option<String>,
    /// Package used by `stop_app` actions that do not name one.
    #[serde(default)]
    pub app_package: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            serial: None,
            app_package: None,
        }
    }
}

fn default_adb_path() -> String {
    "adb".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: String,
    /// Tesseract page segmentation mode.
    #[serde(default = "default_psm")]
    pub psm: u8,
    #[serde(default)]
    pub language: Option<String>,
    /// Skip the startup warmup call (e.g. when no state uses text patterns).
    #[serde(default = "default_true")]
    pub warmup: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: default_tesseract_path(),
            psm: default_psm(),
            language: None,
            warmup: true,
        }
    }
}

fn default_tesseract_path() -> String {
    "tesseract".into()
}

fn default_psm() -> u8 {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_scales")]
    pub scales: Vec<f32>,
    #[serde(default = "default_coarse_factor")]
    pub max_coarse_factor: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            scales: default_scales(),
            max_coarse_factor: default_coarse_factor(),
        }
    }
}

impl From<&MatchingConfig> for MatchSettings {
    fn from(cfg: &MatchingConfig) -> Self {
        Self {
            scales: cfg.scales.clone(),
            max_coarse_factor: cfg.max_coarse_factor,
        }
    }
}

fn default_scales() -> Vec<f32> {
    vec![1.0]
}

fn default_coarse_factor() -> u32 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Stop after this many cycles; run until interrupted when absent.
    #[serde(default)]
    pub max_iterations: Option<u64>,
    /// Consecutive failed cycles before the loop gives up. 0 never gives up.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_iterations: None,
            max_consecutive_failures: default_max_failures(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_failures() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per action, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> BackoffKind {
    BackoffKind::Fixed
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_factor() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_screenshots_dir")]
    pub screenshots_dir: PathBuf,
    #[serde(default = "default_unknown_dir")]
    pub unknown_states_dir: PathBuf,
    /// Keep a labeled copy of every matched capture.
    #[serde(default = "default_true")]
    pub save_matched: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            screenshots_dir: default_screenshots_dir(),
            unknown_states_dir: default_unknown_dir(),
            save_matched: true,
        }
    }
}

fn default_screenshots_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

fn default_unknown_dir() -> PathBuf {
    PathBuf::from("unknown_states")
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn from_toml(content: &str) -> BotResult<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BotResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(BotError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.factor < 1.0 {
            return Err(BotError::Config("retry.factor must be >= 1.0".into()));
        }
        if self.matching.scales.is_empty() {
            return Err(BotError::Config("matching.scales must not be empty".into()));
        }
        if let Some(bad) = self.matching.scales.iter().find(|s| s.is_nan() || **s <= 0.0) {
            return Err(BotError::Config(format!("matching.scales contains non-positive scale {bad}")));
        }
        if self.matching.max_coarse_factor == 0 {
            return Err(BotError::Config("matching.max_coarse_factor must be at least 1".into()));
        }
        for state in &self.states {
            state.validate()?;
        }
        Ok(())
    }
}

fn resolve_config_path() -> BotResult<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(explicit);
        if path.exists() {
            tracing::debug!(path = %path.display(), "config from environment");
            return Ok(path);
        }
        return Err(BotError::Config(format!("{CONFIG_ENV} points at missing file {}", path.display())));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("screenloop").join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config directory");
            return Ok(candidate);
        }
    }

    Err(BotError::Config(
        "config.toml not found via SCREENLOOP_CONFIG, next to executable, in working directory or user config directory".into(),
    ))
}

/// Load and validate the configuration. Returns the file it came from as well.
pub fn load_config() -> BotResult<(AppConfig, PathBuf)> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = AppConfig::from_toml(&content)?;
    tracing::info!(path = %path.display(), states = config.states.len(), "config loaded");
    Ok((config, path))
}
