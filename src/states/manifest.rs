// Declarative state definitions read from the `[[states]]` manifest.
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::errors::{BotError, BotResult};
use crate::executor::action::Action;
use crate::executor::actions::{KeyEvent, StopApp, Swipe, Tap, TapCenter, TapTemplate, Wait};
use crate::perception::types::{
    OcrOptions, Pattern, Region, Shade, SolidColor, TextQuery, DEFAULT_MAX_STD_DEV, DEFAULT_SHADE_TOLERANCE,
    DEFAULT_THRESHOLD,
};

const TEMPLATE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
use crate::registry::{StateConstructor, StateDefinition};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub patterns: Vec<PatternSpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternSpec {
    /// Either one image (`path`) or every image in a directory (`dir`).
    Template {
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        dir: Option<PathBuf>,
        #[serde(default = "default_threshold")]
        threshold: f32,
    },
    Text {
        query: String,
        #[serde(default)]
        regex: bool,
        #[serde(default = "default_threshold")]
        threshold: f32,
        /// Only this part of the frame is recognized.
        #[serde(default)]
        region: Option<Region>,
        /// Binarization cut-off; 0 selects Otsu.
        #[serde(default)]
        binarize: Option<u8>,
        /// Local (Gaussian) thresholding; overrides `binarize`.
        #[serde(default)]
        adaptive: bool,
        #[serde(default)]
        invert: bool,
    },
    SolidColor {
        color: Shade,
        #[serde(default = "default_shade_tolerance")]
        tolerance: f32,
        #[serde(default = "default_max_std_dev")]
        max_std_dev: f32,
        #[serde(default = "default_threshold")]
        threshold: f32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    Tap { x: i32, y: i32 },
    TapCenter,
    TapTemplate {
        path: PathBuf,
        #[serde(default = "default_threshold")]
        threshold: f32,
    },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[serde(default = "default_swipe_ms")]
        duration_ms: u32,
    },
    KeyEvent { code: u32 },
    Wait { milliseconds: u64 },
    StopApp {
        #[serde(default)]
        package: Option<String>,
    },
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_swipe_ms() -> u32 {
    500
}

fn default_shade_tolerance() -> f32 {
    DEFAULT_SHADE_TOLERANCE
}

fn default_max_std_dev() -> f32 {
    DEFAULT_MAX_STD_DEV
}

impl StateSpec {
    /// Checks that need no filesystem access; run while the config is parsed.
    pub fn validate(&self) -> BotResult<()> {
        if self.name.trim().is_empty() {
            return Err(BotError::Config("state with empty name".into()));
        }
        for p in &self.patterns {
            let (threshold, region) = match p {
                PatternSpec::Template { path, dir, threshold } => {
                    if path.is_some() == dir.is_some() {
                        return Err(BotError::Config(format!(
                            "state '{}': template pattern needs exactly one of `path` or `dir`",
                            self.name
                        )));
                    }
                    (*threshold, None)
                }
                PatternSpec::Text { threshold, region, .. } => (*threshold, region.as_ref()),
                PatternSpec::SolidColor { tolerance, max_std_dev, threshold, .. } => {
                    if !(0.0..=255.0).contains(tolerance) || *max_std_dev < 0.0 {
                        return Err(BotError::Config(format!(
                            "state '{}': solid_color tolerance {tolerance} / max_std_dev {max_std_dev} out of range",
                            self.name
                        )));
                    }
                    (*threshold, None)
                }
            };
            if !(0.0..=1.0).contains(&threshold) {
                return Err(BotError::Config(format!(
                    "state '{}': threshold {threshold} outside 0..1",
                    self.name
                )));
            }
            if let Some(region) = region {
                region.validate()?;
            }
        }
        for a in &self.actions {
            if let ActionSpec::TapTemplate { threshold, .. } = a {
                if !(0.0..=1.0).contains(threshold) {
                    return Err(BotError::Config(format!(
                        "state '{}': tap_template threshold {threshold} outside 0..1",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Everything a manifest entry needs besides itself.
#[derive(Debug, Clone)]
pub struct ManifestContext {
    /// Relative template paths resolve against this directory.
    pub asset_root: PathBuf,
    /// Used by `stop_app` actions without an explicit package.
    pub default_package: Option<String>,
}

/// One constructor per manifest entry, in manifest order.
pub fn constructors(specs: Vec<StateSpec>, ctx: &ManifestContext) -> Vec<StateConstructor> {
    specs
        .into_iter()
        .map(|spec| {
            let ctx = ctx.clone();
            Box::new(move || build_state(spec, &ctx)) as StateConstructor
        })
        .collect()
}

/// Turn one manifest entry into a state definition, loading its templates from disk.
pub fn build_state(spec: StateSpec, ctx: &ManifestContext) -> BotResult<StateDefinition> {
    spec.validate()?;
    let mut state = StateDefinition::new(spec.name.clone()).with_priority(spec.priority);

    for p in spec.patterns {
        let pattern = match p {
            PatternSpec::Template { dir: Some(dir), threshold, .. } => {
                for path in template_files(&ctx.asset_root, &dir)? {
                    let (label, image) = load_template(&ctx.asset_root, &path)?;
                    state = state.pattern(Pattern::template(label, image, threshold));
                }
                continue;
            }
            PatternSpec::Template { path, threshold, .. } => {
                let path = path.ok_or_else(|| BotError::Config(format!("state '{}': template without path", spec.name)))?;
                let (label, image) = load_template(&ctx.asset_root, &path)?;
                Pattern::template(label, image, threshold)
            }
            PatternSpec::SolidColor { color, tolerance, max_std_dev, threshold } => {
                let solid = SolidColor { shade: color, tolerance, max_std_dev };
                Pattern::solid(solid, threshold)
            }
            PatternSpec::Text { query, regex, threshold, region, binarize, adaptive, invert } => {
                let q = if regex {
                    TextQuery::regex(&query).map_err(|e| {
                        BotError::Config(format!("state '{}': bad regex '{query}': {e}", spec.name))
                    })?
                } else {
                    TextQuery::contains(&query)
                };
                Pattern::text(q.with_ocr(OcrOptions { region, binarize, adaptive, invert }), threshold)
            }
        };
        state = state.pattern(pattern);
    }

    for a in spec.actions {
        state = state.boxed_action(build_action(a, ctx)?);
    }
    Ok(state)
}

fn build_action(spec: ActionSpec, ctx: &ManifestContext) -> BotResult<Box<dyn Action>> {
    Ok(match spec {
        ActionSpec::Tap { x, y } => Box::new(Tap { x, y }),
        ActionSpec::TapCenter => Box::new(TapCenter),
        ActionSpec::TapTemplate { path, threshold } => {
            let (label, image) = load_template(&ctx.asset_root, &path)?;
            Box::new(TapTemplate::new(label, image, threshold))
        }
        ActionSpec::Swipe { x1, y1, x2, y2, duration_ms } => Box::new(Swipe {
            from: (x1, y1),
            to: (x2, y2),
            duration_ms,
        }),
        ActionSpec::KeyEvent { code } => Box::new(KeyEvent { code }),
        ActionSpec::Wait { milliseconds } => Box::new(Wait {
            duration: Duration::from_millis(milliseconds),
        }),
        ActionSpec::StopApp { package } => Box::new(StopApp {
            package: package.or_else(|| ctx.default_package.clone()),
        }),
    })
}

/// Image files directly inside `dir`, sorted by file name. Paths keep the
/// form they were given in so labels stay relative to the asset root.
fn template_files(root: &Path, dir: &Path) -> BotResult<Vec<PathBuf>> {
    let full = if dir.is_absolute() { dir.to_path_buf() } else { root.join(dir) };
    let entries = std::fs::read_dir(&full)
        .map_err(|e| BotError::Config(format!("template directory {}: {e}", full.display())))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let is_image = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEMPLATE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_image {
            names.push(name);
        }
    }
    names.sort();
    if names.is_empty() {
        tracing::warn!(dir = %full.display(), "template directory has no images");
    }
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

fn load_template(root: &Path, path: &Path) -> BotResult<(String, GrayImage)> {
    let full = if path.is_absolute() { path.to_path_buf() } else { root.join(path) };
    let image = image::open(&full)
        .map_err(|e| BotError::Config(format!("template {}: {e}", full.display())))?
        .to_luma8();
    tracing::debug!(path = %full.display(), w = image.width(), h = image.height(), "template loaded");
    Ok((path.display().to_string(), image))
}
