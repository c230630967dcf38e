use std::sync::Arc;

use image::{DynamicImage, GrayImage};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{BotError, BotResult};

pub const DEFAULT_THRESHOLD: f32 = 0.8;

/// One detectable signature of a screen. Any matching pattern qualifies its state.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Human-readable origin (template path or query text), used in logs and diagnostics.
    pub label: String,
    pub kind: PatternKind,
    /// A score `>=` this value counts as a match.
    pub threshold: f32,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    VisualTemplate(Arc<GrayImage>),
    TextQuery(TextQuery),
    SolidColor(SolidColor),
}

impl Pattern {
    pub fn template(label: impl Into<String>, image: GrayImage, threshold: f32) -> Self {
        Self {
            label: label.into(),
            kind: PatternKind::VisualTemplate(Arc::new(image)),
            threshold,
        }
    }

    pub fn text(query: TextQuery, threshold: f32) -> Self {
        Self {
            label: query.describe(),
            kind: PatternKind::TextQuery(query),
            threshold,
        }
    }

    pub fn solid(color: SolidColor, threshold: f32) -> Self {
        Self {
            label: color.describe(),
            kind: PatternKind::SolidColor(color),
            threshold,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            PatternKind::VisualTemplate(_) => "template",
            PatternKind::TextQuery(_) => "text",
            PatternKind::SolidColor(_) => "solid_color",
        }
    }
}

// ── Solid screens ─────────────────────────────────────────────────────────────

pub const DEFAULT_SHADE_TOLERANCE: f32 = 30.0;
pub const DEFAULT_MAX_STD_DEV: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shade {
    Black,
    White,
}

/// A frame that is (almost) uniformly black or white, as shown while loading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolidColor {
    pub shade: Shade,
    /// Allowed distance of the mean gray level from 0 (black) or 255 (white).
    pub tolerance: f32,
    /// Frames with more spread than this are not uniform.
    pub max_std_dev: f32,
}

impl SolidColor {
    pub fn new(shade: Shade) -> Self {
        Self {
            shade,
            tolerance: DEFAULT_SHADE_TOLERANCE,
            max_std_dev: DEFAULT_MAX_STD_DEV,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn is_present(&self, gray: &GrayImage) -> bool {
        let n = gray.as_raw().len();
        if n == 0 {
            return false;
        }
        let (sum, sum_sq) = gray.as_raw().iter().fold((0.0f64, 0.0f64), |(s, q), &p| {
            let v = p as f64;
            (s + v, q + v * v)
        });
        let mean = sum / n as f64;
        let std_dev = (sum_sq / n as f64 - mean * mean).max(0.0).sqrt();
        if std_dev > self.max_std_dev as f64 {
            return false;
        }
        let tol = self.tolerance as f64;
        match self.shade {
            Shade::White => mean >= 255.0 - tol,
            Shade::Black => mean <= tol,
        }
    }

    pub fn describe(&self) -> String {
        match self.shade {
            Shade::Black => "solid:black".to_string(),
            Shade::White => "solid:white".to_string(),
        }
    }
}

// ── Text queries ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Needle {
    /// Stored lowercased; compared against lowercased recognized text.
    Substring(String),
    Regex(Regex),
}

/// Text that must appear in the recognized text of a capture (or a region of it).
#[derive(Debug, Clone)]
pub struct TextQuery {
    needle: Needle,
    pub ocr: OcrOptions,
}

impl TextQuery {
    /// Case-insensitive substring query.
    pub fn contains(text: &str) -> Self {
        Self {
            needle: Needle::Substring(text.to_lowercase()),
            ocr: OcrOptions::default(),
        }
    }

    /// Regex query; compiled once here so a bad expression fails at registration.
    pub fn regex(expr: &str) -> BotResult<Self> {
        let re = Regex::new(expr)?;
        Ok(Self {
            needle: Needle::Regex(re),
            ocr: OcrOptions::default(),
        })
    }

    pub fn with_ocr(mut self, ocr: OcrOptions) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn is_found_in(&self, recognized: &str) -> bool {
        match &self.needle {
            Needle::Substring(s) => recognized.to_lowercase().contains(s.as_str()),
            Needle::Regex(re) => re.is_match(recognized),
        }
    }

    pub fn describe(&self) -> String {
        match &self.needle {
            Needle::Substring(s) => format!("text:{s}"),
            Needle::Regex(re) => format!("regex:{}", re.as_str()),
        }
    }
}

/// Preprocessing applied to the capture before it is handed to the recognizer.
#[derive(Debug, Clone, Default)]
pub struct OcrOptions {
    pub region: Option<Region>,
    /// Binarization cut-off; `Some(0)` selects Otsu's method.
    pub binarize: Option<u8>,
    /// Threshold each pixel against its Gaussian-weighted neighbourhood.
    /// Takes precedence over `binarize`.
    pub adaptive: bool,
    pub invert: bool,
}

/// Rectangle expressed as fractions (0.0–1.0) of the frame size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    pub fn validate(&self) -> BotResult<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(self.x) && in_unit(self.y) && in_unit(self.width) && in_unit(self.height)) {
            return Err(BotError::Config(format!("region {self:?} has values outside 0..1")));
        }
        if self.width <= 0.0 || self.height <= 0.0 || self.x + self.width > 1.0 + f32::EPSILON
            || self.y + self.height > 1.0 + f32::EPSILON
        {
            return Err(BotError::Config(format!("region {self:?} is empty or exceeds the frame")));
        }
        Ok(())
    }

    /// Pixel rectangle `(x, y, w, h)` for a frame of the given size, never empty.
    pub fn to_pixels(&self, frame_w: u32, frame_h: u32) -> (u32, u32, u32, u32) {
        let x = ((self.x * frame_w as f32) as u32).min(frame_w.saturating_sub(1));
        let y = ((self.y * frame_h as f32) as u32).min(frame_h.saturating_sub(1));
        let w = ((self.width * frame_w as f32) as u32).clamp(1, frame_w - x);
        let h = ((self.height * frame_h as f32) as u32).clamp(1, frame_h - y);
        (x, y, w, h)
    }

    pub fn crop(&self, img: &DynamicImage) -> DynamicImage {
        if img.width() == 0 || img.height() == 0 {
            return img.clone();
        }
        let (x, y, w, h) = self.to_pixels(img.width(), img.height());
        img.crop_imm(x, y, w, h)
    }
}
