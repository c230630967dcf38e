// Text-recognition collaborator and capture preprocessing for text queries.
use std::process::Stdio;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::errors::{BotError, BotResult};
use crate::perception::types::OcrOptions;

/// Turns an image into recognized text. Output may be noisy; callers tolerate misses.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &DynamicImage) -> BotResult<String>;

    /// One-time model load so the first detection cycle is not penalized.
    async fn warmup(&self) -> BotResult<()> {
        Ok(())
    }
}

/// Runs the `tesseract` binary, feeding a PNG on stdin and reading text from stdout.
pub struct TesseractCli {
    binary: String,
    psm: u8,
    language: Option<String>,
}

impl TesseractCli {
    pub fn new(binary: impl Into<String>, psm: u8, language: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            psm,
            language,
        }
    }

    pub fn from_config(cfg: &OcrConfig) -> Self {
        Self::new(cfg.tesseract_path.clone(), cfg.psm, cfg.language.clone())
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            self.psm.to_string(),
        ];
        if let Some(lang) = &self.language {
            args.push("-l".into());
            args.push(lang.clone());
        }
        args
    }
}

#[async_trait]
impl TextRecognizer for TesseractCli {
    async fn recognize(&self, image: &DynamicImage) -> BotResult<String> {
        let mut png = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| BotError::Ocr(format!("PNG encode: {e}")))?;

        let mut child = Command::new(&self.binary)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BotError::Ocr(format!("spawn {}: {e}", self.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&png).await?;
            // Dropping stdin closes the pipe so tesseract sees EOF.
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BotError::Ocr(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn warmup(&self) -> BotResult<()> {
        let started = std::time::Instant::now();
        let blank = DynamicImage::new_luma8(64, 32);
        self.recognize(&blank).await?;
        tracing::info!(binary = %self.binary, elapsed = ?started.elapsed(), "OCR warmup complete");
        Ok(())
    }
}

// ── Preprocessing ─────────────────────────────────────────────────────────────

/// Gaussian sigma matching an 11-pixel neighbourhood.
const ADAPTIVE_SIGMA: f32 = 2.0;
/// Subtracted from the local mean before comparing.
const ADAPTIVE_OFFSET: i16 = 2;

/// Crop, grayscale, optionally binarize and invert a capture for recognition.
pub fn prepare(image: &DynamicImage, opts: &OcrOptions) -> DynamicImage {
    let cropped = match &opts.region {
        Some(region) => region.crop(image),
        None => image.clone(),
    };
    let mut gray = cropped.to_luma8();

    if opts.adaptive {
        adaptive_threshold(&mut gray);
    } else if let Some(cut) = opts.binarize {
        let cut = if cut == 0 { otsu_threshold(&gray) } else { cut };
        binarize(&mut gray, cut);
    }
    if opts.invert {
        image::imageops::invert(&mut gray);
    }
    DynamicImage::ImageLuma8(gray)
}

fn binarize(gray: &mut GrayImage, cut: u8) {
    for p in gray.pixels_mut() {
        *p = Luma([if p.0[0] > cut { 255 } else { 0 }]);
    }
}

/// White where a pixel is brighter than its blurred neighbourhood minus a
/// small offset. Copes with gradients and uneven lighting behind text.
fn adaptive_threshold(gray: &mut GrayImage) {
    if gray.width() == 0 || gray.height() == 0 {
        return;
    }
    let local = image::imageops::blur(&*gray, ADAPTIVE_SIGMA);
    for (p, m) in gray.pixels_mut().zip(local.pixels()) {
        let cut = m.0[0] as i16 - ADAPTIVE_OFFSET;
        *p = Luma([if p.0[0] as i16 > cut { 255 } else { 0 }]);
    }
}

/// Otsu's method: the cut-off maximizing between-class variance.
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut hist = [0u64; 256];
    for p in gray.pixels() {
        hist[p.0[0] as usize] += 1;
    }
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 127;
    }
    let weighted_total: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut best = (0.0f64, 127u8);
    let mut w_bg = 0u64;
    let mut sum_bg = 0.0f64;
    for (t, &count) in hist.iter().enumerate() {
        w_bg += count;
        if w_bg == 0 {
            continue;
        }
        let w_fg = total - w_bg;
        if w_fg == 0 {
            break;
        }
        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / w_bg as f64;
        let mean_fg = (weighted_total - sum_bg) / w_fg as f64;
        let between = w_bg as f64 * w_fg as f64 * (mean_bg - mean_fg).powi(2);
        if between > best.0 {
            best = (between, t as u8);
        }
    }
    best.1
}
