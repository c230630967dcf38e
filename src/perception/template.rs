//! Visual template correlation.
//!
//! Scores a grayscale template against every placement inside a grayscale
//! capture using zero-mean normalized cross-correlation (the same measure as
//! OpenCV's `TM_CCOEFF_NORMED`), clamped to `[0, 1]`.
//!
//! Window sums come from integral images so only the numerator costs
//! `O(template area)` per placement. Large templates are first searched on a
//! downscaled copy of both images; the best coarse hit is then refined at
//! full resolution, and the reported score is always the full-resolution one.
use image::imageops::FilterType;
use image::GrayImage;

use crate::errors::{BotError, BotResult};

/// Coarse pass keeps at least this many pixels on the template's short side.
const MIN_COARSE_SIDE: u32 = 12;

/// How far the refined score may fall below the coarse one before the
/// coarse result is distrusted.
const COARSE_SLACK: f32 = 0.05;

/// Best placement of a template inside a capture, in capture pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    pub score: f32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TemplateMatch {
    pub fn center(&self) -> (i32, i32) {
        (
            (self.x + self.width / 2) as i32,
            (self.y + self.height / 2) as i32,
        )
    }
}

#[derive(Debug, Clone)]
pub struct MatchSettings {
    /// Template resampling factors tried in order; best score wins.
    pub scales: Vec<f32>,
    /// Upper bound on the coarse-pass downscale factor. `1` disables the coarse pass.
    pub max_coarse_factor: u32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            scales: vec![1.0],
            max_coarse_factor: 4,
        }
    }
}

/// Find the best placement of `template` in `haystack` across all configured scales.
///
/// Errors when the template does not fit the capture at any scale.
pub fn locate(
    haystack: &GrayImage,
    template: &GrayImage,
    settings: &MatchSettings,
) -> BotResult<TemplateMatch> {
    let mut best: Option<TemplateMatch> = None;

    for &scale in &settings.scales {
        let scaled;
        let tpl = if (scale - 1.0).abs() < f32::EPSILON {
            template
        } else {
            let w = ((template.width() as f32) * scale).round().max(1.0) as u32;
            let h = ((template.height() as f32) * scale).round().max(1.0) as u32;
            scaled = image::imageops::resize(template, w, h, FilterType::Triangle);
            &scaled
        };

        if tpl.width() > haystack.width() || tpl.height() > haystack.height() {
            tracing::debug!(scale, "template larger than capture at this scale, skipped");
            continue;
        }

        let found = locate_single_scale(haystack, tpl, settings.max_coarse_factor);
        tracing::trace!(scale, score = found.score, x = found.x, y = found.y, "scale scored");
        if best.map_or(true, |b| found.score > b.score) {
            best = Some(found);
        }
    }

    best.ok_or_else(|| {
        BotError::Perception(format!(
            "template {}x{} does not fit capture {}x{} at any scale",
            template.width(),
            template.height(),
            haystack.width(),
            haystack.height()
        ))
    })
}

fn locate_single_scale(haystack: &GrayImage, template: &GrayImage, max_coarse: u32) -> TemplateMatch {
    let factor = coarse_factor(template, max_coarse);
    let (tw, th) = template.dimensions();

    if factor <= 1 {
        let (score, x, y) = exhaustive(haystack, template);
        return TemplateMatch { score, x, y, width: tw, height: th };
    }

    // ── Coarse pass ───────────────────────────────────────────────────────
    let small_hay = shrink(haystack, factor);
    let small_tpl = shrink(template, factor);
    let (coarse_score, cx, cy) = exhaustive(&small_hay, &small_tpl);

    // ── Refinement at full resolution ─────────────────────────────────────
    let radius = factor * 2;
    let max_x = haystack.width() - tw;
    let max_y = haystack.height() - th;
    let x0 = (cx * factor).saturating_sub(radius).min(max_x);
    let y0 = (cy * factor).saturating_sub(radius).min(max_y);
    let x1 = (cx * factor + radius).min(max_x);
    let y1 = (cy * factor + radius).min(max_y);

    let integral = Integral::new(haystack);
    let tpl = TemplateStats::new(template);
    let mut best = (0.0f32, x0, y0);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let s = ncc_at(haystack, &integral, &tpl, x, y);
            if s > best.0 {
                best = (s, x, y);
            }
        }
    }

    // Detail lost by downscaling can make a decoy win the coarse pass. When
    // full resolution disagrees with the coarse score, search everything.
    if best.0 + COARSE_SLACK < coarse_score {
        tracing::trace!(coarse_score, refined = best.0, "coarse peak did not hold, exhaustive search");
        let (score, x, y) = exhaustive(haystack, template);
        return TemplateMatch { score, x, y, width: tw, height: th };
    }
    TemplateMatch { score: best.0, x: best.1, y: best.2, width: tw, height: th }
}

fn coarse_factor(template: &GrayImage, max_coarse: u32) -> u32 {
    let short = template.width().min(template.height());
    (short / MIN_COARSE_SIDE).clamp(1, max_coarse.max(1))
}

fn shrink(img: &GrayImage, factor: u32) -> GrayImage {
    let w = (img.width() / factor).max(1);
    let h = (img.height() / factor).max(1);
    image::imageops::resize(img, w, h, FilterType::Triangle)
}

/// Score every placement; returns `(score, x, y)` of the best one.
fn exhaustive(haystack: &GrayImage, template: &GrayImage) -> (f32, u32, u32) {
    let integral = Integral::new(haystack);
    let tpl = TemplateStats::new(template);
    let max_x = haystack.width().saturating_sub(template.width());
    let max_y = haystack.height().saturating_sub(template.height());

    let mut best = (0.0f32, 0u32, 0u32);
    for y in 0..=max_y {
        for x in 0..=max_x {
            let s = ncc_at(haystack, &integral, &tpl, x, y);
            if s > best.0 {
                best = (s, x, y);
            }
        }
    }
    best
}

// ── Correlation internals ─────────────────────────────────────────────────────

struct TemplateStats {
    width: u32,
    height: u32,
    /// Template pixels minus their mean, row-major.
    centered: Vec<f64>,
    /// Sum of squared centered values.
    energy: f64,
}

impl TemplateStats {
    fn new(template: &GrayImage) -> Self {
        let n = (template.width() * template.height()) as f64;
        let mean = template.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
        let centered: Vec<f64> = template.pixels().map(|p| p.0[0] as f64 - mean).collect();
        let energy = centered.iter().map(|v| v * v).sum();
        Self {
            width: template.width(),
            height: template.height(),
            centered,
            energy,
        }
    }
}

/// Summed-area tables of pixel values and squared pixel values.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = img.get_pixel(x as u32, y as u32).0[0] as f64;
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row_sum;
                sq[idx] = sq[idx - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, table: &[f64], x: u32, y: u32, w: u32, h: u32) -> f64 {
        let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
        let s = self.stride;
        table[(y + h) * s + (x + w)] - table[y * s + (x + w)] - table[(y + h) * s + x] + table[y * s + x]
    }
}

fn ncc_at(haystack: &GrayImage, integral: &Integral, tpl: &TemplateStats, x: u32, y: u32) -> f32 {
    if tpl.energy <= f64::EPSILON {
        return 0.0;
    }
    let n = (tpl.width * tpl.height) as f64;
    let win_sum = integral.window(&integral.sum, x, y, tpl.width, tpl.height);
    let win_sq = integral.window(&integral.sq, x, y, tpl.width, tpl.height);
    let win_var = win_sq - win_sum * win_sum / n;
    if win_var <= 1e-6 {
        return 0.0;
    }

    // The template is zero-mean, so the window mean drops out of the numerator.
    let mut num = 0.0;
    for ty in 0..tpl.height {
        let row = (ty * tpl.width) as usize;
        for tx in 0..tpl.width {
            let v = haystack.get_pixel(x + tx, y + ty).0[0] as f64;
            num += v * tpl.centered[row + tx as usize];
        }
    }

    let score = num / (tpl.energy * win_var).sqrt();
    score.clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Blocky pseudo-random texture: 8x8 cells of varied intensity.
    fn textured(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let (cx, cy) = (x / 8, y / 8);
            Luma([((cx * 73 + cy * 151 + cx * cy * 29) % 241) as u8])
        })
    }

    fn crop(img: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
        image::imageops::crop_imm(img, x, y, w, h).to_image()
    }

    #[test]
    fn finds_exact_crop_with_full_confidence() {
        let hay = textured(120, 90);
        let tpl = crop(&hay, 40, 24, 20, 20);
        let settings = MatchSettings { scales: vec![1.0], max_coarse_factor: 1 };

        let m = locate(&hay, &tpl, &settings).unwrap();
        assert!(m.score > 0.99, "score {}", m.score);
        assert_eq!((m.x, m.y), (40, 24));
        assert_eq!(m.center(), (50, 34));
    }

    #[test]
    fn coarse_pass_refines_to_exact_location() {
        let hay = textured(256, 192);
        let tpl = crop(&hay, 96, 64, 48, 48);
        let settings = MatchSettings { scales: vec![1.0], max_coarse_factor: 4 };

        let m = locate(&hay, &tpl, &settings).unwrap();
        assert!(m.score > 0.99, "score {}", m.score);
        assert_eq!((m.x, m.y), (96, 64));
    }

    #[test]
    fn fine_detail_match_is_found_when_coarse_pass_prefers_a_decoy() {
        // Ramp plus a 2 px checkerboard; downscaling erases the checkerboard.
        let ramp = |x: u32, y: u32| 60 + x + y;
        let checker = |x: u32, y: u32| if (x / 2 + y / 2) % 2 == 0 { 30 } else { 0 };
        let tpl = GrayImage::from_fn(48, 48, |x, y| Luma([(ramp(x, y) + checker(x, y)) as u8]));

        let mut hay = GrayImage::from_pixel(200, 120, Luma([128]));
        for y in 0..48 {
            for x in 0..48 {
                hay.put_pixel(4 + x, 4 + y, Luma([(ramp(x, y) + 15) as u8]));
                hay.put_pixel(122 + x, 42 + y, *tpl.get_pixel(x, y));
            }
        }
        let settings = MatchSettings { scales: vec![1.0], max_coarse_factor: 4 };

        let m = locate(&hay, &tpl, &settings).unwrap();
        assert!(m.score > 0.99, "score {}", m.score);
        assert_eq!((m.x, m.y), (122, 42));
    }

    #[test]
    fn flat_template_scores_zero() {
        let hay = textured(64, 64);
        let tpl = GrayImage::from_pixel(10, 10, Luma([128]));
        let m = locate(&hay, &tpl, &MatchSettings::default()).unwrap();
        assert_eq!(m.score, 0.0);
    }

    #[test]
    fn oversized_template_is_an_error() {
        let hay = textured(32, 32);
        let tpl = textured(40, 20);
        assert!(matches!(
            locate(&hay, &tpl, &MatchSettings::default()),
            Err(BotError::Perception(_))
        ));
    }

    #[test]
    fn unrelated_content_stays_below_typical_threshold() {
        let hay = GrayImage::from_fn(80, 80, |x, _| Luma([(x * 3) as u8]));
        let tpl = crop(&textured(64, 64), 0, 0, 24, 24);
        let m = locate(&hay, &tpl, &MatchSettings::default()).unwrap();
        assert!(m.score < 0.8, "score {}", m.score);
    }
}
