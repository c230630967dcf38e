use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{BotError, BotResult};
use crate::perception::capture::Capture;
use crate::perception::ocr::{self, TextRecognizer};
use crate::perception::template::{self, MatchSettings};
use crate::perception::types::{Pattern, PatternKind};

/// Scores one pattern against one capture. Confidence is in `[0, 1]`.
///
/// Implementations may fail; the detection engine treats a failure as
/// confidence 0 for that pattern and moves on.
#[async_trait]
pub trait PatternMatcher: Send + Sync {
    async fn score(&self, capture: &Capture, pattern: &Pattern) -> BotResult<f32>;
}

/// Template correlation for visual patterns, OCR lookup for text patterns,
/// gray-level statistics for solid screens.
pub struct ScreenMatcher {
    settings: Arc<MatchSettings>,
    recognizer: Arc<dyn TextRecognizer>,
}

impl ScreenMatcher {
    pub fn new(settings: MatchSettings, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            settings: Arc::new(settings),
            recognizer,
        }
    }
}

#[async_trait]
impl PatternMatcher for ScreenMatcher {
    async fn score(&self, capture: &Capture, pattern: &Pattern) -> BotResult<f32> {
        match &pattern.kind {
            PatternKind::VisualTemplate(tpl) => {
                let haystack = capture.gray();
                let tpl = tpl.clone();
                let settings = self.settings.clone();
                // Correlation is CPU-bound; keep it off the async workers.
                let found = tokio::task::spawn_blocking(move || {
                    template::locate(&haystack, &tpl, &settings)
                })
                .await
                .map_err(|e| BotError::Perception(format!("join: {e}")))??;
                Ok(found.score)
            }
            PatternKind::TextQuery(query) => {
                let prepared = ocr::prepare(capture.image(), &query.ocr);
                let text = self.recognizer.recognize(&prepared).await?;
                tracing::debug!(query = %query.describe(), recognized = %text.trim(), "OCR text");
                Ok(if query.is_found_in(&text) { 1.0 } else { 0.0 })
            }
            PatternKind::SolidColor(color) => {
                let present = color.is_present(&capture.gray());
                tracing::trace!(pattern = %color.describe(), present, "solid color check");
                Ok(if present { 1.0 } else { 0.0 })
            }
        }
    }
}
