use std::sync::Arc;

use crate::perception::capture::Capture;
use crate::perception::matcher::PatternMatcher;
use crate::perception::types::Pattern;
use crate::registry::{StateDefinition, StateRegistry};

/// Outcome of classifying one capture. Borrows from the registry it was computed against.
#[derive(Debug, Clone)]
pub struct DetectionResult<'r> {
    pub matched: Option<&'r StateDefinition>,
    pub matched_pattern: Option<&'r Pattern>,
    /// Score of the matching pattern, or the best score seen when nothing matched.
    pub confidence: f32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Number of patterns scored before the decision.
    pub evaluated: usize,
}

impl DetectionResult<'_> {
    pub fn is_unknown(&self) -> bool {
        self.matched.is_none()
    }

    pub fn state_name(&self) -> Option<&str> {
        self.matched.map(|s| s.name.as_str())
    }
}

/// Classifier with no history: every call starts from the capture alone.
///
/// States are tried in registry order, patterns in declared order, and the
/// first pattern whose score reaches its threshold decides the result.
/// Later patterns and states are not scored at all.
pub struct DetectionEngine {
    matcher: Arc<dyn PatternMatcher>,
}

impl DetectionEngine {
    pub fn new(matcher: Arc<dyn PatternMatcher>) -> Self {
        Self { matcher }
    }

    pub async fn detect<'r>(&self, registry: &'r StateRegistry, capture: &Capture) -> DetectionResult<'r> {
        let mut best_seen = 0.0f32;
        let mut evaluated = 0;

        for state in registry.all_states() {
            for pattern in &state.patterns {
                evaluated += 1;
                let score = match self.matcher.score(capture, pattern).await {
                    Ok(s) => s.clamp(0.0, 1.0),
                    Err(e) => {
                        tracing::warn!(
                            state = %state.name,
                            pattern = %pattern.label,
                            error = %e,
                            "pattern scoring failed, treating as confidence 0"
                        );
                        0.0
                    }
                };
                tracing::debug!(
                    state = %state.name,
                    pattern = %pattern.label,
                    kind = pattern.kind_name(),
                    score,
                    threshold = pattern.threshold,
                    "pattern scored"
                );

                if score >= pattern.threshold {
                    return DetectionResult {
                        matched: Some(state),
                        matched_pattern: Some(pattern),
                        confidence: score,
                        timestamp: chrono::Utc::now(),
                        evaluated,
                    };
                }
                best_seen = best_seen.max(score);
            }
        }

        DetectionResult {
            matched: None,
            matched_pattern: None,
            confidence: best_seen,
            timestamp: chrono::Utc::now(),
            evaluated,
        }
    }
}
