use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::diagnostics::{CycleRecord, Diagnostics};
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::state::{CycleOutcome, LoopConfig, RunSummary, StopReason};
use crate::detection::DetectionEngine;
use crate::device::Device;
use crate::errors::{BotError, BotResult};
use crate::executor::{ActionContext, ActionExecutor};
use crate::perception::ocr::TextRecognizer;
use crate::perception::template::MatchSettings;
use crate::registry::StateRegistry;

/// Longest uninterrupted sleep; bounds how late a stop request is noticed.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Drives capture → detect → act → diagnostics → sleep until stopped.
pub struct BotEngine {
    registry: Arc<StateRegistry>,
    device: Arc<dyn Device>,
    detector: DetectionEngine,
    executor: ActionExecutor,
    match_settings: MatchSettings,
    diagnostics: Diagnostics,
    loop_ctrl: LoopController,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    stop_flag: Arc<AtomicBool>,
    /// Only used to log transitions; detection never sees it.
    last_state: Option<String>,
}

impl BotEngine {
    pub fn new(
        registry: Arc<StateRegistry>,
        device: Arc<dyn Device>,
        detector: DetectionEngine,
        executor: ActionExecutor,
        diagnostics: Diagnostics,
        loop_config: LoopConfig,
    ) -> Self {
        Self {
            registry,
            device,
            detector,
            executor,
            match_settings: MatchSettings::default(),
            diagnostics,
            loop_ctrl: LoopController::new(loop_config),
            recognizer: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            last_state: None,
        }
    }

    /// Settings used by actions that locate templates themselves.
    pub fn with_match_settings(mut self, settings: MatchSettings) -> Self {
        self.match_settings = settings;
        self
    }

    /// Recognizer warmed up once during startup.
    pub fn with_warmup(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Setting the returned flag ends the loop before the next cycle.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub fn run_id(&self) -> &str {
        &self.diagnostics.run_id
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    // ── Startup ───────────────────────────────────────────────────────────────

    pub async fn startup(&mut self) {
        if let Err(e) = self.diagnostics.prepare() {
            tracing::error!(error = %e, "could not prepare diagnostics directories");
        }

        if let Some(recognizer) = &self.recognizer {
            if let Err(e) = recognizer.warmup().await {
                tracing::warn!(error = %e, "OCR warmup failed; text patterns will score 0 until it recovers");
            }
        }

        tracing::info!(
            run_id = %self.diagnostics.run_id,
            states = ?self.registry.names(),
            "engine started"
        );
    }

    // ── Cycle ─────────────────────────────────────────────────────────────────

    /// One full cycle. Only a failed capture is an error; everything after it
    /// is handled inside the cycle.
    pub async fn run_cycle(&mut self, iteration: u64) -> BotResult<CycleOutcome> {
        let capture = self.device.capture().await?;
        let registry = self.registry.clone();
        let detection = self.detector.detect(&registry, &capture).await;

        let outcome = match (detection.matched, detection.matched_pattern) {
            (Some(state), Some(pattern)) => {
                if self.last_state.as_deref() != Some(state.name.as_str()) {
                    tracing::info!(
                        iteration,
                        from = self.last_state.as_deref().unwrap_or("<none>"),
                        to = %state.name,
                        pattern = %pattern.label,
                        confidence = detection.confidence,
                        "state transition"
                    );
                } else {
                    tracing::debug!(iteration, state = %state.name, "state unchanged");
                }

                let ctx = ActionContext {
                    device: self.device.as_ref(),
                    capture: &capture,
                    state: &state.name,
                    iteration,
                    attempt: 1,
                    match_settings: &self.match_settings,
                };
                let actions = self.executor.run(state, &ctx).await;

                if let Err(e) = self.diagnostics.save_matched(iteration, &state.name, &capture) {
                    tracing::warn!(error = %e, "could not save matched capture");
                }
                self.last_state = Some(state.name.clone());

                CycleOutcome::Matched {
                    state: state.name.clone(),
                    pattern: pattern.label.clone(),
                    confidence: detection.confidence,
                    outcome: actions,
                }
            }
            _ => {
                tracing::warn!(
                    iteration,
                    confidence = detection.confidence,
                    evaluated = detection.evaluated,
                    "no state matched"
                );
                if let Err(e) = self.diagnostics.save_unknown(iteration, detection.confidence, &capture) {
                    tracing::warn!(error = %e, "could not save unknown capture");
                }
                self.last_state = None;
                CycleOutcome::Unknown {
                    confidence: detection.confidence,
                }
            }
        };

        self.journal(iteration, Some(&outcome), None);
        Ok(outcome)
    }

    fn journal(&self, iteration: u64, cycle: Option<&CycleOutcome>, error: Option<String>) {
        let record = CycleRecord {
            run_id: &self.diagnostics.run_id,
            iteration,
            ts: chrono::Utc::now().timestamp_millis(),
            cycle,
            error,
        };
        if let Err(e) = self.diagnostics.journal(&record) {
            tracing::warn!(error = %e, "could not write cycle journal");
        }
    }

    // ── Loop ──────────────────────────────────────────────────────────────────

    pub async fn run(&mut self) -> BotResult<RunSummary> {
        self.startup().await;
        let mut summary = RunSummary::new(self.diagnostics.run_id.clone());

        loop {
            if self.stop_requested() {
                tracing::info!("stop requested, leaving loop");
                summary.stop_reason = StopReason::Interrupted;
                break;
            }
            if self.loop_ctrl.iteration_limit_reached() {
                tracing::info!(iterations = self.loop_ctrl.iterations(), "iteration limit reached");
                summary.stop_reason = StopReason::IterationLimit;
                break;
            }

            let iteration = self.loop_ctrl.begin_iteration();
            summary.iterations = iteration;

            let failure = match self.run_cycle(iteration).await {
                Ok(outcome) => {
                    summary.tally(&outcome);
                    outcome
                        .device_lost()
                        .then(|| "device stopped responding during actions".to_string())
                }
                Err(e) => {
                    self.journal(iteration, None, Some(e.to_string()));
                    Some(e.to_string())
                }
            };

            match failure {
                None => self.loop_ctrl.record_success(),
                Some(reason) => {
                    let streak = self.loop_ctrl.record_failure();
                    summary.failed_cycles += 1;
                    tracing::error!(iteration, streak, error = %reason, "cycle failed");

                    if self.loop_ctrl.should_escalate() {
                        tracing::error!(
                            streak,
                            elapsed_s = self.loop_ctrl.elapsed().as_secs(),
                            "too many consecutive failures, giving up"
                        );
                        return Err(BotError::TooManyFailures { count: streak });
                    }
                }
            }

            self.pause().await;
        }

        tracing::info!(
            iterations = summary.iterations,
            matched = summary.matched,
            unknown = summary.unknown,
            failed = summary.failed_cycles,
            reason = ?summary.stop_reason,
            "engine stopped"
        );
        Ok(summary)
    }

    /// Poll-interval sleep that wakes early when a stop is requested.
    async fn pause(&self) {
        let mut remaining = self.loop_ctrl.config().poll_interval;
        while !remaining.is_zero() && !self.stop_requested() {
            let step = remaining.min(STOP_POLL);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticsConfig;
    use crate::executor::{Backoff, RetryPolicy};
    use crate::perception::matcher::PatternMatcher;
    use crate::registry::StateDefinition;
    use crate::test_support::{
        template_pattern, FixedRecognizer, ScriptedAction, ScriptedDevice, ScriptedMatcher,
    };
    use std::path::Path;
    use std::sync::atomic::Ordering;

    struct Fixture {
        engine: BotEngine,
        device: Arc<ScriptedDevice>,
    }

    fn fixture(
        root: &Path,
        states: Vec<StateDefinition>,
        matcher: ScriptedMatcher,
        device: ScriptedDevice,
        max_iterations: Option<u64>,
        max_failures: u32,
    ) -> Fixture {
        let mut registry = StateRegistry::new();
        for s in states {
            registry.register(s).unwrap();
        }
        let device = Arc::new(device);
        let matcher: Arc<dyn PatternMatcher> = Arc::new(matcher);
        let diagnostics = Diagnostics::new(&DiagnosticsConfig {
            screenshots_dir: root.join("screenshots"),
            unknown_states_dir: root.join("unknown_states"),
            save_matched: true,
        });
        let engine = BotEngine::new(
            Arc::new(registry),
            device.clone(),
            DetectionEngine::new(matcher),
            ActionExecutor::new(RetryPolicy::new(2, Backoff::Fixed(Duration::ZERO))),
            diagnostics,
            LoopConfig {
                poll_interval: Duration::ZERO,
                max_iterations,
                max_consecutive_failures: max_failures,
            },
        );
        Fixture { engine, device }
    }

    fn files_in(dir: &Path, prefix: &str) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(prefix))
            .count()
    }

    #[tokio::test]
    async fn unknown_cycle_saves_capture_and_runs_no_actions() {
        let root = tempfile::tempdir().unwrap();
        let action = ScriptedAction::new("tap", &[true]);
        let calls = action.calls();
        let states = vec![StateDefinition::new("menu").pattern(template_pattern("menu.png", 0.8)).action(action)];
        let matcher = ScriptedMatcher::new().score("menu.png", 0.4);
        let mut f = fixture(root.path(), states, matcher, ScriptedDevice::new(), Some(1), 3);

        let summary = f.engine.run().await.unwrap();

        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.stop_reason, StopReason::IterationLimit);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let unknown_dir = root.path().join("unknown_states");
        assert_eq!(files_in(&unknown_dir, "unknown_"), 2); // png + log
        let log = std::fs::read_to_string(unknown_dir.join("unknown_states.log")).unwrap();
        assert!(log.contains("0.400"));
    }

    #[tokio::test]
    async fn matched_cycle_runs_actions_every_time_and_saves_labeled_capture() {
        let root = tempfile::tempdir().unwrap();
        let action = ScriptedAction::new("tap", &[true]);
        let calls = action.calls();
        let states = vec![StateDefinition::new("launcher").pattern(template_pattern("icon", 0.8)).action(action)];
        let matcher = ScriptedMatcher::new().score("icon", 0.95);
        let mut f = fixture(root.path(), states, matcher, ScriptedDevice::new(), Some(3), 3);

        let summary = f.engine.run().await.unwrap();

        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.matched, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let shots = root.path().join("screenshots");
        assert!(shots.join("00001_launcher.png").exists());
        assert!(shots.join("00003_launcher.png").exists());
    }

    #[tokio::test]
    async fn direct_cycle_reports_the_matching_pattern() {
        let root = tempfile::tempdir().unwrap();
        let states = vec![
            StateDefinition::new("A").pattern(template_pattern("a", 0.8)),
            StateDefinition::new("B").pattern(template_pattern("b", 0.8)),
        ];
        let matcher = ScriptedMatcher::new().score("a", 0.2).score("b", 0.85);
        let mut f = fixture(root.path(), states, matcher, ScriptedDevice::new(), None, 3);
        f.engine.startup().await;

        match f.engine.run_cycle(1).await.unwrap() {
            CycleOutcome::Matched { state, pattern, confidence, outcome } => {
                assert_eq!(state, "B");
                assert_eq!(pattern, "b");
                assert_eq!(confidence, 0.85);
                assert!(outcome.is_success());
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_failure_is_not_a_cycle_failure() {
        let root = tempfile::tempdir().unwrap();
        let states = vec![StateDefinition::new("stuck")
            .pattern(template_pattern("s", 0.5))
            .action(ScriptedAction::new("never_works", &[false]))];
        let matcher = ScriptedMatcher::new().score("s", 0.9);
        let mut f = fixture(root.path(), states, matcher, ScriptedDevice::new(), Some(4), 2);

        let summary = f.engine.run().await.unwrap();
        assert_eq!(summary.partial_failures, 4);
        assert_eq!(summary.failed_cycles, 0);
    }

    #[tokio::test]
    async fn consecutive_capture_failures_escalate() {
        let root = tempfile::tempdir().unwrap();
        let states = vec![StateDefinition::new("A").pattern(template_pattern("a", 0.8))];
        let mut f = fixture(root.path(), states, ScriptedMatcher::new(), ScriptedDevice::new().offline(), None, 3);

        let err = f.engine.run().await.unwrap_err();

        assert!(matches!(err, BotError::TooManyFailures { count: 3 }));
        assert_eq!(f.device.captures(), 3);
    }

    #[tokio::test]
    async fn a_successful_capture_resets_the_failure_streak() {
        let root = tempfile::tempdir().unwrap();
        let states = vec![StateDefinition::new("A").pattern(template_pattern("a", 0.8))];
        let device = ScriptedDevice::new().with_capture_script(&[false, false, true, false, false, true]);
        let mut f = fixture(root.path(), states, ScriptedMatcher::new(), device, Some(6), 3);

        let summary = f.engine.run().await.unwrap();

        assert_eq!(summary.iterations, 6);
        assert_eq!(summary.failed_cycles, 4);
        assert_eq!(summary.unknown, 2);
    }

    #[tokio::test]
    async fn unreachable_device_during_actions_counts_toward_escalation() {
        let root = tempfile::tempdir().unwrap();
        let states = vec![StateDefinition::new("menu")
            .pattern(template_pattern("menu", 0.8))
            .action(crate::executor::actions::Tap { x: 5, y: 5 })];
        let matcher = ScriptedMatcher::new().score("menu", 0.9);
        // Captures succeed, every input call fails.
        let device = ScriptedDevice::new().offline().with_capture_script(&[true; 5]);
        let mut f = fixture(root.path(), states, matcher, device, None, 3);

        let err = f.engine.run().await.unwrap_err();

        assert!(matches!(err, BotError::TooManyFailures { count: 3 }));
        assert_eq!(f.device.captures(), 3);
    }

    #[tokio::test]
    async fn back_to_back_unknown_cycles_keep_every_capture() {
        let root = tempfile::tempdir().unwrap();
        let mut f = fixture(root.path(), vec![], ScriptedMatcher::new(), ScriptedDevice::new(), Some(20), 3);

        let summary = f.engine.run().await.unwrap();

        assert_eq!(summary.unknown, 20);
        let unknown_dir = root.path().join("unknown_states");
        let pngs = std::fs::read_dir(&unknown_dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "png"))
            .count();
        assert_eq!(pngs, 20);
        let log = std::fs::read_to_string(unknown_dir.join("unknown_states.log")).unwrap();
        assert_eq!(log.lines().count(), 20);
    }

    #[tokio::test]
    async fn zero_limit_keeps_going_through_failures() {
        let root = tempfile::tempdir().unwrap();
        let mut f = fixture(root.path(), vec![], ScriptedMatcher::new(), ScriptedDevice::new().offline(), Some(10), 0);

        let summary = f.engine.run().await.unwrap();
        assert_eq!(summary.failed_cycles, 10);
    }

    #[tokio::test]
    async fn stop_flag_ends_the_loop_before_the_next_cycle() {
        let root = tempfile::tempdir().unwrap();
        let mut f = fixture(root.path(), vec![], ScriptedMatcher::new(), ScriptedDevice::new(), None, 3);
        f.engine.stop_handle().store(true, Ordering::SeqCst);

        let summary = f.engine.run().await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::Interrupted);
        assert_eq!(summary.iterations, 0);
        assert_eq!(f.device.captures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_sleep_is_honored_promptly() {
        let root = tempfile::tempdir().unwrap();
        let mut f = fixture(root.path(), vec![], ScriptedMatcher::new(), ScriptedDevice::new(), None, 3);
        f.engine.loop_ctrl = LoopController::new(LoopConfig {
            poll_interval: Duration::from_secs(3600),
            max_iterations: None,
            max_consecutive_failures: 3,
        });
        let stop = f.engine.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stop.store(true, Ordering::SeqCst);
        });

        let started = tokio::time::Instant::now();
        let summary = f.engine.run().await.unwrap();
        assert_eq!(summary.iterations, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn startup_warms_up_ocr_and_clears_old_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join("unknown_states");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("unknown_old.png"), b"x").unwrap();

        let recognizer = Arc::new(FixedRecognizer::new(""));
        let f = fixture(root.path(), vec![], ScriptedMatcher::new(), ScriptedDevice::new(), None, 3);
        let mut engine = f.engine.with_warmup(recognizer.clone());
        engine.startup().await;

        assert_eq!(recognizer.warmups(), 1);
        assert!(!stale.join("unknown_old.png").exists());
    }

    #[tokio::test]
    async fn journal_records_every_cycle() {
        let root = tempfile::tempdir().unwrap();
        let device = ScriptedDevice::new().with_capture_script(&[true, false]);
        let mut f = fixture(root.path(), vec![], ScriptedMatcher::new(), device, Some(2), 3);
        f.engine.run().await.unwrap();

        let journal = std::fs::read_to_string(f.engine.diagnostics.journal_path()).unwrap();
        let lines: Vec<serde_json::Value> = journal.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["cycle"]["result"], "unknown");
        assert!(lines[1]["error"].as_str().unwrap().contains("scripted capture failure"));
    }
}
