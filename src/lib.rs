pub mod agent_engine;
pub mod config;
pub mod detection;
pub mod device;
pub mod errors;
pub mod executor;
pub mod perception;
pub mod registry;
pub mod states;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::agent_engine::diagnostics::Diagnostics;
use crate::agent_engine::{BotEngine, LoopConfig, RunSummary};
use crate::detection::DetectionEngine;
use crate::device::{AdbDevice, Device};
use crate::errors::BotResult;
use crate::executor::{ActionExecutor, RetryPolicy};
use crate::perception::matcher::{PatternMatcher, ScreenMatcher};
use crate::perception::ocr::{TesseractCli, TextRecognizer};
use crate::perception::template::MatchSettings;
use crate::registry::register_all;
use crate::states::ManifestContext;

/// Load config, register states, then drive the loop until Ctrl-C, the
/// iteration limit, or failure escalation.
pub async fn run() -> BotResult<RunSummary> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let (cfg, config_path) = config::load_config()?;

    // Registration is its own phase: any bad state aborts before the loop starts.
    let manifest = ManifestContext {
        asset_root: config_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default(),
        default_package: cfg.device.app_package.clone(),
    };
    let registry = register_all(states::constructors(cfg.states.clone(), &manifest))?;
    if registry.is_empty() {
        tracing::warn!("no states registered; every cycle will be unknown");
    }

    let settings = MatchSettings::from(&cfg.matching);
    let device: Arc<dyn Device> = Arc::new(AdbDevice::from_config(&cfg.device));
    let recognizer: Arc<dyn TextRecognizer> = Arc::new(TesseractCli::from_config(&cfg.ocr));
    let matcher: Arc<dyn PatternMatcher> = Arc::new(ScreenMatcher::new(settings.clone(), recognizer.clone()));

    let mut engine = BotEngine::new(
        Arc::new(registry),
        device,
        DetectionEngine::new(matcher),
        ActionExecutor::new(RetryPolicy::from_config(&cfg.retry)),
        Diagnostics::new(&cfg.diagnostics),
        LoopConfig::from(&cfg.run),
    )
    .with_match_settings(settings);
    if cfg.ocr.warmup {
        engine = engine.with_warmup(recognizer);
    }

    let stop = engine.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, stopping after the current cycle");
                stop.store(true, Ordering::SeqCst);
            }
            Err(e) => tracing::warn!(error = %e, "could not install Ctrl-C handler"),
        }
    });

    tracing::info!(run_id = %engine.run_id(), "spawning engine loop");
    engine.run().await
}
