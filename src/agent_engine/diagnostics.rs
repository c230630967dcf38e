// On-disk artifacts of a run: labeled captures, unknown-state evidence and a JSONL cycle journal.
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::agent_engine::state::CycleOutcome;
use crate::config::DiagnosticsConfig;
use crate::errors::{BotError, BotResult};
use crate::perception::capture::Capture;

const KEEP_FILE: &str = ".gitkeep";
const UNKNOWN_LOG: &str = "unknown_states.log";

/// One line of the cycle journal.
#[derive(Debug, Serialize)]
pub struct CycleRecord<'a> {
    pub run_id: &'a str,
    pub iteration: u64,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<&'a CycleOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Diagnostics {
    pub run_id: String,
    screenshots_dir: PathBuf,
    unknown_dir: PathBuf,
    save_matched: bool,
    journal_path: PathBuf,
}

impl Diagnostics {
    pub fn new(cfg: &DiagnosticsConfig) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let journal_path = cfg.screenshots_dir.join(format!("cycles_{run_id}.jsonl"));
        Self {
            run_id,
            screenshots_dir: cfg.screenshots_dir.clone(),
            unknown_dir: cfg.unknown_states_dir.clone(),
            save_matched: cfg.save_matched,
            journal_path,
        }
    }

    pub fn screenshots_dir(&self) -> &Path {
        &self.screenshots_dir
    }

    pub fn unknown_dir(&self) -> &Path {
        &self.unknown_dir
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Create both directories and empty them, leaving `.gitkeep` in place.
    pub fn prepare(&self) -> BotResult<()> {
        for dir in [&self.screenshots_dir, &self.unknown_dir] {
            let removed = clear_dir(dir)?;
            tracing::info!(dir = %dir.display(), removed, "diagnostics directory cleared");
        }
        Ok(())
    }

    /// Labeled copy of a matched capture, when enabled.
    pub fn save_matched(&self, iteration: u64, state: &str, capture: &Capture) -> BotResult<Option<PathBuf>> {
        if !self.save_matched {
            return Ok(None);
        }
        let path = self
            .screenshots_dir
            .join(format!("{iteration:05}_{}.png", sanitize(state)));
        capture.save_png(&path)?;
        tracing::debug!(path = %path.display(), "matched capture saved");
        Ok(Some(path))
    }

    /// Keep the capture nobody recognized and note it in `unknown_states.log`.
    /// The iteration keeps names unique when cycles share a timestamp.
    pub fn save_unknown(&self, iteration: u64, confidence: f32, capture: &Capture) -> BotResult<PathBuf> {
        let stamp = capture.taken_at.format("%Y%m%d_%H%M%S_%3f");
        let file_name = format!("unknown_{stamp}_{iteration:05}.png");
        let path = self.unknown_dir.join(&file_name);
        capture.save_png(&path)?;

        let line = format!(
            "[{}] Unknown state detected. Screenshot: {file_name} (best confidence {confidence:.3})",
            capture.taken_at.format("%Y-%m-%d %H:%M:%S"),
        );
        append_line(&self.unknown_dir.join(UNKNOWN_LOG), &line)?;
        tracing::warn!(path = %path.display(), confidence, "unknown state captured");
        Ok(path)
    }

    /// Append one record to this run's journal.
    pub fn journal(&self, record: &CycleRecord<'_>) -> BotResult<()> {
        let line = serde_json::to_string(record)?;
        append_line(&self.journal_path, &line)?;
        tracing::debug!(path = %self.journal_path.display(), "cycle journaled");
        Ok(())
    }
}

fn clear_dir(dir: &Path) -> BotResult<usize> {
    std::fs::create_dir_all(dir)
        .map_err(|e| BotError::Diagnostics(format!("create {}: {e}", dir.display())))?;
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name() == KEEP_FILE {
            continue;
        }
        let path = entry.path();
        let res = if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        res.map_err(|e| BotError::Diagnostics(format!("remove {}: {e}", path.display())))?;
        removed += 1;
    }
    Ok(removed)
}

fn append_line(path: &Path, line: &str) -> BotResult<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| BotError::Diagnostics(format!("open {}: {e}", path.display())))?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// State names end up in file names.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
