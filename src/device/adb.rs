// Device implementation driving an Android emulator through the `adb` binary.
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::DeviceConfig;
use crate::device::traits::Device;
use crate::errors::{BotError, BotResult};
use crate::perception::capture::Capture;

pub const KEYCODE_HOME: u32 = 3;

pub struct AdbDevice {
    adb_path: String,
    serial: Option<String>,
}

impl AdbDevice {
    pub fn new(adb_path: impl Into<String>, serial: Option<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
        }
    }

    pub fn from_config(cfg: &DeviceConfig) -> Self {
        Self::new(cfg.adb_path.clone(), cfg.serial.clone())
    }

    fn command_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(serial) = &self.serial {
            full.push("-s");
            full.push(serial.as_str());
        }
        full.extend_from_slice(args);
        full
    }

    async fn run(&self, args: &[&str]) -> BotResult<Output> {
        let full = self.command_args(args);
        tracing::trace!(adb = %self.adb_path, args = ?full, "adb");
        let output = Command::new(&self.adb_path)
            .args(&full)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BotError::DeviceUnavailable(format!("spawn {}: {e}", self.adb_path)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BotError::DeviceUnavailable(format!(
                "adb {} failed ({}): {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(output)
    }

    async fn shell(&self, args: &[&str]) -> BotResult<()> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.run(&full).await.map(|_| ())
    }
}

#[async_trait]
impl Device for AdbDevice {
    async fn capture(&self) -> BotResult<Capture> {
        let output = self.run(&["exec-out", "screencap", "-p"]).await?;
        Capture::from_encoded(&output.stdout)
            .map_err(|e| BotError::DeviceUnavailable(format!("screencap: {e}")))
    }

    async fn tap(&self, x: i32, y: i32) -> BotResult<()> {
        let (xs, ys) = (x.to_string(), y.to_string());
        self.shell(&["input", "tap", &xs, &ys]).await?;
        tracing::debug!(x, y, "tapped");
        Ok(())
    }

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> BotResult<()> {
        let args = [x1, y1, x2, y2].map(|v| v.to_string());
        let dur = duration_ms.to_string();
        self.shell(&["input", "swipe", &args[0], &args[1], &args[2], &args[3], &dur])
            .await?;
        tracing::debug!(x1, y1, x2, y2, duration_ms, "swiped");
        Ok(())
    }

    async fn send_key_event(&self, code: u32) -> BotResult<()> {
        let code_s = code.to_string();
        self.shell(&["input", "keyevent", &code_s]).await?;
        tracing::debug!(code, "key event sent");
        Ok(())
    }

    async fn screen_size(&self) -> BotResult<(u32, u32)> {
        let output = self.run(&["shell", "wm", "size"]).await?;
        let text = String::from_utf8_lossy(&output.stdout);
        parse_wm_size(&text)
            .ok_or_else(|| BotError::DeviceUnavailable(format!("unparseable wm size output: {}", text.trim())))
    }

    async fn stop_app(&self, package: &str) -> BotResult<()> {
        self.shell(&["am", "force-stop", package]).await?;
        tracing::info!(package = %package, "force-stopped app");
        Ok(())
    }
}

/// Parses `Physical size: 1600x900`. An `Override size:` line wins when present.
fn parse_wm_size(text: &str) -> Option<(u32, u32)> {
    let mut physical = None;
    for line in text.lines() {
        let Some((label, value)) = line.split_once(':') else { continue };
        let Some((w, h)) = value.trim().split_once('x') else { continue };
        let (Ok(w), Ok(h)) = (w.trim().parse(), h.trim().parse()) else { continue };
        match label.trim() {
            "Override size" => return Some((w, h)),
            "Physical size" => physical = Some((w, h)),
            _ => {}
        }
    }
    physical
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_physical_size() {
        assert_eq!(parse_wm_size("Physical size: 1280x720\n"), Some((1280, 720)));
    }

    #[test]
    fn override_size_takes_precedence() {
        let out = "Physical size: 1600x900\nOverride size: 1280x720\n";
        assert_eq!(parse_wm_size(out), Some((1280, 720)));
        assert_eq!(parse_wm_size("error: no devices"), None);
    }

    #[test]
    fn serial_is_prepended() {
        let dev = AdbDevice::new("adb", Some("emulator-5554".into()));
        assert_eq!(
            dev.command_args(&["shell", "wm", "size"]),
            vec!["-s", "emulator-5554", "shell", "wm", "size"]
        );
    }

    #[tokio::test]
    async fn missing_adb_binary_is_device_unavailable() {
        let dev = AdbDevice::new("/nonexistent/adb-binary", None);
        assert!(matches!(dev.capture().await, Err(BotError::DeviceUnavailable(_))));
        assert!(matches!(dev.tap(1, 2).await, Err(BotError::DeviceUnavailable(_))));
    }
}
