//! `adb`-backed device transport.
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::device::transport::{DeviceKey, DeviceTransport};
use crate::errors::{TapClawError, TapClawResult};

#[derive(Debug, Clone)]
pub struct AdbTransport {
    adb: PathBuf,
    serial: Option<String>,
    command_timeout: Duration,
}

impl AdbTransport {
    pub fn new(adb: impl Into<PathBuf>, serial: Option<String>, command_timeout: Duration) -> Self {
        Self {
            adb: adb.into(),
            serial,
            command_timeout,
        }
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Runs `adb [-s serial] <args>` and returns its stdout.
    async fn run(&self, args: &[&str]) -> TapClawResult<Vec<u8>> {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial]);
        }
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| {
                TapClawError::Transport(format!(
                    "adb {} timed out after {:?}",
                    args.join(" "),
                    self.command_timeout
                ))
            })?
            .map_err(|e| TapClawError::Transport(format!("spawn {}: {e}", self.adb.display())))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(classify_failure(args, &stderr));
        }
        // `adb exec-out` can exit 0 with an empty stdout when the device drops.
        if output.stdout.is_empty() && is_device_missing(&stderr) {
            return Err(TapClawError::DeviceUnavailable(stderr.trim().to_string()));
        }
        Ok(output.stdout)
    }
}

fn is_device_missing(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no devices") || s.contains("offline") || (s.contains("device") && s.contains("not found"))
}

fn classify_failure(args: &[&str], stderr: &str) -> TapClawError {
    let msg = stderr.trim().to_string();
    if is_device_missing(stderr) {
        TapClawError::DeviceUnavailable(msg)
    } else {
        TapClawError::Transport(format!("adb {} failed: {msg}", args.join(" ")))
    }
}

#[async_trait]
impl DeviceTransport for AdbTransport {
    async fn capture_screen(&self) -> TapClawResult<Vec<u8>> {
        let png = self.run(&["exec-out", "screencap", "-p"]).await?;
        tracing::debug!(bytes = png.len(), serial = ?self.serial, "screen captured");
        Ok(png)
    }

    async fn tap(&self, x: i32, y: i32) -> TapClawResult<()> {
        let (xs, ys) = (x.to_string(), y.to_string());
        self.run(&["shell", "input", "tap", &xs, &ys]).await?;
        Ok(())
    }

    async fn press_key(&self, key: DeviceKey) -> TapClawResult<()> {
        self.run(&["shell", "input", "keyevent", key.keycode()]).await?;
        Ok(())
    }
}
