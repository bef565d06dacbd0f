//! Screen capture with decoding, size validation and bounded retry.
use std::time::Duration;

use crate::device::transport::DeviceTransport;
use crate::errors::{TapClawError, TapClawResult};
use crate::perception::types::Frame;

/// Result of a capture attempt. Only `Captured` carries a usable frame.
#[derive(Debug, Clone)]
pub enum CaptureStatus {
    Captured(Frame),
    /// Transport error, undecodable bytes or an implausibly small image.
    TransientFailure(String),
    /// The device is absent or offline; retrying will not help.
    DeviceUnavailable(String),
    Exhausted { attempts: u32, last_error: String },
}

impl CaptureStatus {
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            CaptureStatus::Captured(frame) => Some(frame),
            _ => None,
        }
    }

    /// Short description of a failed capture.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            CaptureStatus::Captured(_) => None,
            CaptureStatus::TransientFailure(r) => Some(r.clone()),
            CaptureStatus::DeviceUnavailable(r) => Some(format!("device unavailable: {r}")),
            CaptureStatus::Exhausted {
                attempts,
                last_error,
            } => Some(format!("gave up after {attempts} attempts: {last_error}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturePolicy {
    pub retries: u32,
    pub backoff: Duration,
    /// Smallest acceptable width and height in pixels.
    pub min_dimension: u32,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_secs(1),
            min_dimension: 100,
        }
    }
}

/// Decodes screenshot bytes and checks the image is plausibly a screen.
pub fn decode_frame(bytes: &[u8], min_dimension: u32) -> TapClawResult<Frame> {
    if bytes.is_empty() {
        return Err(TapClawError::Decode("empty screenshot".into()));
    }
    let image = image::load_from_memory(bytes).map_err(|e| TapClawError::Decode(e.to_string()))?;
    if image.width() < min_dimension || image.height() < min_dimension {
        return Err(TapClawError::Decode(format!(
            "screenshot too small: {}x{} (min {min_dimension})",
            image.width(),
            image.height()
        )));
    }
    Ok(Frame::new(image))
}

/// One capture and decode, no retry.
pub async fn capture_once(transport: &dyn DeviceTransport, min_dimension: u32) -> CaptureStatus {
    let bytes = match transport.capture_screen().await {
        Ok(b) => b,
        Err(TapClawError::DeviceUnavailable(reason)) => {
            return CaptureStatus::DeviceUnavailable(reason)
        }
        Err(e) => return CaptureStatus::TransientFailure(e.to_string()),
    };
    match decode_frame(&bytes, min_dimension) {
        Ok(frame) => CaptureStatus::Captured(frame),
        Err(e) => CaptureStatus::TransientFailure(e.to_string()),
    }
}

/// Captures with up to `policy.retries` attempts and a fixed backoff between
/// them. Never returns `TransientFailure`.
pub async fn capture_with_retry(
    transport: &dyn DeviceTransport,
    policy: &CapturePolicy,
) -> CaptureStatus {
    let attempts = policy.retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match capture_once(transport, policy.min_dimension).await {
            CaptureStatus::TransientFailure(reason) => {
                tracing::warn!(attempt, max = attempts, error = %reason, "screen capture failed");
                last_error = reason;
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            CaptureStatus::DeviceUnavailable(reason) => {
                tracing::error!(attempt, error = %reason, "device unavailable");
                return CaptureStatus::DeviceUnavailable(reason);
            }
            done => return done,
        }
    }

    CaptureStatus::Exhausted {
        attempts,
        last_error,
    }
}
