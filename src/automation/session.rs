//! Per-run context: transport, action budget, audit log and timing.
//!
//! Every device action of a run goes through one `Session`, which keeps them
//! sequential and audited.
use std::sync::Arc;
use std::time::Duration;

use crate::automation::audit::{AuditEvent, AuditLog};
use crate::device::capture::{capture_once, capture_with_retry, CapturePolicy, CaptureStatus};
use crate::device::transport::{DeviceKey, DeviceTransport};
use crate::errors::TapClawResult;
use crate::executor::action::act;
use crate::executor::budget::ActionBudget;
use crate::perception::pipeline::DetectionPipeline;
use crate::perception::types::{Detection, Frame, Target};

/// Named settle delays that let the UI animate after an action.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub after_tap: Duration,
    pub after_back: Duration,
    pub after_home: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            after_tap: Duration::from_secs(2),
            after_back: Duration::from_secs(1),
            after_home: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    Tapped,
    /// Budget spent; nothing was sent to the device.
    Refused,
    Failed,
}

pub struct Session {
    transport: Arc<dyn DeviceTransport>,
    budget: ActionBudget,
    audit: AuditLog,
    timing: TimingConfig,
    capture: CapturePolicy,
}

impl Session {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        budget: ActionBudget,
        audit: AuditLog,
        timing: TimingConfig,
        capture: CapturePolicy,
    ) -> Self {
        tracing::info!(
            session_id = audit.session_id(),
            budget = budget.limit(),
            "session started"
        );
        Self {
            transport,
            budget,
            audit,
            timing,
            capture,
        }
    }

    pub fn budget(&self) -> &ActionBudget {
        &self.budget
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn capture_policy(&self) -> &CapturePolicy {
        &self.capture
    }

    pub fn record(&mut self, phase: &str, event: AuditEvent) {
        self.audit.record(phase, event);
    }

    /// Capture with the session's retry policy.
    pub async fn capture(&mut self, phase: &str) -> CaptureStatus {
        let status = capture_with_retry(self.transport.as_ref(), &self.capture).await;
        self.record_capture(phase, &status);
        status
    }

    /// A single capture attempt, for loops that count attempts themselves.
    pub async fn capture_once(&mut self, phase: &str) -> CaptureStatus {
        let status = capture_once(self.transport.as_ref(), self.capture.min_dimension).await;
        self.record_capture(phase, &status);
        status
    }

    fn record_capture(&mut self, phase: &str, status: &CaptureStatus) {
        self.audit.record(
            phase,
            AuditEvent::Capture {
                ok: matches!(status, CaptureStatus::Captured(_)),
                detail: status.failure_reason(),
            },
        );
    }

    /// Runs `pipeline` over `frame` and audits the pass.
    pub async fn detect(
        &mut self,
        phase: &str,
        pipeline: &DetectionPipeline,
        frame: &Frame,
    ) -> TapClawResult<Vec<Detection>> {
        let result = pipeline.detect(frame).await;
        let (count, error) = match &result {
            Ok(dets) => (Some(dets.len()), None),
            Err(e) => {
                tracing::warn!(backend = pipeline.backend_name(), error = %e, "detection failed");
                (None, Some(e.to_string()))
            }
        };
        self.audit.record(
            phase,
            AuditEvent::Detection {
                backend: pipeline.backend_name().to_string(),
                count,
                error,
            },
        );
        result
    }

    /// Taps `target` and waits the tap settle time when it went through.
    pub async fn tap(&mut self, phase: &str, target: &Target) -> TapOutcome {
        let settle = self.timing.after_tap;
        self.tap_then_settle(phase, target, settle).await
    }

    pub async fn tap_then_settle(
        &mut self,
        phase: &str,
        target: &Target,
        settle: Duration,
    ) -> TapOutcome {
        let was_exhausted = self.budget.is_exhausted();
        let outcome = match act(self.transport.as_ref(), target, &mut self.budget).await {
            true => TapOutcome::Tapped,
            false if was_exhausted => TapOutcome::Refused,
            false => TapOutcome::Failed,
        };

        let (x, y) = target.centroid;
        self.audit.record(
            phase,
            AuditEvent::Tap {
                x,
                y,
                confidence: target.detection.confidence,
                label: target.detection.label.to_string(),
                result: format!("{outcome:?}").to_lowercase(),
            },
        );

        if outcome == TapOutcome::Tapped {
            self.settle(settle).await;
        }
        outcome
    }

    /// Presses `key` and waits its settle time. Key presses do not consume
    /// the action budget.
    pub async fn press(&mut self, phase: &str, key: DeviceKey) -> bool {
        let ok = match self.transport.press_key(key).await {
            Ok(()) => {
                tracing::info!(key = key.keycode(), "key pressed");
                true
            }
            Err(e) => {
                tracing::warn!(key = key.keycode(), error = %e, "key press failed");
                false
            }
        };
        self.audit.record(phase, AuditEvent::Key { key, ok });

        let settle = match key {
            DeviceKey::Back => self.timing.after_back,
            DeviceKey::Home | DeviceKey::AppSwitch => self.timing.after_home,
        };
        self.settle(settle).await;
        ok
    }

    pub async fn settle(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
