//! Automation programs built from the core loop: single decision cycles,
//! ordered type sequences, repeated best-target taps, full-screen sweeps and
//! overlay dismissal.
//!
//! None of these abort: every failure ends up in the returned report.
use serde::{Deserialize, Serialize};

use crate::automation::audit::AuditEvent;
use crate::automation::convergence::{converge, ConvergenceConfig};
use crate::automation::dismissal::{dismiss_overlays, DismissalConfig};
use crate::automation::session::{Session, TapOutcome};
use crate::device::transport::DeviceKey;
use crate::perception::pipeline::DetectionPipeline;
use crate::perception::selector::{select, SelectionPolicy};
use crate::perception::similarity::ReferenceState;
use crate::perception::types::Target;

/// Result of one capture → detect → select → act cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum FindOutcome {
    Acted(Target),
    NothingToDo,
    CaptureFailed(String),
    DetectFailed(String),
    /// The transport rejected the tap.
    TapFailed(Target),
    /// The action budget was already spent; the device was not touched.
    Refused,
}

pub async fn find_and_tap(
    session: &mut Session,
    pipeline: &DetectionPipeline,
    policy: &SelectionPolicy,
) -> FindOutcome {
    const PHASE: &str = "find_and_tap";

    if session.budget().is_exhausted() {
        tracing::warn!(limit = session.budget().limit(), "action budget exhausted; skipping cycle");
        return FindOutcome::Refused;
    }

    let status = session.capture(PHASE).await;
    let reason = status.failure_reason();
    let Some(frame) = status.into_frame() else {
        return FindOutcome::CaptureFailed(reason.unwrap_or_default());
    };

    let detections = match session.detect(PHASE, pipeline, &frame).await {
        Ok(d) => d,
        Err(e) => return FindOutcome::DetectFailed(e.to_string()),
    };

    let Some(target) = select(&detections, policy).into_iter().next() else {
        tracing::info!(detections = detections.len(), policy = ?policy, "no eligible target");
        return FindOutcome::NothingToDo;
    };

    match session.tap(PHASE, &target).await {
        TapOutcome::Tapped => FindOutcome::Acted(target),
        TapOutcome::Failed => FindOutcome::TapFailed(target),
        TapOutcome::Refused => FindOutcome::Refused,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SequenceReport {
    pub attempted: u32,
    pub succeeded: u32,
    /// The budget ran out before every type was tried.
    pub stopped_early: bool,
}

/// Taps the first detection of each class id in `types`, in order.
pub async fn run_type_sequence(
    session: &mut Session,
    pipeline: &DetectionPipeline,
    types: &[u32],
) -> SequenceReport {
    let mut report = SequenceReport::default();
    for &type_id in types {
        if session.budget().is_exhausted() {
            report.stopped_early = true;
            break;
        }
        report.attempted += 1;
        match find_and_tap(session, pipeline, &SelectionPolicy::ByType(type_id)).await {
            FindOutcome::Acted(_) => report.succeeded += 1,
            FindOutcome::Refused => {
                report.stopped_early = true;
                break;
            }
            other => tracing::info!(type_id, outcome = ?other, "type not tapped"),
        }
    }
    session.record(
        "type_sequence",
        AuditEvent::Outcome {
            summary: format!("{report:?}"),
        },
    );
    report
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepeatReport {
    pub total: u32,
    pub successes: u32,
}

/// Runs `iterations` cycles that each tap the most confident detection.
pub async fn repeat_highest(
    session: &mut Session,
    pipeline: &DetectionPipeline,
    iterations: u32,
) -> RepeatReport {
    let mut report = RepeatReport::default();
    for iteration in 1..=iterations {
        if session.budget().is_exhausted() {
            tracing::info!(iteration, "budget spent; stopping repetitions");
            break;
        }
        report.total += 1;
        match find_and_tap(session, pipeline, &SelectionPolicy::HighestConfidence).await {
            FindOutcome::Acted(_) => report.successes += 1,
            other => tracing::info!(iteration, outcome = ?other, "repetition without tap"),
        }
    }
    session.record(
        "repeat_highest",
        AuditEvent::Outcome {
            summary: format!("{report:?}"),
        },
    );
    report
}

/// How a sweep gets back to its starting screen after each tap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMode {
    /// Press HOME.
    #[default]
    Home,
    /// Press BACK until the screen matches the one captured at the start.
    Reference,
}

pub struct SweepOptions<'a> {
    pub policy: SelectionPolicy,
    pub return_mode: ReturnMode,
    pub convergence: ConvergenceConfig,
    /// OCR pipeline and settings for clearing overlays after each tap.
    pub dismissal: Option<(&'a DetectionPipeline, &'a DismissalConfig)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub targets: u32,
    pub tapped: u32,
    pub returned: u32,
    pub failed_to_return: u32,
    pub refused: bool,
    /// Why the sweep could not start.
    pub aborted: Option<String>,
}

/// Detects once on the current screen, then visits every selected target:
/// tap, optionally clear overlays, and return.
pub async fn sweep(
    session: &mut Session,
    pipeline: &DetectionPipeline,
    options: &SweepOptions<'_>,
) -> SweepReport {
    const PHASE: &str = "sweep";
    let mut report = SweepReport::default();

    let status = session.capture(PHASE).await;
    let reason = status.failure_reason();
    let Some(frame) = status.into_frame() else {
        report.aborted = reason;
        return finish_sweep(session, report);
    };
    let reference = ReferenceState::from_frame(&frame);

    let detections = match session.detect(PHASE, pipeline, &frame).await {
        Ok(d) => d,
        Err(e) => {
            report.aborted = Some(e.to_string());
            return finish_sweep(session, report);
        }
    };
    let targets = select(&detections, &options.policy);
    report.targets = targets.len() as u32;
    tracing::info!(targets = targets.len(), mode = ?options.return_mode, "sweep started");

    for (index, target) in targets.iter().enumerate() {
        match session.tap(PHASE, target).await {
            TapOutcome::Tapped => report.tapped += 1,
            TapOutcome::Failed => continue,
            TapOutcome::Refused => {
                report.refused = true;
                break;
            }
        }

        if let Some((ocr, config)) = options.dismissal {
            let outcome = dismiss_overlays(session, ocr, config).await;
            tracing::debug!(index, outcome = ?outcome, "overlays handled");
        }

        let back = match options.return_mode {
            ReturnMode::Home => session.press(PHASE, DeviceKey::Home).await,
            ReturnMode::Reference => converge(session, &reference, &options.convergence)
                .await
                .is_converged(),
        };
        if back {
            report.returned += 1;
        } else {
            report.failed_to_return += 1;
            tracing::warn!(index, x = target.centroid.0, y = target.centroid.1, "did not return after tap");
        }
    }

    finish_sweep(session, report)
}

fn finish_sweep(session: &mut Session, report: SweepReport) -> SweepReport {
    session.record(
        "sweep",
        AuditEvent::Outcome {
            summary: format!("{report:?}"),
        },
    );
    report
}
