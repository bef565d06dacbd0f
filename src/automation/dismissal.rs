//! Startup overlay dismissal: find consent dialogs, ads and permission
//! prompts by their OCR text and tap them away until none remain.
use std::sync::Arc;
use std::time::Duration;

use crate::automation::audit::AuditEvent;
use crate::automation::session::{Session, TapOutcome};
use crate::perception::pipeline::DetectionPipeline;
use crate::perception::resolver::{PriorityKey, ResolverConfig};
use crate::perception::selector::{select, KeywordSet, SelectionPolicy};
use crate::perception::traits::DetectionBackend;

const PHASE: &str = "dismissal";

/// Keywords of the overlays seen on a typical Android app launch.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "跳过.*",
    "确认",
    "始终允许",
    "同意.*继续",
    "确定",
    "是",
    "进入",
    "X",
    "同意",
];

#[derive(Debug, Clone)]
pub struct DismissalConfig {
    pub keywords: KeywordSet,
    pub max_attempts: u32,
    /// Pause after each cycle's taps.
    pub cycle_interval: Duration,
    /// Pause between taps within one cycle.
    pub tap_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissalOutcome {
    /// A pass found nothing left to dismiss.
    Cleared { cycles: u32, taps: u32 },
    GaveUp { cycles: u32, taps: u32 },
    /// The session budget refused a tap.
    BudgetExhausted { cycles: u32, taps: u32 },
}

impl DismissalOutcome {
    pub fn taps(&self) -> u32 {
        match self {
            DismissalOutcome::Cleared { taps, .. }
            | DismissalOutcome::GaveUp { taps, .. }
            | DismissalOutcome::BudgetExhausted { taps, .. } => *taps,
        }
    }
}

/// OCR pipeline for the dismissal loop. Text lines reach keyword matching
/// unresolved: a button label may enclose or overlap other text.
pub fn overlay_pipeline(
    backend: Arc<dyn DetectionBackend>,
    confidence_threshold: f32,
) -> DetectionPipeline {
    let resolver = ResolverConfig {
        containment: false,
        overlap_threshold: None,
        priority: PriorityKey::Confidence,
    };
    DetectionPipeline::new(backend, confidence_threshold, resolver)
}

pub async fn dismiss_overlays(
    session: &mut Session,
    ocr: &DetectionPipeline,
    config: &DismissalConfig,
) -> DismissalOutcome {
    let policy = SelectionPolicy::TextMatch(config.keywords.clone());
    let mut taps = 0;

    for cycle in 1..=config.max_attempts {
        let Some(frame) = session.capture(PHASE).await.into_frame() else {
            tracing::warn!(cycle, "dismissal capture failed");
            session.settle(config.cycle_interval).await;
            continue;
        };
        let detections = match session.detect(PHASE, ocr, &frame).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(cycle, error = %e, "overlay detection failed");
                session.settle(config.cycle_interval).await;
                continue;
            }
        };

        let targets = select(&detections, &policy);
        if targets.is_empty() {
            tracing::info!(cycle, taps, "no overlays left");
            let outcome = DismissalOutcome::Cleared { cycles: cycle, taps };
            record_outcome(session, &outcome);
            return outcome;
        }

        tracing::info!(cycle, matches = targets.len(), "dismissing overlays");
        for target in &targets {
            match session.tap_then_settle(PHASE, target, config.tap_interval).await {
                TapOutcome::Tapped => taps += 1,
                TapOutcome::Failed => session.settle(config.tap_interval).await,
                TapOutcome::Refused => {
                    let outcome = DismissalOutcome::BudgetExhausted { cycles: cycle, taps };
                    record_outcome(session, &outcome);
                    return outcome;
                }
            }
        }
        session.settle(config.cycle_interval).await;
    }

    tracing::warn!(attempts = config.max_attempts, taps, "overlays still present; giving up");
    let outcome = DismissalOutcome::GaveUp {
        cycles: config.max_attempts,
        taps,
    };
    record_outcome(session, &outcome);
    outcome
}

fn record_outcome(session: &mut Session, outcome: &DismissalOutcome) {
    session.record(
        PHASE,
        AuditEvent::Outcome {
            summary: format!("{outcome:?}"),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{RawDetections, RawText};
    use crate::testing::{home_screen, session_with, FakeTransport, Screen, StaticBackend};

    fn line(text: &str, x: f32, y: f32) -> RawText {
        RawText {
            quad: [[x, y], [x + 40.0, y], [x + 40.0, y + 20.0], [x, y + 20.0]],
            text: text.into(),
            score: Some(0.9),
        }
    }

    fn config(max_attempts: u32) -> DismissalConfig {
        DismissalConfig {
            keywords: KeywordSet::new(DEFAULT_KEYWORDS).unwrap(),
            max_attempts,
            cycle_interval: Duration::from_secs(3),
            tap_interval: Duration::from_secs(1),
        }
    }

    fn ocr(responses: Vec<RawDetections>) -> (Arc<StaticBackend>, DetectionPipeline) {
        let backend = Arc::new(StaticBackend::sequence(responses.into_iter().map(Ok).collect()));
        let pipeline = overlay_pipeline(backend.clone(), 0.0);
        (backend, pipeline)
    }

    #[tokio::test(start_paused = true)]
    async fn taps_matches_until_the_screen_is_clear() {
        let t = Arc::new(FakeTransport::showing(&home_screen(200, 400)));
        let mut s = session_with(Arc::clone(&t), 10);
        let (_, pipeline) = ocr(vec![
            RawDetections::Text(vec![
                line("跳过 3s", 150.0, 20.0),
                line("Welcome", 20.0, 200.0),
            ]),
            RawDetections::Text(vec![line("同意并继续", 60.0, 300.0)]),
            RawDetections::Text(vec![line("Welcome", 20.0, 200.0)]),
        ]);
        let start = tokio::time::Instant::now();

        let outcome = dismiss_overlays(&mut s, &pipeline, &config(10)).await;

        assert_eq!(outcome, DismissalOutcome::Cleared { cycles: 3, taps: 2 });
        assert_eq!(t.taps(), vec![(170, 30), (80, 310)]);
        // Two cycles with one tap each: (1s + 3s) * 2.
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_overlays_keep_coming() {
        let t = Arc::new(FakeTransport::showing(&home_screen(200, 400)));
        let mut s = session_with(Arc::clone(&t), 100);
        let (backend, pipeline) = ocr(vec![RawDetections::Text(vec![line("确定", 10.0, 10.0)])]);

        let outcome = dismiss_overlays(&mut s, &pipeline, &config(4)).await;

        assert_eq!(outcome, DismissalOutcome::GaveUp { cycles: 4, taps: 4 });
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_the_budget_refuses() {
        let t = Arc::new(FakeTransport::showing(&home_screen(200, 400)));
        let mut s = session_with(Arc::clone(&t), 1);
        let (_, pipeline) = ocr(vec![RawDetections::Text(vec![
            line("确认", 10.0, 10.0),
            line("始终允许", 10.0, 100.0),
        ])]);

        let outcome = dismiss_overlays(&mut s, &pipeline, &config(10)).await;

        assert_eq!(outcome, DismissalOutcome::BudgetExhausted { cycles: 1, taps: 1 });
        assert_eq!(t.taps().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failures_consume_cycles() {
        let t = Arc::new(FakeTransport::new(vec![Screen::Fail("adb hiccup".into())]));
        let mut s = session_with(Arc::clone(&t), 5);
        let (backend, pipeline) = ocr(vec![RawDetections::Text(vec![])]);

        let outcome = dismiss_overlays(&mut s, &pipeline, &config(2)).await;

        assert_eq!(outcome, DismissalOutcome::GaveUp { cycles: 2, taps: 0 });
        assert_eq!(backend.calls(), 0);
        // Three capture attempts per cycle.
        assert_eq!(t.capture_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn keyword_line_enclosing_other_text_is_still_tapped() {
        let t = Arc::new(FakeTransport::showing(&home_screen(200, 400)));
        let mut s = session_with(Arc::clone(&t), 10);
        let button = RawText {
            quad: [[10.0, 100.0], [190.0, 100.0], [190.0, 160.0], [10.0, 160.0]],
            text: "同意并继续".into(),
            score: Some(0.8),
        };
        let icon = RawText {
            quad: [[20.0, 110.0], [60.0, 110.0], [60.0, 130.0], [20.0, 130.0]],
            text: "i".into(),
            score: Some(0.95),
        };
        let (_, pipeline) = ocr(vec![
            RawDetections::Text(vec![button, icon]),
            RawDetections::Text(vec![]),
        ]);

        let outcome = dismiss_overlays(&mut s, &pipeline, &config(5)).await;

        assert_eq!(outcome, DismissalOutcome::Cleared { cycles: 2, taps: 1 });
        assert_eq!(t.taps(), vec![(100, 130)]);
    }

    #[tokio::test(start_paused = true)]
    async fn detection_failures_consume_cycles() {
        let t = Arc::new(FakeTransport::showing(&home_screen(200, 400)));
        let mut s = session_with(Arc::clone(&t), 5);
        let backend = Arc::new(StaticBackend::failing("tesseract crashed"));
        let pipeline = overlay_pipeline(backend.clone(), 0.0);
        let start = tokio::time::Instant::now();

        let outcome = dismiss_overlays(&mut s, &pipeline, &config(3)).await;

        assert_eq!(outcome, DismissalOutcome::GaveUp { cycles: 3, taps: 0 });
        assert_eq!(backend.calls(), 3);
        assert_eq!(t.capture_count(), 3);
        assert!(t.taps().is_empty());
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_taps_still_pause_between_targets() {
        let t = Arc::new(FakeTransport::showing(&home_screen(200, 400)));
        t.fail_taps(true);
        let mut s = session_with(Arc::clone(&t), 5);
        let (_, pipeline) = ocr(vec![RawDetections::Text(vec![
            line("确认", 10.0, 10.0),
            line("始终允许", 10.0, 100.0),
        ])]);
        let start = tokio::time::Instant::now();

        let outcome = dismiss_overlays(&mut s, &pipeline, &config(1)).await;

        assert_eq!(outcome, DismissalOutcome::GaveUp { cycles: 1, taps: 0 });
        assert_eq!(s.budget().count(), 0);
        // Two failed taps at 1s each, then the 3s cycle pause.
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
