pub mod artifacts;
pub mod automation;
pub mod config;
pub mod device;
pub mod errors;
pub mod executor;
pub mod perception;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use crate::artifacts::{ArtifactSink, DirectorySink, NullSink};
use crate::automation::audit::{AuditEvent, AuditLog};
use crate::automation::dismissal::{dismiss_overlays, overlay_pipeline};
use crate::automation::scenario::{
    find_and_tap, repeat_highest, run_type_sequence, sweep, SweepOptions,
};
use crate::automation::session::Session;
use crate::config::{AppConfig, DetectorKind, PolicyKind, ScenarioKind};
use crate::device::adb::AdbTransport;
use crate::errors::{TapClawError, TapClawResult};
use crate::executor::budget::ActionBudget;
use crate::perception::ocr::TesseractOcr;
use crate::perception::pipeline::DetectionPipeline;
use crate::perception::resolver::PriorityKey;
use crate::perception::selector::{KeywordSet, SelectionPolicy};
use crate::perception::template::TemplateMatcher;
use crate::perception::yolo_detector::YoloBackend;

/// Entry point: sets up logging and configuration, then runs the configured
/// scenario once. Only startup problems are returned as errors.
pub async fn run() -> TapClawResult<()> {
    // Load .env first so RUST_LOG from it applies
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::load_config()?;
    config.validate()?;

    let sink: Arc<dyn ArtifactSink> = if config.artifacts.enabled {
        Arc::new(DirectorySink::new(&config.artifacts.dir))
    } else {
        Arc::new(NullSink)
    };

    let ocr = if config.run.dismisses_overlays() {
        let backend = Arc::new(tesseract(&config));
        let pipeline = overlay_pipeline(backend, config.ocr.confidence_threshold);
        Some(pipeline.with_sink(Arc::clone(&sink)))
    } else {
        None
    };
    let detector = match config.run.scenario {
        ScenarioKind::Dismiss => None,
        _ => Some(detection_pipeline(&config, config.run.detector, Arc::clone(&sink))?),
    };
    let policy = selection_policy(&config)?;
    let dismissal = config.dismissal.build()?;

    let transport = Arc::new(AdbTransport::new(
        &config.device.adb_path,
        config.device.serial.clone(),
        Duration::from_secs(config.device.command_timeout_secs),
    ));
    let audit = if config.audit.enabled {
        let dir = config.audit.dir.clone().unwrap_or_else(AuditLog::default_dir);
        AuditLog::persistent(&dir)
    } else {
        AuditLog::in_memory()
    };
    let mut session = Session::new(
        transport,
        ActionBudget::new(config.actions.max_taps),
        audit,
        config.timing.timing(),
        config.capture.policy(),
    );

    let summary = match (config.run.scenario, &detector) {
        (ScenarioKind::FindAndTap, Some(pipeline)) => {
            format!("{:?}", find_and_tap(&mut session, pipeline, &policy).await)
        }
        (ScenarioKind::TypeSequence, Some(pipeline)) => {
            format!("{:?}", run_type_sequence(&mut session, pipeline, &config.run.types).await)
        }
        (ScenarioKind::RepeatHighest, Some(pipeline)) => {
            format!("{:?}", repeat_highest(&mut session, pipeline, config.run.iterations).await)
        }
        (ScenarioKind::Sweep, Some(pipeline)) => {
            let options = SweepOptions {
                policy,
                return_mode: config.run.return_mode,
                convergence: config.convergence.clone(),
                dismissal: match (&ocr, config.run.dismiss_after_tap) {
                    (Some(ocr), true) => Some((ocr, &dismissal)),
                    _ => None,
                },
            };
            format!("{:?}", sweep(&mut session, pipeline, &options).await)
        }
        (ScenarioKind::Dismiss, _) => match &ocr {
            Some(ocr) => format!("{:?}", dismiss_overlays(&mut session, ocr, &dismissal).await),
            None => "ocr backend unavailable".to_string(),
        },
        (scenario, None) => format!("{scenario:?} has no detector"),
    };

    session.record("run", AuditEvent::Outcome { summary: summary.clone() });
    tracing::info!(
        scenario = ?config.run.scenario,
        taps = session.budget().count(),
        budget = session.budget().limit(),
        session_id = session.audit().session_id(),
        report = %summary,
        "run finished"
    );
    Ok(())
}

fn tesseract(config: &AppConfig) -> TesseractOcr {
    TesseractOcr::new(
        &config.ocr.binary,
        &config.ocr.languages,
        config.ocr.page_seg_mode,
    )
}

fn detection_pipeline(
    config: &AppConfig,
    kind: DetectorKind,
    sink: Arc<dyn ArtifactSink>,
) -> TapClawResult<DetectionPipeline> {
    let d = &config.detector;
    let pipeline = match kind {
        DetectorKind::Yolo => {
            let backend =
                YoloBackend::load(&d.model_path, d.input_size, d.model_min_score, d.iou_threshold)?;
            DetectionPipeline::new(
                Arc::new(backend),
                d.confidence_threshold,
                d.resolver(PriorityKey::Confidence),
            )
        }
        DetectorKind::Template => {
            let path = config.template.path.as_deref().ok_or_else(|| {
                TapClawError::Config("template detector needs template.path".into())
            })?;
            let backend = TemplateMatcher::load(path, config.template.options())?;
            // Template hits carry no confidence; the lowest hit on screen wins.
            DetectionPipeline::new(
                Arc::new(backend),
                d.confidence_threshold,
                d.resolver(PriorityKey::BottomEdge),
            )
        }
        DetectorKind::Ocr => DetectionPipeline::new(
            Arc::new(tesseract(config)),
            config.ocr.confidence_threshold,
            d.resolver(PriorityKey::Confidence),
        ),
    };
    Ok(pipeline.with_sink(sink))
}

fn selection_policy(config: &AppConfig) -> TapClawResult<SelectionPolicy> {
    let run = &config.run;
    Ok(match run.policy {
        PolicyKind::ByType => SelectionPolicy::ByType(run.type_id),
        PolicyKind::HighestConfidence => SelectionPolicy::HighestConfidence,
        PolicyKind::AllByConfidence => SelectionPolicy::AllByConfidence,
        PolicyKind::InOrder => SelectionPolicy::InOrder,
        PolicyKind::TextMatch => SelectionPolicy::TextMatch(KeywordSet::new(&run.keywords)?),
    })
}
