use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::automation::convergence::ConvergenceConfig;
use crate::automation::dismissal::{DismissalConfig, DEFAULT_KEYWORDS};
use crate::automation::scenario::ReturnMode;
use crate::automation::session::TimingConfig;
use crate::device::capture::CapturePolicy;
use crate::errors::{TapClawError, TapClawResult};
use crate::perception::resolver::{PriorityKey, ResolverConfig};
use crate::perception::selector::KeywordSet;
use crate::perception::template::TemplateOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub capture: CaptureConfig,
    pub detector: DetectorConfig,
    pub ocr: OcrConfig,
    pub template: TemplateConfig,
    pub actions: ActionsConfig,
    pub timing: SettleConfig,
    pub convergence: ConvergenceConfig,
    pub dismissal: DismissalSettings,
    pub run: RunConfig,
    pub artifacts: ArtifactsConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_adb")]
    pub adb_path: String,
    /// `adb -s` serial; `None` lets adb pick the only attached device.
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb(),
            serial: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_adb() -> String {
    "adb".into()
}

fn default_command_timeout() -> u64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub retries: u32,
    pub backoff_ms: u64,
    pub min_dimension: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_ms: 1000,
            min_dimension: 100,
        }
    }
}

impl CaptureConfig {
    pub fn policy(&self) -> CapturePolicy {
        CapturePolicy {
            retries: self.retries,
            backoff: Duration::from_millis(self.backoff_ms),
            min_dimension: self.min_dimension,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub input_size: u32,
    /// Detections below this never reach selection.
    pub confidence_threshold: f32,
    /// Raw model proposals below this are dropped before NMS.
    pub model_min_score: f32,
    pub iou_threshold: f32,
    pub containment: bool,
    pub overlap_suppression: bool,
    pub overlap_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/best.onnx"),
            input_size: 640,
            confidence_threshold: 0.3,
            model_min_score: 0.25,
            iou_threshold: 0.45,
            containment: true,
            overlap_suppression: true,
            overlap_threshold: 0.3,
        }
    }
}

impl DetectorConfig {
    pub fn resolver(&self, priority: PriorityKey) -> ResolverConfig {
        ResolverConfig {
            containment: self.containment,
            overlap_threshold: self.overlap_suppression.then_some(self.overlap_threshold),
            priority,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub binary: String,
    /// Tesseract `-l` argument.
    pub languages: String,
    pub page_seg_mode: u8,
    pub confidence_threshold: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".into(),
            languages: "chi_sim+eng".into(),
            page_seg_mode: 11,
            confidence_threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub path: Option<PathBuf>,
    pub threshold: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub scale_steps: u32,
    pub work_width: u32,
    pub stride: u32,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        let o = TemplateOptions::default();
        Self {
            path: None,
            threshold: o.threshold,
            min_scale: o.min_scale,
            max_scale: o.max_scale,
            scale_steps: o.scale_steps,
            work_width: o.work_width,
            stride: o.stride,
        }
    }
}

impl TemplateConfig {
    pub fn options(&self) -> TemplateOptions {
        TemplateOptions {
            threshold: self.threshold,
            min_scale: self.min_scale,
            max_scale: self.max_scale,
            scale_steps: self.scale_steps,
            work_width: self.work_width,
            stride: self.stride,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Session-wide tap budget.
    pub max_taps: u32,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self { max_taps: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub after_tap_ms: u64,
    pub after_back_ms: u64,
    pub after_home_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        let t = TimingConfig::default();
        Self {
            after_tap_ms: t.after_tap.as_millis() as u64,
            after_back_ms: t.after_back.as_millis() as u64,
            after_home_ms: t.after_home.as_millis() as u64,
        }
    }
}

impl SettleConfig {
    pub fn timing(&self) -> TimingConfig {
        TimingConfig {
            after_tap: Duration::from_millis(self.after_tap_ms),
            after_back: Duration::from_millis(self.after_back_ms),
            after_home: Duration::from_millis(self.after_home_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DismissalSettings {
    pub keywords: Vec<String>,
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub tap_interval_ms: u64,
}

impl Default for DismissalSettings {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            max_attempts: 10,
            interval_ms: 3000,
            tap_interval_ms: 1000,
        }
    }
}

impl DismissalSettings {
    pub fn build(&self) -> TapClawResult<DismissalConfig> {
        Ok(DismissalConfig {
            keywords: KeywordSet::new(&self.keywords)?,
            max_attempts: self.max_attempts,
            cycle_interval: Duration::from_millis(self.interval_ms),
            tap_interval: Duration::from_millis(self.tap_interval_ms),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    FindAndTap,
    TypeSequence,
    RepeatHighest,
    #[default]
    Sweep,
    Dismiss,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    #[default]
    Yolo,
    Ocr,
    Template,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    ByType,
    HighestConfidence,
    #[default]
    AllByConfidence,
    InOrder,
    TextMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub scenario: ScenarioKind,
    /// Backend used to find targets.
    pub detector: DetectorKind,
    /// Policy for `find_and_tap` and `sweep`.
    pub policy: PolicyKind,
    /// Class id for the `by_type` policy.
    pub type_id: u32,
    /// Class ids visited by `type_sequence`.
    pub types: Vec<u32>,
    pub iterations: u32,
    /// Patterns for the `text_match` policy.
    pub keywords: Vec<String>,
    pub return_mode: ReturnMode,
    pub dismiss_after_tap: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scenario: ScenarioKind::default(),
            detector: DetectorKind::default(),
            policy: PolicyKind::default(),
            type_id: 0,
            types: vec![0, 1, 2],
            iterations: 5,
            keywords: Vec::new(),
            return_mode: ReturnMode::default(),
            dismiss_after_tap: false,
        }
    }
}

impl RunConfig {
    /// Whether the run clears overlays with the OCR keyword loop.
    pub fn dismisses_overlays(&self) -> bool {
        self.scenario == ScenarioKind::Dismiss
            || (self.scenario == ScenarioKind::Sweep && self.dismiss_after_tap)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("artifacts"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Defaults to `<data_local_dir>/tapclaw/sessions`.
    pub dir: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Rejects settings that would make the run meaningless or crash later.
    pub fn validate(&self) -> TapClawResult<()> {
        let unit = [
            ("detector.confidence_threshold", self.detector.confidence_threshold as f64),
            ("detector.model_min_score", self.detector.model_min_score as f64),
            ("detector.iou_threshold", self.detector.iou_threshold as f64),
            ("detector.overlap_threshold", self.detector.overlap_threshold as f64),
            ("ocr.confidence_threshold", self.ocr.confidence_threshold as f64),
            ("template.threshold", self.template.threshold as f64),
            ("convergence.similarity_threshold", self.convergence.similarity_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(TapClawError::Config(format!("{name} must be within [0, 1], got {value}")));
            }
        }

        if self.detector.input_size == 0 {
            return Err(TapClawError::Config("detector.input_size must be positive".into()));
        }
        if self.capture.retries == 0 {
            return Err(TapClawError::Config("capture.retries must be at least 1".into()));
        }
        if self.template.min_scale <= 0.0 || self.template.max_scale < self.template.min_scale {
            return Err(TapClawError::Config(
                "template scales must satisfy 0 < min_scale <= max_scale".into(),
            ));
        }
        if self.template.scale_steps == 0 {
            return Err(TapClawError::Config("template.scale_steps must be at least 1".into()));
        }

        KeywordSet::new(&self.dismissal.keywords)?;
        KeywordSet::new(&self.run.keywords)?;

        let run = &self.run;
        if run.policy == PolicyKind::TextMatch && run.scenario != ScenarioKind::Dismiss {
            if run.detector != DetectorKind::Ocr {
                return Err(TapClawError::Config("text_match policy needs the ocr detector".into()));
            }
            if run.keywords.is_empty() {
                return Err(TapClawError::Config("text_match policy needs run.keywords".into()));
            }
        }

        if run.scenario != ScenarioKind::Dismiss {
            match run.detector {
                DetectorKind::Yolo if !self.detector.model_path.exists() => {
                    return Err(TapClawError::Config(format!(
                        "YOLO model not found: {}",
                        self.detector.model_path.display()
                    )));
                }
                DetectorKind::Template => match &self.template.path {
                    Some(p) if p.exists() => {}
                    Some(p) => {
                        return Err(TapClawError::Config(format!(
                            "template image not found: {}",
                            p.display()
                        )))
                    }
                    None => {
                        return Err(TapClawError::Config(
                            "template detector needs template.path".into(),
                        ))
                    }
                },
                _ => {}
            }
        }
        Ok(())
    }

    /// `TAPCLAW_DEVICE_SERIAL` replaces `device.serial` when set and non-empty.
    pub fn apply_env_overrides(&mut self, serial: Option<String>) {
        if let Some(serial) = serial.filter(|s| !s.trim().is_empty()) {
            tracing::info!(serial = %serial, "device serial taken from environment");
            self.device.serial = Some(serial.trim().to_string());
        }
    }
}

fn resolve_config_path() -> TapClawResult<Option<PathBuf>> {
    if let Ok(explicit) = std::env::var("TAPCLAW_CONFIG") {
        let path = PathBuf::from(explicit);
        if !path.exists() {
            return Err(TapClawError::Config(format!(
                "TAPCLAW_CONFIG points to a missing file: {}",
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(Some(candidate));
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(Some(candidate));
    }

    Ok(None)
}

pub fn load_config_from(path: &Path) -> TapClawResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        scenario = ?config.run.scenario,
        detector = ?config.run.detector,
        "config loaded"
    );
    Ok(config)
}

/// Loads `config.toml` (or the defaults when there is none) and applies
/// environment overrides.
pub fn load_config() -> TapClawResult<AppConfig> {
    let mut config = match resolve_config_path()? {
        Some(path) => load_config_from(&path)?,
        None => {
            tracing::info!("no config.toml found; using built-in defaults");
            AppConfig::default()
        }
    };
    config.apply_env_overrides(std::env::var("TAPCLAW_DEVICE_SERIAL").ok());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> AppConfig {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let c = parse("");
        assert_eq!(c.actions.max_taps, 5);
        assert_eq!(c.capture.retries, 3);
        assert_eq!(c.convergence.max_attempts, 5);
        assert_eq!(c.dismissal.keywords.len(), DEFAULT_KEYWORDS.len());
        assert_eq!(c.run.scenario, ScenarioKind::Sweep);
        assert_eq!(c.timing.timing().after_tap, Duration::from_secs(2));
        assert!(c.audit.enabled);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let c = parse(
            r#"
            [device]
            serial = "R58M123"

            [run]
            scenario = "type_sequence"
            types = [2, 0]
            return_mode = "reference"

            [convergence]
            max_attempts = 3
            "#,
        );
        assert_eq!(c.device.serial.as_deref(), Some("R58M123"));
        assert_eq!(c.device.adb_path, "adb");
        assert_eq!(c.run.types, vec![2, 0]);
        assert_eq!(c.run.return_mode, ReturnMode::Reference);
        assert_eq!(c.convergence.max_attempts, 3);
        assert!((c.convergence.similarity_threshold - 0.95).abs() < 1e-12);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[run\nscenario = ").unwrap();
        assert!(matches!(load_config_from(&path), Err(TapClawError::TomlDe(_))));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut c = AppConfig::default();
        c.run.scenario = ScenarioKind::Dismiss;
        assert!(c.validate().is_ok());

        let mut bad = c.clone();
        bad.detector.confidence_threshold = 1.5;
        assert!(matches!(bad.validate(), Err(TapClawError::Config(_))));

        let mut bad = c.clone();
        bad.dismissal.keywords.push("同意(".into());
        assert!(matches!(bad.validate(), Err(TapClawError::Pattern(_))));

        let mut bad = c.clone();
        bad.detector.input_size = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn detector_files_must_exist() {
        let mut c = AppConfig::default();
        c.detector.model_path = PathBuf::from("/nonexistent/model.onnx");
        assert!(c.validate().is_err());

        c.run.detector = DetectorKind::Template;
        assert!(c.validate().is_err());

        let tmp = tempfile::tempdir().unwrap();
        let tpl = tmp.path().join("close.png");
        std::fs::write(&tpl, b"png").unwrap();
        c.template.path = Some(tpl);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn text_match_requires_ocr_and_keywords() {
        let mut c = AppConfig::default();
        c.run.scenario = ScenarioKind::FindAndTap;
        c.run.detector = DetectorKind::Ocr;
        c.run.policy = PolicyKind::TextMatch;
        assert!(c.validate().is_err());
        c.run.keywords = vec!["允许".into()];
        assert!(c.validate().is_ok());
        assert!(!c.run.dismisses_overlays());
        c.run.scenario = ScenarioKind::Sweep;
        c.run.dismiss_after_tap = true;
        assert!(c.run.dismisses_overlays());
    }

    #[test]
    fn env_serial_overrides_config() {
        let mut c = AppConfig::default();
        c.apply_env_overrides(Some("  emulator-5554 ".into()));
        assert_eq!(c.device.serial.as_deref(), Some("emulator-5554"));
        c.apply_env_overrides(Some(String::new()));
        assert_eq!(c.device.serial.as_deref(), Some("emulator-5554"));
        c.apply_env_overrides(None);
        assert_eq!(c.device.serial.as_deref(), Some("emulator-5554"));
    }
}
