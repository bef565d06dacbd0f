//! Detection pipeline: one backend, then normalization, box resolution and an
//! optional debug artifact. Inference runs on the blocking pool.
use std::sync::Arc;

use crate::artifacts::{ArtifactSink, NullSink};
use crate::errors::{TapClawError, TapClawResult};
use crate::perception::normalizer::normalize;
use crate::perception::resolver::{resolve, ResolverConfig};
use crate::perception::traits::DetectionBackend;
use crate::perception::types::{Detection, Frame};

#[derive(Clone)]
pub struct DetectionPipeline {
    backend: Arc<dyn DetectionBackend>,
    confidence_threshold: f32,
    resolver: ResolverConfig,
    sink: Arc<dyn ArtifactSink>,
}

impl DetectionPipeline {
    pub fn new(
        backend: Arc<dyn DetectionBackend>,
        confidence_threshold: f32,
        resolver: ResolverConfig,
    ) -> Self {
        Self {
            backend,
            confidence_threshold,
            resolver,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Runs one detection pass over `frame`.
    ///
    /// Returns the resolved detections in resolver order. An empty result
    /// means nothing on screen passed the filters.
    pub async fn detect(&self, frame: &Frame) -> TapClawResult<Vec<Detection>> {
        let backend = Arc::clone(&self.backend);
        let image = Arc::clone(&frame.image);
        let raw = tokio::task::spawn_blocking(move || backend.infer(&image))
            .await
            .map_err(|e| TapClawError::Detection(format!("inference task: {e}")))??;

        let normalized: Vec<Detection> =
            normalize(&raw, frame.width(), frame.height(), self.confidence_threshold).collect();
        let kept_after_filter = normalized.len();
        let resolved = resolve(normalized, &self.resolver);

        tracing::debug!(
            backend = self.backend.name(),
            raw = raw.len(),
            above_threshold = kept_after_filter,
            resolved = resolved.len(),
            "detection pass"
        );

        self.sink.record(self.backend.name(), &frame.image, &resolved);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{Label, RawDetections, RawObject, RawText};
    use crate::testing::{solid_frame, StaticBackend};

    fn obj(center: [f32; 4], confidence: f32, class_id: u32) -> RawObject {
        RawObject {
            center,
            confidence,
            class_id,
        }
    }

    #[tokio::test]
    async fn filters_then_resolves() {
        // Big container at 0.6, nested button at 0.9, low-confidence noise at 0.1.
        let backend = StaticBackend::always(RawDetections::Objects(vec![
            obj([0.5, 0.5, 0.8, 0.8], 0.6, 0),
            obj([0.5, 0.5, 0.1, 0.1], 0.9, 1),
            obj([0.1, 0.9, 0.05, 0.05], 0.1, 2),
        ]));
        let pipeline = DetectionPipeline::new(Arc::new(backend), 0.3, ResolverConfig::default());

        let dets = pipeline.detect(&solid_frame(200, 400, 128)).await.unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, Label::Class(1));
        assert!((dets[0].bbox.x1 - 90.0).abs() < 1e-3);
        assert!((dets[0].bbox.y2 - 220.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn ocr_lines_keep_their_text() {
        let backend = StaticBackend::always(RawDetections::Text(vec![RawText {
            quad: [[10.0, 10.0], [60.0, 12.0], [62.0, 30.0], [8.0, 28.0]],
            text: " 跳过 ".into(),
            score: None,
        }]));
        let pipeline = DetectionPipeline::new(Arc::new(backend), 0.5, ResolverConfig::default());
        let dets = pipeline.detect(&solid_frame(200, 200, 0)).await.unwrap();
        assert_eq!(dets[0].label.text(), Some("跳过"));
        assert_eq!(dets[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn backend_errors_propagate() {
        let backend = StaticBackend::failing("model exploded");
        let pipeline = DetectionPipeline::new(Arc::new(backend), 0.3, ResolverConfig::default());
        let err = pipeline.detect(&solid_frame(120, 120, 0)).await.unwrap_err();
        assert!(matches!(err, TapClawError::Detection(_)));
    }
}
