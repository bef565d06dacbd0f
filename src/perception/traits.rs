use image::DynamicImage;

use crate::errors::TapClawResult;
use crate::perception::types::RawDetections;

/// Strategy trait for on-screen element detection.
/// Three implementations: ONNX/YOLO objects, Tesseract OCR text, template matching.
///
/// Inference is CPU-bound and blocking; callers run it on the blocking pool.
/// Implementations guard their own mutable model state.
pub trait DetectionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn infer(&self, image: &DynamicImage) -> TapClawResult<RawDetections>;
}
