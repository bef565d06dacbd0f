//! ONNX YOLOv8 inference for on-screen element detection.
//!
//! Loads a YOLOv8 ONNX export and runs detection on screenshots. Output boxes
//! are centre-form and relative to the original screenshot, ready for the
//! normalizer.
use std::path::Path;
use std::sync::Mutex;

use image::DynamicImage;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::errors::{TapClawError, TapClawResult};
use crate::perception::traits::DetectionBackend;
use crate::perception::types::{RawDetections, RawObject};

/// Letterbox geometry of one preprocessed frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    pad_x: f32,
    pad_y: f32,
    scale: f32,
}

/// Holds the ONNX Runtime session and inference configuration.
pub struct YoloBackend {
    session: Mutex<Session>,
    input_size: u32,
    /// Proposals below this score never leave the model stage.
    min_score: f32,
    iou_threshold: f32,
}

impl YoloBackend {
    pub fn load(
        model_path: &Path,
        input_size: u32,
        min_score: f32,
        iou_threshold: f32,
    ) -> TapClawResult<Self> {
        if !model_path.exists() {
            return Err(TapClawError::Config(format!(
                "YOLO model not found: {}",
                model_path.display()
            )));
        }
        let session = Session::builder()
            .map_err(|e| TapClawError::Detection(format!("ort session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| TapClawError::Detection(format!("ort opt-level: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| TapClawError::Config(format!("ort load model: {e}")))?;

        tracing::info!(path = %model_path.display(), input_size, "YOLO detector loaded");
        Ok(Self {
            session: Mutex::new(session),
            input_size,
            min_score,
            iou_threshold,
        })
    }

    // ── Pre-processing ──────────────────────────────────────────────────────

    /// Resize + letterbox + normalise → NCHW f32 tensor.
    fn preprocess(&self, img: &DynamicImage) -> (Array4<f32>, Letterbox) {
        let sz = self.input_size;
        let (ow, oh) = (img.width() as f32, img.height() as f32);
        let scale = (sz as f32 / ow).min(sz as f32 / oh);
        let nw = ((ow * scale).round() as u32).clamp(1, sz);
        let nh = ((oh * scale).round() as u32).clamp(1, sz);
        let pad_x = (sz - nw) as f32 / 2.0;
        let pad_y = (sz - nh) as f32 / 2.0;

        let resized = img.resize_exact(nw, nh, image::imageops::FilterType::CatmullRom);
        let rgb = resized.to_rgb8();

        let mut canvas = image::RgbImage::from_pixel(sz, sz, image::Rgb([114, 114, 114]));
        image::imageops::overlay(&mut canvas, &rgb, pad_x.round() as i64, pad_y.round() as i64);

        let mut tensor = Array4::<f32>::zeros((1, 3, sz as usize, sz as usize));
        for (x, y, p) in canvas.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = p[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = p[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = p[2] as f32 / 255.0;
        }

        (tensor, Letterbox { pad_x, pad_y, scale })
    }

    // ── Post-processing ─────────────────────────────────────────────────────

    /// Decodes `[1, 4 + classes, proposals]` into relative centre-form boxes.
    fn postprocess(
        &self,
        output: &ndarray::ArrayViewD<f32>,
        orig_w: u32,
        orig_h: u32,
        lb: Letterbox,
    ) -> TapClawResult<Vec<RawObject>> {
        let shape = output.shape();
        if shape.len() < 3 || shape[1] <= 4 {
            return Err(TapClawError::Detection(format!(
                "unexpected output shape: {:?}",
                shape
            )));
        }
        let num_classes = shape[1] - 4;
        let num_preds = shape[2];
        let (fw, fh) = (orig_w as f32, orig_h as f32);

        let mut proposals = Vec::new();
        for i in 0..num_preds {
            let mut best_score = 0.0f32;
            let mut best_class = 0usize;
            for c in 0..num_classes {
                let s = output[[0, 4 + c, i]];
                if s > best_score {
                    best_score = s;
                    best_class = c;
                }
            }
            if best_score < self.min_score {
                continue;
            }

            // Undo letterbox → original pixel space → relative
            let cx = (output[[0, 0, i]] - lb.pad_x) / lb.scale / fw;
            let cy = (output[[0, 1, i]] - lb.pad_y) / lb.scale / fh;
            let w = output[[0, 2, i]] / lb.scale / fw;
            let h = output[[0, 3, i]] / lb.scale / fh;

            proposals.push(RawObject {
                center: [cx, cy, w, h],
                confidence: best_score,
                class_id: best_class as u32,
            });
        }

        let kept = class_nms(&proposals, self.iou_threshold);
        Ok(kept.into_iter().map(|i| proposals[i].clone()).collect())
    }
}

impl DetectionBackend for YoloBackend {
    fn name(&self) -> &str {
        "yolo"
    }

    fn infer(&self, image: &DynamicImage) -> TapClawResult<RawDetections> {
        let (input, lb) = self.preprocess(image);
        let input_value = Tensor::from_array(input)
            .map_err(|e| TapClawError::Detection(format!("ort tensor: {e}")))?;

        let output_owned = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| TapClawError::Detection("ort session lock poisoned".into()))?;
            let outputs = session
                .run(ort::inputs![input_value])
                .map_err(|e| TapClawError::Detection(format!("ort run: {e}")))?;

            outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| TapClawError::Detection(format!("extract tensor: {e}")))?
                .to_owned()
        };

        let objects =
            self.postprocess(&output_owned.view(), image.width(), image.height(), lb)?;
        tracing::debug!(count = objects.len(), "YOLO proposals after NMS");
        Ok(RawDetections::Objects(objects))
    }
}

/// Greedy per-class IoU NMS over model proposals; indices by descending score.
fn class_nms(props: &[RawObject], iou_threshold: f32) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..props.len()).collect();
    indices.sort_by(|&a, &b| {
        props[b]
            .confidence
            .partial_cmp(&props[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; props.len()];
    for &i in &indices {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &indices {
            if suppressed[j] || i == j {
                continue;
            }
            if props[i].class_id == props[j].class_id
                && iou(&props[i].center, &props[j].center) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
    }
    keep
}

/// IoU of two centre-form boxes.
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let corners = |c: &[f32; 4]| [c[0] - c[2] / 2.0, c[1] - c[3] / 2.0, c[0] + c[2] / 2.0, c[1] + c[3] / 2.0];
    let (a, b) = (corners(a), corners(b));
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;

    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
