use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

use crate::perception::types::Frame;

/// Longest side of the luma thumbnail used for comparisons.
const COMPARE_MAX_SIDE: u32 = 256;

/// Snapshot of a known screen, kept as a small luma thumbnail.
#[derive(Debug, Clone)]
pub struct ReferenceState {
    thumb: GrayImage,
    source_dims: (u32, u32),
}

impl ReferenceState {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            thumb: thumbnail(&frame.image),
            source_dims: (frame.width(), frame.height()),
        }
    }

    /// Normalized cross-correlation against `frame`, in `[-1, 1]`.
    /// Screens of a different size score 0.
    pub fn similarity(&self, frame: &Frame) -> f64 {
        if (frame.width(), frame.height()) != self.source_dims {
            tracing::debug!(
                reference = ?self.source_dims,
                current = ?(frame.width(), frame.height()),
                "screen size changed"
            );
            return 0.0;
        }
        let current = thumbnail(&frame.image);
        ncc(self.thumb.as_raw(), current.as_raw())
    }
}

fn thumbnail(img: &DynamicImage) -> GrayImage {
    let (w, h) = (img.width().max(1), img.height().max(1));
    let scale = (COMPARE_MAX_SIDE as f32 / w.max(h) as f32).min(1.0);
    let tw = ((w as f32 * scale).round() as u32).max(1);
    let th = ((h as f32 * scale).round() as u32).max(1);
    img.resize_exact(tw, th, FilterType::Triangle).to_luma8()
}

/// Zero-mean normalized cross-correlation of two equally sized sample sets.
///
/// Two flat signals count as identical only when they have the same level.
pub fn ncc(a: &[u8], b: &[u8]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&v| v as f64).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let dx = x as f64 - mean_a;
        let dy = y as f64 - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        let both_flat = var_a <= f64::EPSILON && var_b <= f64::EPSILON;
        return if both_flat && (mean_a - mean_b).abs() < 0.5 { 1.0 } else { 0.0 };
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}
