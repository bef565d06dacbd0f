//! Converts backend-specific output into [`Detection`] records.
//!
//! The returned [`Normalized`] iterator is lazy and cheap to clone, so a caller
//! can walk the same pass more than once without re-running inference.
use crate::perception::types::{BBox, Detection, Label, RawDetections};

/// Lazy view over one backend result, filtered by confidence.
#[derive(Debug, Clone)]
pub struct Normalized<'a> {
    raw: &'a RawDetections,
    width: u32,
    height: u32,
    threshold: f32,
    index: usize,
}

pub fn normalize(
    raw: &RawDetections,
    width: u32,
    height: u32,
    confidence_threshold: f32,
) -> Normalized<'_> {
    Normalized {
        raw,
        width,
        height,
        threshold: confidence_threshold,
        index: 0,
    }
}

impl<'a> Normalized<'a> {
    fn convert(&self, i: usize) -> Detection {
        let (w, h) = (self.width, self.height);
        match self.raw {
            RawDetections::Objects(objs) => {
                let o = &objs[i];
                Detection {
                    bbox: BBox::from_center_relative(o.center, w, h).clamp_to(w, h),
                    confidence: o.confidence,
                    label: Label::Class(o.class_id),
                }
            }
            RawDetections::Text(lines) => {
                let t = &lines[i];
                Detection {
                    bbox: quad_to_bbox(&t.quad).clamp_to(w, h),
                    confidence: t.score.unwrap_or(1.0),
                    label: Label::Text(t.text.trim().to_string()),
                }
            }
            RawDetections::Template(hits) => {
                let m = &hits[i];
                let [x1, y1, x2, y2] = m.corners;
                Detection {
                    bbox: BBox::new(x1, y1, x2, y2).clamp_to(w, h),
                    confidence: 1.0,
                    label: Label::Template(m.template.clone()),
                }
            }
        }
    }
}

impl<'a> Iterator for Normalized<'a> {
    type Item = Detection;

    fn next(&mut self) -> Option<Detection> {
        while self.index < self.raw.len() {
            let det = self.convert(self.index);
            self.index += 1;
            if det.confidence >= self.threshold {
                return Some(det);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.raw.len() - self.index))
    }
}

/// Axis-aligned hull of an OCR quad (TL, TR, BR, BL).
fn quad_to_bbox(quad: &[[f32; 2]; 4]) -> BBox {
    let [tl, tr, br, bl] = quad;
    BBox::new(
        tl[0].min(bl[0]),
        tl[1].min(tr[1]),
        tr[0].max(br[0]),
        br[1].max(bl[1]),
    )
}
