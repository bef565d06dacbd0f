use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in absolute pixel coordinates, `x1 <= x2`, `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Builds a corner box from a centre-relative `[cx, cy, w, h]` in `[0, 1]`.
    pub fn from_center_relative(center: [f32; 4], width: u32, height: u32) -> Self {
        let [cx, cy, w, h] = center;
        let (iw, ih) = (width as f32, height as f32);
        Self::new(
            (cx - w / 2.0) * iw,
            (cy - h / 2.0) * ih,
            (cx + w / 2.0) * iw,
            (cy + h / 2.0) * ih,
        )
    }

    /// Inverse of [`BBox::from_center_relative`].
    pub fn to_center_relative(&self, width: u32, height: u32) -> [f32; 4] {
        let (iw, ih) = (width as f32, height as f32);
        [
            (self.x1 + self.x2) / 2.0 / iw,
            (self.y1 + self.y2) / 2.0 / ih,
            self.width() / iw,
            self.height() / ih,
        ]
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// True when every edge of `other` lies on or inside `self`.
    pub fn contains(&self, other: &BBox) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }

    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0)
    }

    /// Box centre in whole pixels, truncated toward zero.
    pub fn centroid(&self) -> (i32, i32) {
        (
            ((self.x1 + self.x2) / 2.0) as i32,
            ((self.y1 + self.y2) / 2.0) as i32,
        )
    }

    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }
}

/// What a detection is, depending on which backend produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Label {
    /// Object-detector class id.
    Class(u32),
    /// OCR text, already trimmed.
    Text(String),
    /// Name of the template that matched.
    Template(String),
}

impl Label {
    pub fn class_id(&self) -> Option<u32> {
        match self {
            Label::Class(id) => Some(*id),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Label::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Class(id) => write!(f, "class {id}"),
            Label::Text(t) => write!(f, "\"{t}\""),
            Label::Template(name) => write!(f, "template {name}"),
        }
    }
}

/// One located candidate on screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub label: Label,
}

/// A detection chosen for action, with its tap point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub detection: Detection,
    pub centroid: (i32, i32),
}

impl Target {
    pub fn new(detection: Detection) -> Self {
        let centroid = detection.bbox.centroid();
        Self {
            detection,
            centroid,
        }
    }
}

// ── Raw backend output ──────────────────────────────────────────────────────

/// Object-detector proposal, box in centre form relative to the source image.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObject {
    /// `[cx, cy, w, h]` in `[0, 1]`.
    pub center: [f32; 4],
    pub confidence: f32,
    pub class_id: u32,
}

/// OCR line: quad is top-left, top-right, bottom-right, bottom-left in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RawText {
    pub quad: [[f32; 2]; 4],
    pub text: String,
    pub score: Option<f32>,
}

/// Template hit in absolute corner form. Template hits carry no confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTemplateMatch {
    pub corners: [f32; 4],
    pub template: String,
}

/// Backend output before normalization, tagged by source.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDetections {
    Objects(Vec<RawObject>),
    Text(Vec<RawText>),
    Template(Vec<RawTemplateMatch>),
}

impl RawDetections {
    pub fn len(&self) -> usize {
        match self {
            RawDetections::Objects(v) => v.len(),
            RawDetections::Text(v) => v.len(),
            RawDetections::Template(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Frames ─────────────────────────────────────────────────────────────────

/// A decoded screenshot. The image is shared so inference can run off-thread.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<DynamicImage>,
}

impl Frame {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
