//! Redundant-box removal: containment suppression and overlap NMS.
use serde::{Deserialize, Serialize};

use crate::perception::types::{BBox, Detection};

/// Ordering used by overlap suppression; higher wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityKey {
    #[default]
    Confidence,
    /// Bottom edge `y2`: lower on screen wins. Used for template hits, which
    /// have no meaningful confidence.
    BottomEdge,
}

impl PriorityKey {
    fn of(&self, det: &Detection) -> f32 {
        match self {
            PriorityKey::Confidence => det.confidence,
            PriorityKey::BottomEdge => det.bbox.y2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Drop boxes that fully enclose a smaller box.
    pub containment: bool,
    /// Overlap NMS threshold; `None` disables the pass.
    pub overlap_threshold: Option<f32>,
    pub priority: PriorityKey,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            containment: true,
            overlap_threshold: Some(DEFAULT_OVERLAP_THRESHOLD),
            priority: PriorityKey::Confidence,
        }
    }
}

pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.3;

/// Runs the enabled passes: containment first, then overlap suppression.
pub fn resolve(detections: Vec<Detection>, config: &ResolverConfig) -> Vec<Detection> {
    let before = detections.len();
    let mut dets = detections;
    if config.containment {
        dets = suppress_containers(dets);
    }
    if let Some(threshold) = config.overlap_threshold {
        dets = suppress_overlaps(dets, config.priority, threshold);
    }
    tracing::debug!(before, after = dets.len(), "boxes resolved");
    dets
}

/// Drops every box that fully contains a strictly smaller box.
///
/// Each decision is made against the whole input, so the output is the input
/// order minus the enclosing boxes.
pub fn suppress_containers(detections: Vec<Detection>) -> Vec<Detection> {
    let boxes: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();
    let is_container: Vec<bool> = boxes
        .iter()
        .enumerate()
        .map(|(i, outer)| {
            let outer_area = outer.area();
            boxes
                .iter()
                .enumerate()
                .any(|(j, inner)| i != j && outer.contains(inner) && outer_area > inner.area())
        })
        .collect();

    detections
        .into_iter()
        .zip(is_container)
        .filter_map(|(d, container)| (!container).then_some(d))
        .collect()
}

/// Greedy overlap suppression. Output is the kept boxes in descending priority.
pub fn suppress_overlaps(
    detections: Vec<Detection>,
    priority: PriorityKey,
    threshold: f32,
) -> Vec<Detection> {
    let boxes: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();
    let priorities: Vec<f32> = detections.iter().map(|d| priority.of(d)).collect();
    let keep = overlap_survivors(&boxes, &priorities, threshold);

    let mut slots: Vec<Option<Detection>> = detections.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Index-level NMS shared with backends that work on bare boxes.
///
/// Returns indices of survivors in descending priority; equal priorities keep
/// their input order.
pub(crate) fn overlap_survivors(boxes: &[BBox], priorities: &[f32], threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    // `sort_by` is stable, which gives the input-order tie-break.
    order.sort_by(|&a, &b| {
        priorities[b]
            .partial_cmp(&priorities[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for (pos, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order[pos + 1..] {
            if !suppressed[j] && overlap_ratio(&boxes[i], &boxes[j]) > threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

/// Intersection over the smaller of the two areas; 0 for degenerate boxes.
///
/// Stricter than dividing by the dropped box's own area: a small box inside a
/// large one counts as fully overlapped whichever of the two has priority.
pub fn overlap_ratio(a: &BBox, b: &BBox) -> f32 {
    let smaller = a.area().min(b.area());
    if smaller <= 0.0 {
        return 0.0;
    }
    a.intersection_area(b) / smaller
}
