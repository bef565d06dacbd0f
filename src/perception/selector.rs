//! Target selection policies.
use regex::Regex;

use crate::errors::TapClawResult;
use crate::perception::types::{Detection, Target};

/// Anchored keyword patterns for OCR text. Each pattern must match the whole
/// (trimmed) text; `.` and `.*` work as wildcards.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    patterns: Vec<Regex>,
    sources: Vec<String>,
}

impl KeywordSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> TapClawResult<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        let mut sources = Vec::with_capacity(patterns.len());
        for p in patterns {
            let p = p.as_ref();
            compiled.push(Regex::new(&format!("^(?:{p})$"))?);
            sources.push(p.to_string());
        }
        Ok(Self {
            patterns: compiled,
            sources,
        })
    }

    /// Index of the first pattern that fully matches `text`.
    pub fn first_match(&self, text: &str) -> Option<usize> {
        let text = text.trim();
        self.patterns.iter().position(|re| re.is_match(text))
    }

    pub fn pattern(&self, index: usize) -> Option<&str> {
        self.sources.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum SelectionPolicy {
    /// First detection with this class id.
    ByType(u32),
    /// Single most confident detection, first seen wins ties.
    HighestConfidence,
    /// Every detection, most confident first.
    AllByConfidence,
    /// Every detection, in the order the resolver produced them.
    InOrder,
    /// OCR detections whose text matches one of the keywords.
    TextMatch(KeywordSet),
}

/// Applies `policy`. An empty result means "nothing to act on".
pub fn select(detections: &[Detection], policy: &SelectionPolicy) -> Vec<Target> {
    match policy {
        SelectionPolicy::ByType(type_id) => detections
            .iter()
            .find(|d| d.label.class_id() == Some(*type_id))
            .cloned()
            .map(Target::new)
            .into_iter()
            .collect(),

        SelectionPolicy::HighestConfidence => {
            let mut best: Option<&Detection> = None;
            for d in detections {
                if best.map_or(true, |b| d.confidence > b.confidence) {
                    best = Some(d);
                }
            }
            best.cloned().map(Target::new).into_iter().collect()
        }

        SelectionPolicy::AllByConfidence => {
            let mut sorted = detections.to_vec();
            sorted.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            sorted.into_iter().map(Target::new).collect()
        }

        SelectionPolicy::InOrder => detections.iter().cloned().map(Target::new).collect(),

        SelectionPolicy::TextMatch(keywords) => detections
            .iter()
            .filter_map(|d| {
                let text = d.label.text()?;
                let idx = keywords.first_match(text)?;
                tracing::debug!(
                    text,
                    pattern = keywords.pattern(idx).unwrap_or_default(),
                    "keyword matched"
                );
                Some(Target::new(d.clone()))
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{BBox, Label};

    fn class(id: u32, confidence: f32) -> Detection {
        Detection {
            bbox: BBox::new(0.0, 0.0, 10.0, 20.0),
            confidence,
            label: Label::Class(id),
        }
    }

    fn text(t: &str) -> Detection {
        Detection {
            bbox: BBox::new(100.0, 200.0, 140.0, 220.0),
            confidence: 1.0,
            label: Label::Text(t.into()),
        }
    }

    #[test]
    fn by_type_returns_first_of_that_class() {
        let dets = vec![class(1, 0.5), class(2, 0.9), class(2, 0.95)];
        let out = select(&dets, &SelectionPolicy::ByType(2));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].detection.confidence, 0.9);
        assert!(select(&dets, &SelectionPolicy::ByType(7)).is_empty());
    }

    #[test]
    fn highest_confidence_breaks_ties_by_first_seen() {
        let mut a = class(0, 0.8);
        a.bbox = BBox::new(0.0, 0.0, 2.0, 2.0);
        let b = class(1, 0.8);
        let out = select(&[class(2, 0.1), a.clone(), b], &SelectionPolicy::HighestConfidence);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].detection, a);
        assert_eq!(out[0].centroid, (1, 1));
    }

    #[test]
    fn all_by_confidence_is_descending() {
        let dets = vec![class(0, 0.3), class(1, 0.9), class(2, 0.6)];
        let ids: Vec<_> = select(&dets, &SelectionPolicy::AllByConfidence)
            .iter()
            .map(|t| t.detection.label.class_id().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 0]);
    }

    #[test]
    fn empty_input_selects_nothing() {
        assert!(select(&[], &SelectionPolicy::HighestConfidence).is_empty());
        assert!(select(&[], &SelectionPolicy::InOrder).is_empty());
    }

    #[test]
    fn text_match_is_anchored() {
        let kw = KeywordSet::new(&["跳过.*", "同意", "X"]).unwrap();
        let dets = vec![
            text("跳过 3"),
            text("不同意"),
            text("同意"),
            text("XL"),
            class(0, 1.0),
        ];
        let out = select(&dets, &SelectionPolicy::TextMatch(kw));
        let texts: Vec<_> = out
            .iter()
            .map(|t| t.detection.label.text().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["跳过 3", "同意"]);
        assert_eq!(out[0].centroid, (120, 210));
    }

    #[test]
    fn first_matching_pattern_wins() {
        let kw = KeywordSet::new(&["同意.*继续", "同意.*"]).unwrap();
        assert_eq!(kw.first_match("同意并继续"), Some(0));
        assert_eq!(kw.first_match(" 同意授权 "), Some(1));
        assert_eq!(kw.first_match("拒绝"), None);
    }

    #[test]
    fn bad_pattern_is_rejected() {
        assert!(KeywordSet::new(&["(unclosed"]).is_err());
    }
}
