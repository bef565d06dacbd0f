//! Debug artifact sinks. Annotated screenshots are produced-to only; a sink
//! never fails the caller.
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;

use crate::perception::annotator;
use crate::perception::types::Detection;

pub trait ArtifactSink: Send + Sync {
    /// Stores `image` with `detections` drawn on it under a short `tag`.
    fn record(&self, tag: &str, image: &DynamicImage, detections: &[Detection]);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ArtifactSink for NullSink {
    fn record(&self, _tag: &str, _image: &DynamicImage, _detections: &[Detection]) {}
}

/// Writes `<dir>/<tag>_<seq>_<timestamp>.png` for every recorded frame.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    seq: AtomicU64,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn file_name(&self, tag: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let ts = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let tag: String = tag
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{tag}_{seq:04}_{ts}.png")
    }
}

impl ArtifactSink for DirectorySink {
    fn record(&self, tag: &str, image: &DynamicImage, detections: &[Detection]) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "cannot create artifact dir");
            return;
        }
        let path = self.dir.join(self.file_name(tag));
        let annotated = annotator::annotate(image, detections);
        match annotated.save_with_format(&path, image::ImageFormat::Png) {
            Ok(()) => tracing::debug!(path = %path.display(), boxes = detections.len(), "artifact saved"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "artifact write failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{BBox, Label};
    use image::RgbImage;

    #[test]
    fn directory_sink_writes_numbered_pngs() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(tmp.path().join("shots"));
        let img = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        let det = Detection {
            bbox: BBox::new(4.0, 4.0, 30.0, 30.0),
            confidence: 0.5,
            label: Label::Class(0),
        };

        sink.record("detect", &img, &[det]);
        sink.record("ocr text", &img, &[]);

        let mut names: Vec<String> = std::fs::read_dir(sink.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("detect_0000_") && names[0].ends_with(".png"));
        assert!(names[1].starts_with("ocr_text_0001_"));
    }

    #[test]
    fn unwritable_dir_is_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let sink = DirectorySink::new(blocker.join("sub"));
        sink.record("x", &DynamicImage::ImageRgb8(RgbImage::new(8, 8)), &[]);
    }
}
