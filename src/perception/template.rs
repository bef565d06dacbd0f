//! Multi-scale template matching by normalized cross-correlation.
//!
//! Matching runs on a downsampled grayscale copy of the screenshot. Every
//! window scoring at or above the threshold is a hit; overlapping hits are
//! collapsed with bottom-edge-priority overlap suppression before returning.
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

use crate::errors::{TapClawError, TapClawResult};
use crate::perception::resolver::{overlap_survivors, DEFAULT_OVERLAP_THRESHOLD};
use crate::perception::traits::DetectionBackend;
use crate::perception::types::{BBox, RawDetections, RawTemplateMatch};

#[derive(Debug, Clone)]
pub struct TemplateOptions {
    pub threshold: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub scale_steps: u32,
    /// Screenshots wider than this are downsampled before matching.
    pub work_width: u32,
    /// Window stride in working-resolution pixels.
    pub stride: u32,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            threshold: 0.45,
            min_scale: 0.5,
            max_scale: 1.5,
            scale_steps: 20,
            work_width: 360,
            stride: 2,
        }
    }
}

pub struct TemplateMatcher {
    name: String,
    template: GrayImage,
    options: TemplateOptions,
}

impl TemplateMatcher {
    pub fn new(name: impl Into<String>, template: &DynamicImage, options: TemplateOptions) -> Self {
        Self {
            name: name.into(),
            template: template.to_luma8(),
            options,
        }
    }

    pub fn load(path: &Path, options: TemplateOptions) -> TapClawResult<Self> {
        let img = image::open(path).map_err(|e| {
            TapClawError::Config(format!("cannot read template {}: {e}", path.display()))
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "template".into());
        tracing::info!(path = %path.display(), "template loaded");
        Ok(Self::new(name, &img, options))
    }

    fn scales(&self) -> Vec<f32> {
        let o = &self.options;
        if o.scale_steps <= 1 {
            return vec![o.min_scale];
        }
        let step = (o.max_scale - o.min_scale) / (o.scale_steps - 1) as f32;
        (0..o.scale_steps).map(|i| o.min_scale + step * i as f32).collect()
    }

    /// Raw hits in original-image coordinates, before de-duplication.
    fn raw_hits(&self, image: &DynamicImage) -> Vec<BBox> {
        let (iw, ih) = (image.width(), image.height());
        let factor = if iw > self.options.work_width {
            self.options.work_width as f32 / iw as f32
        } else {
            1.0
        };
        let sw = ((iw as f32 * factor).round() as u32).max(1);
        let sh = ((ih as f32 * factor).round() as u32).max(1);
        let scene = image.resize_exact(sw, sh, FilterType::Triangle).to_luma8();
        let integral = Integral::new(&scene);

        let mut hits = Vec::new();
        for scale in self.scales() {
            let tw = (self.template.width() as f32 * scale * factor).round() as u32;
            let th = (self.template.height() as f32 * scale * factor).round() as u32;
            if tw < 3 || th < 3 || tw > sw || th > sh {
                continue;
            }
            let tpl = image::imageops::resize(&self.template, tw, th, FilterType::Triangle);
            let Some(zt) = ZeroMeanTemplate::new(&tpl) else {
                continue;
            };

            let stride = self.options.stride.max(1) as usize;
            for y in (0..=(sh - th)).step_by(stride) {
                for x in (0..=(sw - tw)).step_by(stride) {
                    let score = zt.score_at(&scene, &integral, x, y);
                    if score >= self.options.threshold {
                        hits.push(BBox::new(
                            x as f32 / factor,
                            y as f32 / factor,
                            (x + tw) as f32 / factor,
                            (y + th) as f32 / factor,
                        ));
                    }
                }
            }
        }
        hits
    }
}

impl DetectionBackend for TemplateMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(&self, image: &DynamicImage) -> TapClawResult<RawDetections> {
        let hits = self.raw_hits(image);
        let priorities: Vec<f32> = hits.iter().map(|b| b.y2).collect();
        let kept = overlap_survivors(&hits, &priorities, DEFAULT_OVERLAP_THRESHOLD);
        tracing::debug!(raw = hits.len(), kept = kept.len(), template = %self.name, "template matched");

        Ok(RawDetections::Template(
            kept.into_iter()
                .map(|i| {
                    let b = hits[i];
                    RawTemplateMatch {
                        corners: [b.x1, b.y1, b.x2, b.y2],
                        template: self.name.clone(),
                    }
                })
                .collect(),
        ))
    }
}

/// Template with its mean removed, plus its norm.
struct ZeroMeanTemplate {
    values: Vec<f64>,
    width: u32,
    height: u32,
    norm: f64,
}

impl ZeroMeanTemplate {
    fn new(tpl: &GrayImage) -> Option<Self> {
        let n = (tpl.width() * tpl.height()) as f64;
        let mean = tpl.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;
        let values: Vec<f64> = tpl.as_raw().iter().map(|&v| v as f64 - mean).collect();
        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        // A flat template correlates with nothing.
        (norm > 1e-6).then_some(Self {
            values,
            width: tpl.width(),
            height: tpl.height(),
            norm,
        })
    }

    fn score_at(&self, scene: &GrayImage, integral: &Integral, x: u32, y: u32) -> f32 {
        let n = (self.width * self.height) as f64;
        let (sum, sum_sq) = integral.window(x, y, self.width, self.height);
        let var = sum_sq - sum * sum / n;
        if var <= 1e-6 {
            return 0.0;
        }

        // The template is zero-mean, so the window mean drops out of the numerator.
        let mut num = 0.0;
        let sw = scene.width() as usize;
        let raw = scene.as_raw();
        for ty in 0..self.height as usize {
            let row = (y as usize + ty) * sw + x as usize;
            let trow = ty * self.width as usize;
            for tx in 0..self.width as usize {
                num += raw[row + tx] as f64 * self.values[trow + tx];
            }
        }
        (num / (var.sqrt() * self.norm)) as f32
    }
}

/// Summed-area tables of values and squared values.
struct Integral {
    width: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sum_sq = vec![0.0; stride * (h + 1)];
        let raw = img.as_raw();
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = raw[y * w + x] as f64;
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sum_sq[(y + 1) * stride + x + 1] = sum_sq[y * stride + x + 1] + row_sq;
            }
        }
        Self {
            width: w,
            sum,
            sum_sq,
        }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let stride = self.width + 1;
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |t: &[f64], xx: usize, yy: usize| t[yy * stride + xx];
        let s = at(&self.sum, x1, y1) - at(&self.sum, x0, y1) - at(&self.sum, x1, y0)
            + at(&self.sum, x0, y0);
        let sq = at(&self.sum_sq, x1, y1) - at(&self.sum_sq, x0, y1) - at(&self.sum_sq, x1, y0)
            + at(&self.sum_sq, x0, y0);
        (s, sq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// A small "X" glyph on a light background.
    fn cross(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let on = x == y || x + y == size - 1 || x + 1 == y || x == y + 1;
            Luma([if on { 20 } else { 230 }])
        })
    }

    fn scene_with_cross(at: (u32, u32), size: u32) -> DynamicImage {
        let mut scene = GrayImage::from_pixel(200, 300, Luma([230]));
        image::imageops::overlay(&mut scene, &cross(size), at.0 as i64, at.1 as i64);
        DynamicImage::ImageLuma8(scene)
    }

    fn options() -> TemplateOptions {
        TemplateOptions {
            threshold: 0.8,
            min_scale: 1.0,
            max_scale: 1.0,
            scale_steps: 1,
            work_width: 400,
            stride: 1,
        }
    }

    #[test]
    fn finds_the_template_where_it_was_placed() {
        let matcher = TemplateMatcher::new("cross", &DynamicImage::ImageLuma8(cross(16)), options());
        let RawDetections::Template(hits) = matcher.infer(&scene_with_cross((120, 40), 16)).unwrap()
        else {
            panic!("template backend must return template hits");
        };
        assert_eq!(hits.len(), 1);
        let [x1, y1, x2, y2] = hits[0].corners;
        assert_eq!((x1, y1, x2, y2), (120.0, 40.0, 136.0, 56.0));
        assert_eq!(hits[0].template, "cross");
    }

    #[test]
    fn blank_screen_has_no_hits() {
        let matcher = TemplateMatcher::new("cross", &DynamicImage::ImageLuma8(cross(16)), options());
        let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 300, Luma([230])));
        assert!(matcher.infer(&blank).unwrap().is_empty());
    }

    #[test]
    fn scale_ladder_spans_the_range() {
        let matcher = TemplateMatcher::new(
            "cross",
            &DynamicImage::ImageLuma8(cross(16)),
            TemplateOptions::default(),
        );
        let scales = matcher.scales();
        assert_eq!(scales.len(), 20);
        assert!((scales[0] - 0.5).abs() < 1e-6);
        assert!((scales[19] - 1.5).abs() < 1e-5);
    }
}
