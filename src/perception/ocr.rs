//! OCR backend that shells out to the Tesseract CLI.
//!
//! The screenshot is written to a temporary PNG and recognised with
//! `tesseract <png> stdout -l <langs> --psm <n> tsv`. Word rows of the TSV are
//! grouped back into lines so keywords like "同意并继续" match as a whole.
use std::path::PathBuf;
use std::process::Command;

use image::DynamicImage;

use crate::errors::{TapClawError, TapClawResult};
use crate::perception::traits::DetectionBackend;
use crate::perception::types::{RawDetections, RawText};

pub struct TesseractOcr {
    binary: PathBuf,
    languages: String,
    page_seg_mode: u8,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, languages: impl Into<String>, page_seg_mode: u8) -> Self {
        Self {
            binary: binary.into(),
            languages: languages.into(),
            page_seg_mode,
        }
    }

    fn run_tesseract(&self, png: &std::path::Path) -> TapClawResult<String> {
        let output = Command::new(&self.binary)
            .arg(png)
            .arg("stdout")
            .args(["-l", &self.languages])
            .args(["--psm", &self.page_seg_mode.to_string()])
            .arg("tsv")
            .output()
            .map_err(|e| {
                TapClawError::Detection(format!("spawn {}: {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            return Err(TapClawError::Detection(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DetectionBackend for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn infer(&self, image: &DynamicImage) -> TapClawResult<RawDetections> {
        let png = std::env::temp_dir().join(format!("tapclaw-ocr-{}.png", uuid::Uuid::new_v4()));
        image
            .save_with_format(&png, image::ImageFormat::Png)
            .map_err(|e| TapClawError::Detection(format!("write OCR input: {e}")))?;

        let result = self.run_tesseract(&png);
        if let Err(e) = std::fs::remove_file(&png) {
            tracing::warn!(path = %png.display(), error = %e, "failed to remove OCR temp file");
        }

        let lines = parse_tsv(&result?);
        tracing::debug!(lines = lines.len(), "OCR lines recognised");
        Ok(RawDetections::Text(lines))
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
struct LineKey {
    page: u32,
    block: u32,
    par: u32,
    line: u32,
}

struct LineAcc {
    key: LineKey,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    text: String,
    conf_sum: f32,
    words: u32,
}

/// Parses Tesseract TSV output into one [`RawText`] per text line.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num, left,
/// top, width, height, conf, text. Only level-5 (word) rows with text count.
pub fn parse_tsv(tsv: &str) -> Vec<RawText> {
    let mut lines: Vec<LineAcc> = Vec::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().ok();
        let (Some(page), Some(block), Some(par), Some(line)) = (num(1), num(2), num(3), num(4))
        else {
            continue;
        };
        let (Some(left), Some(top), Some(width), Some(height)) = (num(6), num(7), num(8), num(9))
        else {
            continue;
        };
        let conf = cols[10].trim().parse::<f32>().unwrap_or(-1.0);

        let key = LineKey { page, block, par, line };
        let (l, t, r, b) = (
            left as f32,
            top as f32,
            (left + width) as f32,
            (top + height) as f32,
        );

        match lines.iter_mut().find(|acc| acc.key == key) {
            Some(acc) => {
                acc.x1 = acc.x1.min(l);
                acc.y1 = acc.y1.min(t);
                acc.x2 = acc.x2.max(r);
                acc.y2 = acc.y2.max(b);
                if needs_space(&acc.text, word) {
                    acc.text.push(' ');
                }
                acc.text.push_str(word);
                if conf >= 0.0 {
                    acc.conf_sum += conf;
                    acc.words += 1;
                }
            }
            None => lines.push(LineAcc {
                key,
                x1: l,
                y1: t,
                x2: r,
                y2: b,
                text: word.to_string(),
                conf_sum: conf.max(0.0),
                words: u32::from(conf >= 0.0),
            }),
        }
    }

    lines
        .into_iter()
        .map(|acc| RawText {
            quad: [
                [acc.x1, acc.y1],
                [acc.x2, acc.y1],
                [acc.x2, acc.y2],
                [acc.x1, acc.y2],
            ],
            text: acc.text,
            score: (acc.words > 0).then(|| (acc.conf_sum / acc.words as f32 / 100.0).clamp(0.0, 1.0)),
        })
        .collect()
}

/// CJK words are written without separators; everything else gets a space.
fn needs_space(prev: &str, next: &str) -> bool {
    let prev_cjk = prev.chars().last().is_some_and(is_cjk);
    let next_cjk = next.chars().next().is_some_and(is_cjk);
    !(prev_cjk && next_cjk)
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
        || ('\u{3040}'..='\u{309f}').contains(&c)
        || ('\u{30a0}'..='\u{30ff}').contains(&c)
        || ('\u{ac00}'..='\u{d7af}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut s = String::from(HEADER);
        for r in rows {
            s.push('\n');
            s.push_str(r);
        }
        s
    }

    #[test]
    fn words_on_one_line_are_merged() {
        let out = parse_tsv(&tsv(&[
            "4\t1\t1\t1\t1\t0\t10\t20\t200\t30\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t20\t40\t30\t90\t同意",
            "5\t1\t1\t1\t1\t2\t52\t22\t40\t28\t80\t并继续",
            "5\t1\t2\t1\t1\t1\t500\t900\t60\t40\t70\tSkip",
            "5\t1\t2\t1\t1\t2\t565\t900\t30\t40\t60\tad",
        ]));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "同意并继续");
        assert_eq!(out[0].quad[0], [10.0, 20.0]);
        assert_eq!(out[0].quad[2], [92.0, 50.0]);
        assert!((out[0].score.unwrap() - 0.85).abs() < 1e-6);
        assert_eq!(out[1].text, "Skip ad");
    }

    #[test]
    fn blank_and_malformed_rows_are_ignored() {
        let out = parse_tsv(&tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t20\t40\t30\t95\t   ",
            "5\t1\t1\t1\tx\t1\t10\t20\t40\t30\t95\tbad",
            "garbage",
        ]));
        assert!(out.is_empty());
    }

    #[test]
    fn mixed_scripts_get_spaces() {
        assert!(needs_space("Skip", "跳过"));
        assert!(!needs_space("跳", "过"));
        assert!(needs_space("5", "s"));
    }
}
