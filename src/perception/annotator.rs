//! Draws detection boxes and short numeric labels onto a screenshot copy.
//!
//! Labels are `<class>:<confidence>` for detector output and the confidence
//! alone for OCR/template hits, rendered with a tiny built-in digit font.
use image::{DynamicImage, RgbaImage};

use crate::perception::types::{Detection, Label};

fn label_colour(label: &Label) -> [u8; 4] {
    match label {
        Label::Class(_) => [68, 255, 68, 220],     // green
        Label::Text(_) => [255, 170, 0, 220],      // orange
        Label::Template(_) => [0, 200, 255, 220],  // cyan
    }
}

fn label_text(det: &Detection) -> String {
    match &det.label {
        Label::Class(id) => format!("{id}:{:.2}", det.confidence),
        _ => format!("{:.2}", det.confidence),
    }
}

/// Returns an annotated RGBA copy of `image`.
pub fn annotate(image: &DynamicImage, detections: &[Detection]) -> RgbaImage {
    let mut canvas = image.to_rgba8();
    let w = canvas.width();
    let scale: u32 = if w > 1000 { 3 } else { 2 };
    let thickness: i32 = if w > 1000 { 4 } else { 2 };

    for det in detections {
        let b = &det.bbox;
        let (x1, y1) = (b.x1.round() as i32, b.y1.round() as i32);
        let (x2, y2) = (b.x2.round() as i32, b.y2.round() as i32);
        let col = label_colour(&det.label);

        draw_rect(&mut canvas, x1, y1, x2, y2, col, thickness);

        let text = label_text(det);
        let label_h = (5 * scale + 4 * scale) as i32;
        draw_label(&mut canvas, x1.max(0), (y1 - label_h).max(0), &text, col, scale);
    }
    canvas
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_rect(canvas: &mut RgbaImage, x1: i32, y1: i32, x2: i32, y2: i32, col: [u8; 4], thickness: i32) {
    let (iw, ih) = (canvas.width() as i32, canvas.height() as i32);
    let mut put = |x: i32, y: i32| {
        if x >= 0 && x < iw && y >= 0 && y < ih {
            blend(canvas, x as u32, y as u32, col);
        }
    };
    for t in 0..thickness {
        for x in x1..=x2 {
            put(x, y1 + t);
            put(x, y2 - t);
        }
        for y in y1..=y2 {
            put(x1 + t, y);
            put(x2 - t, y);
        }
    }
}

fn draw_label(canvas: &mut RgbaImage, x: i32, y: i32, text: &str, col: [u8; 4], scale: u32) {
    let (w, h) = canvas.dimensions();
    let step = 4 * scale;
    let pad = 2 * scale;
    let label_w = text.chars().count() as u32 * step + pad * 2;
    let label_h = 5 * scale + pad * 2;

    // Darkened background strip
    for dy in 0..label_h {
        for dx in 0..label_w {
            let (px, py) = (x as u32 + dx, y as u32 + dy);
            if px < w && py < h {
                let p = canvas.get_pixel_mut(px, py);
                for c in 0..3 {
                    p[c] = (p[c] as f32 * 0.2) as u8;
                }
                p[3] = 255;
            }
        }
    }

    for (i, c) in text.chars().enumerate() {
        let gx = x as u32 + pad + i as u32 * step;
        if gx + 3 * scale >= w {
            break;
        }
        draw_glyph(canvas, c, gx, y as u32 + pad, col, scale);
    }
}

/// 3×5 glyphs for digits, ':' and '.'.
fn draw_glyph(canvas: &mut RgbaImage, c: char, px: u32, py: u32, col: [u8; 4], scale: u32) {
    let glyph: [u8; 5] = match c {
        '0'..='9' => DIGITS[(c as u8 - b'0') as usize],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        _ => return,
    };
    let (w, h) = canvas.dimensions();
    for (row, bits) in glyph.iter().enumerate() {
        for bit in 0..3u32 {
            if (bits >> (2 - bit)) & 1 == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + bit * scale + sx;
                    let y = py + row as u32 * scale + sy;
                    if x < w && y < h {
                        blend(canvas, x, y, col);
                    }
                }
            }
        }
    }
}

fn blend(canvas: &mut RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    for c in 0..3 {
        p[c] = (p[c] as f32 * (1.0 - a) + col[c] as f32 * a).round() as u8;
    }
    p[3] = 255;
}

const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111], // 0
    [0b010, 0b110, 0b010, 0b010, 0b111], // 1
    [0b111, 0b001, 0b111, 0b100, 0b111], // 2
    [0b111, 0b001, 0b111, 0b001, 0b111], // 3
    [0b101, 0b101, 0b111, 0b001, 0b001], // 4
    [0b111, 0b100, 0b111, 0b001, 0b111], // 5
    [0b111, 0b100, 0b111, 0b101, 0b111], // 6
    [0b111, 0b001, 0b010, 0b010, 0b010], // 7
    [0b111, 0b101, 0b111, 0b101, 0b111], // 8
    [0b111, 0b101, 0b111, 0b001, 0b111], // 9
];
