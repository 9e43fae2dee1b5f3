// src/overlay.rs
//
// Annotation drawing. Overlays are collected while a frame is analysed and
// painted once at the end, so crops always come from the untouched frame.
//
// Labels sit on a filled tag above their box (below it when the box touches
// the top edge). Text uses a 5x7 bitmap font; the `opencv` build renders it
// with Hershey glyphs instead.

use crate::types::{BBox, Frame};

pub mod colors {
    // RGB
    pub const VEHICLE_BLUE: [u8; 3] = [0, 0, 255];
    pub const PLATE_GREEN: [u8; 3] = [0, 255, 0];
    pub const PERSON_GREEN: [u8; 3] = [0, 255, 0];
    pub const VIOLATION_RED: [u8; 3] = [255, 0, 0];
    pub const LABEL_TEXT: [u8; 3] = [0, 0, 0];
}

/// Text shown while a plate has not been frozen yet.
pub const DETECTING_LABEL: &str = "Detecting...";

pub const GLYPH_WIDTH: i32 = 5;
pub const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_WIDTH + 1;
const TAG_PADDING: i32 = 1;
pub const TAG_HEIGHT: i32 = GLYPH_HEIGHT + 3 * TAG_PADDING;

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub bbox: BBox,
    pub color: [u8; 3],
    pub thickness: i32,
    pub label: String,
}

impl Overlay {
    pub fn new(bbox: BBox, color: [u8; 3], label: impl Into<String>) -> Self {
        Self {
            bbox,
            color,
            thickness: 2,
            label: label.into(),
        }
    }
}

/// Paint every overlay: outline, label tag, label text.
pub fn draw_all(frame: &mut Frame, overlays: &[Overlay]) {
    for o in overlays {
        draw_rect(frame, &o.bbox, o.color, o.thickness);
        if o.label.is_empty() {
            continue;
        }
        let tag = label_tag(&o.bbox, &o.label);
        fill_rect(frame, &tag, o.color);
        render_text(
            frame,
            &o.label,
            tag.x1.saturating_add(TAG_PADDING),
            tag.y1.saturating_add(TAG_PADDING),
            colors::LABEL_TEXT,
        );
    }
}

/// Where the label of `bbox` goes.
pub fn label_tag(bbox: &BBox, label: &str) -> BBox {
    let chars = i32::try_from(label.chars().count()).unwrap_or(i32::MAX);
    let width = chars.saturating_mul(GLYPH_ADVANCE).saturating_add(TAG_PADDING);
    let y1 = if bbox.y1 >= TAG_HEIGHT {
        bbox.y1 - TAG_HEIGHT
    } else {
        bbox.y2
    };
    BBox::new(
        bbox.x1,
        y1,
        bbox.x1.saturating_add(width),
        y1.saturating_add(TAG_HEIGHT),
    )
}

pub fn draw_rect(frame: &mut Frame, bbox: &BBox, color: [u8; 3], thickness: i32) {
    let t = thickness.max(1);
    let edges = [
        BBox::new(bbox.x1, bbox.y1, bbox.x2, bbox.y1.saturating_add(t)),
        BBox::new(bbox.x1, bbox.y2.saturating_sub(t), bbox.x2, bbox.y2),
        BBox::new(bbox.x1, bbox.y1, bbox.x1.saturating_add(t), bbox.y2),
        BBox::new(bbox.x2.saturating_sub(t), bbox.y1, bbox.x2, bbox.y2),
    ];
    for edge in &edges {
        fill_rect(frame, edge, color);
    }
}

pub fn fill_rect(frame: &mut Frame, bbox: &BBox, color: [u8; 3]) {
    if !frame.is_valid() {
        return;
    }
    let Some(b) = bbox.clamped(frame.width, frame.height) else {
        return;
    };
    for y in b.y1 as usize..b.y2 as usize {
        for x in b.x1 as usize..b.x2 as usize {
            let idx = (y * frame.width + x) * 3;
            frame.data[idx..idx + 3].copy_from_slice(&color);
        }
    }
}

#[cfg(feature = "opencv")]
fn render_text(frame: &mut Frame, text: &str, x: i32, y: i32, color: [u8; 3]) {
    if let Err(e) = crate::opencv_io::put_label(frame, text, x, y.saturating_add(GLYPH_HEIGHT), color) {
        tracing::debug!("put_text failed ({:#}), using bitmap font", e);
        draw_text(frame, text, x, y, color);
    }
}

#[cfg(not(feature = "opencv"))]
fn render_text(frame: &mut Frame, text: &str, x: i32, y: i32, color: [u8; 3]) {
    draw_text(frame, text, x, y, color);
}

/// Bitmap text with its top-left corner at (`x`, `y`). Lowercase is drawn
/// as uppercase; characters without a glyph leave a gap. Clipped to the frame.
pub fn draw_text(frame: &mut Frame, text: &str, x: i32, y: i32, color: [u8; 3]) {
    if !frame.is_valid() {
        return;
    }
    let (w, h) = (frame.width as i64, frame.height as i64);
    let mut cx = x as i64;
    for ch in text.chars() {
        if cx >= w {
            break;
        }
        if let Some(rows) = glyph(ch.to_ascii_uppercase()) {
            for (row, bits) in rows.iter().enumerate() {
                let py = y as i64 + row as i64;
                if py < 0 || py >= h {
                    continue;
                }
                for col in 0..GLYPH_WIDTH as i64 {
                    let px = cx + col;
                    if px < 0 || px >= w || (*bits >> (GLYPH_WIDTH as i64 - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let idx = (py as usize * frame.width + px as usize) * 3;
                    frame.data[idx..idx + 3].copy_from_slice(&color);
                }
            }
        }
        cx += GLYPH_ADVANCE as i64;
    }
}

/// 5x7 glyph rows, most significant of the low five bits on the left.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '#' => [0x0A, 0x0A, 0x1F, 0x0A, 0x1F, 0x0A, 0x0A],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(frame: &Frame, x: usize, y: usize) -> [u8; 3] {
        let i = (y * frame.width + x) * 3;
        [frame.data[i], frame.data[i + 1], frame.data[i + 2]]
    }

    fn count(frame: &Frame, color: [u8; 3]) -> usize {
        frame.data.chunks(3).filter(|p| *p == &color[..]).count()
    }

    #[test]
    fn test_rect_outline_leaves_interior() {
        let mut frame = Frame::filled(20, 20, [0, 0, 0], 0, 0.0);
        draw_rect(&mut frame, &BBox::new(5, 5, 15, 15), [255, 0, 0], 1);
        assert_eq!(pixel(&frame, 5, 5), [255, 0, 0]);
        assert_eq!(pixel(&frame, 14, 10), [255, 0, 0]);
        assert_eq!(pixel(&frame, 10, 10), [0, 0, 0]);
    }

    #[test]
    fn test_out_of_bounds_overlay_is_clipped() {
        let mut frame = Frame::filled(10, 10, [0, 0, 0], 0, 0.0);
        let overlays = vec![Overlay::new(BBox::new(0, 0, 50, 50), [1, 2, 3], "ID 1")];
        draw_all(&mut frame, &overlays);
        assert_eq!(pixel(&frame, 0, 0), [1, 2, 3]);
        assert_eq!(frame.data.len(), 300);
    }

    #[test]
    fn test_saturated_box_draws_without_overflow() {
        let mut frame = Frame::filled(10, 10, [0, 0, 0], 0, 0.0);
        let huge = BBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        draw_all(&mut frame, &[Overlay::new(huge, [9, 9, 9], "NO-Mask")]);
        assert_eq!(frame.data.len(), 300);
    }

    #[test]
    fn test_text_is_drawn_and_depends_on_label() {
        let mut a = Frame::filled(40, 10, [255, 255, 255], 0, 0.0);
        let mut b = a.clone();
        draw_text(&mut a, "AB12", 0, 0, [0, 0, 0]);
        draw_text(&mut b, "AB13", 0, 0, [0, 0, 0]);
        assert!(count(&a, [0, 0, 0]) > 0);
        assert_ne!(a, b);
        // top row of 'A' is .###.
        assert_eq!(pixel(&a, 0, 0), [255, 255, 255]);
        assert_eq!(pixel(&a, 1, 0), [0, 0, 0]);
    }

    #[test]
    fn test_lowercase_matches_uppercase_and_unknown_is_blank() {
        let mut lower = Frame::filled(30, 8, [255, 255, 255], 0, 0.0);
        let mut upper = lower.clone();
        draw_text(&mut lower, "id", 0, 0, [0, 0, 0]);
        draw_text(&mut upper, "ID", 0, 0, [0, 0, 0]);
        assert_eq!(lower, upper);

        let mut blank = Frame::filled(30, 8, [255, 255, 255], 0, 0.0);
        draw_text(&mut blank, "~~ ", 0, 0, [0, 0, 0]);
        assert_eq!(count(&blank, [0, 0, 0]), 0);
    }

    #[test]
    fn test_label_tag_goes_below_box_at_top_edge() {
        let above = label_tag(&BBox::new(10, 40, 50, 60), "ID 7");
        assert_eq!(above, BBox::new(10, 40 - TAG_HEIGHT, 10 + 4 * 6 + 1, 40));

        let below = label_tag(&BBox::new(10, 2, 50, 30), "ID 7");
        assert_eq!(below.y1, 30);
        assert_eq!(below.height(), TAG_HEIGHT);
    }

    #[test]
    fn test_label_text_lands_on_tag() {
        let mut frame = Frame::filled(60, 40, [40, 40, 40], 0, 0.0);
        let o = Overlay::new(BBox::new(5, 20, 40, 35), [0, 255, 0], "ID 1");
        draw_all(&mut frame, &[o]);
        // tag spans y 10..20; text pixels are black on green
        assert_eq!(pixel(&frame, 5, 10), [0, 255, 0]);
        let tag = frame.crop(&BBox::new(5, 10, 30, 20)).unwrap();
        assert!(count(&tag, colors::LABEL_TEXT) > 0);
    }
}
