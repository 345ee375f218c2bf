//! Detection overlays and data-URL encoding for HTTP responses.

use base64::Engine as _;
use facematch_core::{BoundingBox, FaceExpression};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

const BOX_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// 5x7 glyphs, one byte per row, low five bits set left to right.
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const LABEL_PADDING: u32 = 1;

/// Copy of `image` with an outline drawn around every box.
pub fn draw_detections<'a>(
    image: &DynamicImage,
    boxes: impl IntoIterator<Item = &'a BoundingBox>,
) -> RgbaImage {
    let mut canvas = image.to_rgba8();
    for b in boxes {
        draw_rect(&mut canvas, b);
    }
    canvas
}

/// Copy of `image` with every face outlined and labelled with its
/// expression and probability, e.g. `HAPPY 0.98`.
pub fn draw_expressions<'a>(
    image: &DynamicImage,
    faces: impl IntoIterator<Item = &'a FaceExpression>,
) -> RgbaImage {
    let mut canvas = image.to_rgba8();
    for face in faces {
        draw_rect(&mut canvas, &face.bbox);
        let label = format!("{} {:.2}", face.expression.as_str(), face.probability);
        draw_label(&mut canvas, &face.bbox, &label);
    }
    canvas
}

/// Text size in pixels, padding included.
fn label_size(text: &str) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    let width = chars * (GLYPH_WIDTH + 1) + 2 * LABEL_PADDING;
    (width, GLYPH_HEIGHT + 2 * LABEL_PADDING)
}

/// Label on a filled strip just above the box, or inside its top edge when
/// the box touches the top of the image.
fn draw_label(canvas: &mut RgbaImage, b: &BoundingBox, text: &str) {
    let (label_w, label_h) = label_size(text);
    let left = b.x.round().max(0.0) as u32;
    let top = b.y.round().max(0.0) as u32;
    let top = top.checked_sub(label_h).unwrap_or(top);

    for y in top..top + label_h {
        for x in left..left + label_w {
            put(canvas, x, y, BOX_COLOR);
        }
    }

    let mut pen_x = left + LABEL_PADDING;
    let pen_y = top + LABEL_PADDING;
    for c in text.chars() {
        if let Some(rows) = glyph(c.to_ascii_uppercase()) {
            for (dy, row) in rows.iter().enumerate() {
                for dx in 0..GLYPH_WIDTH {
                    if row & (1 << (GLYPH_WIDTH - 1 - dx)) != 0 {
                        put(canvas, pen_x + dx, pen_y + dy as u32, TEXT_COLOR);
                    }
                }
            }
        }
        pen_x += GLYPH_WIDTH + 1;
    }
}

fn put(canvas: &mut RgbaImage, x: u32, y: u32, color: Rgba<u8>) {
    if x < canvas.width() && y < canvas.height() {
        canvas.put_pixel(x, y, color);
    }
}

/// Glyphs for expression names and probabilities. Anything else is blank.
fn glyph(c: char) -> Option<[u8; 7]> {
    Some(match c {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        _ => return None,
    })
}

fn draw_rect(canvas: &mut RgbaImage, b: &BoundingBox) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp_x = |v: f32| (v.round().max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.round().max(0.0) as u32).min(h - 1);
    let (x0, x1) = (clamp_x(b.x), clamp_x(b.x + b.width));
    let (y0, y1) = (clamp_y(b.y), clamp_y(b.y + b.height));

    for t in 0..BOX_THICKNESS {
        for x in x0..=x1 {
            canvas.put_pixel(x, (y0 + t).min(h - 1), BOX_COLOR);
            canvas.put_pixel(x, y1.saturating_sub(t), BOX_COLOR);
        }
        for y in y0..=y1 {
            canvas.put_pixel((x0 + t).min(w - 1), y, BOX_COLOR);
            canvas.put_pixel(x1.saturating_sub(t), y, BOX_COLOR);
        }
    }
}

/// Encode as `data:image/png;base64,...`.
pub fn png_data_url(image: &RgbaImage) -> Result<String, image::ImageError> {
    let mut png = Cursor::new(Vec::new());
    image.write_to(&mut png, ImageFormat::Png)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png.into_inner())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::Expression;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn test_draw_outlines_box_edges_only() {
        let image = DynamicImage::new_rgb8(20, 20);
        let out = draw_detections(&image, &[bbox(5.0, 5.0, 10.0, 10.0)]);

        assert_eq!(*out.get_pixel(5, 5), BOX_COLOR);
        assert_eq!(*out.get_pixel(15, 10), BOX_COLOR);
        assert_eq!(*out.get_pixel(10, 10), Rgba([0, 0, 0, 255]));
        assert_eq!(*out.get_pixel(1, 1), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_draw_clamps_out_of_bounds_box() {
        let image = DynamicImage::new_rgb8(10, 10);
        let out = draw_detections(&image, &[bbox(-20.0, 5.0, 100.0, 100.0)]);
        assert_eq!(*out.get_pixel(9, 9), BOX_COLOR);
        assert_eq!(*out.get_pixel(0, 5), BOX_COLOR);
    }

    fn face(b: BoundingBox, expression: Expression) -> FaceExpression {
        FaceExpression {
            bbox: b,
            expression,
            probability: 0.98,
        }
    }

    fn count(image: &RgbaImage, color: Rgba<u8>) -> usize {
        image.pixels().filter(|p| **p == color).count()
    }

    #[test]
    fn test_every_expression_label_has_glyphs() {
        for expression in [
            Expression::Neutral,
            Expression::Happy,
            Expression::Surprised,
            Expression::Sad,
            Expression::Angry,
            Expression::Disgusted,
            Expression::Fearful,
            Expression::Contempt,
        ] {
            for c in expression.as_str().chars() {
                assert!(glyph(c.to_ascii_uppercase()).is_some(), "{c} in {expression}");
            }
        }
        assert!("0123456789.".chars().all(|c| glyph(c).is_some()));
    }

    #[test]
    fn test_expression_label_drawn_above_box() {
        let image = DynamicImage::new_rgb8(100, 60);
        let b = bbox(10.0, 30.0, 40.0, 20.0);
        let out = draw_expressions(&image, &[face(b, Expression::Happy)]);

        let (label_w, label_h) = label_size("happy 0.98");
        // Strip background starts right above the box.
        assert_eq!(*out.get_pixel(10, 30 - label_h), BOX_COLOR);
        assert_eq!(*out.get_pixel(10 + label_w - 1, 29), BOX_COLOR);
        // Text pixels exist inside the strip and nowhere else.
        let text_rows: Vec<u32> = out
            .enumerate_pixels()
            .filter(|(_, _, p)| **p == TEXT_COLOR)
            .map(|(_, y, _)| y)
            .collect();
        assert!(!text_rows.is_empty());
        assert!(text_rows.iter().all(|&y| y >= 30 - label_h && y < 30));
    }

    #[test]
    fn test_label_moves_inside_box_at_top_edge() {
        let image = DynamicImage::new_rgb8(40, 40);
        let out = draw_expressions(&image, &[face(bbox(0.0, 2.0, 30.0, 30.0), Expression::Sad)]);
        assert!(count(&out, TEXT_COLOR) > 0);
        assert_eq!(*out.get_pixel(0, 2), BOX_COLOR);
    }

    #[test]
    fn test_label_clipped_at_right_edge() {
        let image = DynamicImage::new_rgb8(12, 30);
        let out = draw_expressions(&image, &[face(bbox(6.0, 15.0, 5.0, 5.0), Expression::Disgusted)]);
        assert_eq!(out.dimensions(), (12, 30));
        assert!(count(&out, TEXT_COLOR) > 0);
    }

    #[test]
    fn test_png_data_url_roundtrips() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]));
        let url = png_data_url(&image).unwrap();
        let payload = url.strip_prefix("data:image/png;base64,").unwrap();

        let bytes = base64::engine::general_purpose::STANDARD.decode(payload).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded, image);
    }
}
