use anyhow::{Result, anyhow};
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use ml_core::{LandmarkSet, ScoreResult, landmarks::POSE_CONNECTIONS};
use video_ingest::Frame;

pub(crate) const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub(crate) const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub(crate) const RED: Rgb<u8> = Rgb([255, 0, 0]);
const SKELETON_LINE: Rgb<u8> = Rgb([255, 255, 255]);
const SKELETON_POINT: Rgb<u8> = Rgb([255, 64, 64]);

const TEXT_X: i32 = 10;
/// Baselines of the accuracy, feedback and pose-name lines.
pub(crate) const TEXT_BASELINES: [i32; 3] = [30, 70, 110];
pub(crate) const TEXT_SCALE: i32 = 2;
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_WIDTH + 1;
const SKELETON_THICKNESS: i32 = 2;
const SKELETON_POINT_RADIUS: i32 = 3;

/// Convert a captured BGR frame into an RGB image.
pub(crate) fn frame_to_rgb(frame: &Frame) -> Result<RgbImage> {
    let expected = Frame::expected_len(frame.width, frame.height, frame.format);
    if frame.data.len() != expected {
        return Err(anyhow!(
            "frame buffer holds {} bytes, expected {expected} for {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        ));
    }
    RgbImage::from_vec(frame.width, frame.height, bgr_to_rgb(&frame.data))
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}

/// Draw the detected skeleton and the three feedback lines.
pub(crate) fn draw_feedback(image: &mut RgbImage, result: &ScoreResult, landmarks: &LandmarkSet) {
    draw_skeleton(image, landmarks);

    let verdict = if result.positive { GREEN } else { RED };
    let lines = [
        (format!("Pose Accuracy: {}%", result.score), BLUE),
        (result.feedback_text.clone(), verdict),
        (result.pose_name.clone(), verdict),
    ];
    for ((text, color), baseline) in lines.iter().zip(TEXT_BASELINES) {
        draw_label(
            image,
            TEXT_X,
            baseline - GLYPH_HEIGHT * TEXT_SCALE,
            text,
            *color,
            TEXT_SCALE,
        );
    }
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// Landmarks are image-normalised; points outside the frame are clipped.
fn draw_skeleton(image: &mut RgbImage, landmarks: &LandmarkSet) {
    let (width, height) = (image.width() as f64, image.height() as f64);
    let pixels: Vec<(i32, i32)> = landmarks
        .points()
        .iter()
        .map(|p| ((p.x * width).round() as i32, (p.y * height).round() as i32))
        .collect();

    for &(a, b) in POSE_CONNECTIONS {
        if let (Some(&pa), Some(&pb)) = (pixels.get(a), pixels.get(b)) {
            draw_line(image, pa, pb, SKELETON_LINE, SKELETON_THICKNESS);
        }
    }
    for &point in &pixels {
        draw_circle(image, point, SKELETON_POINT_RADIUS, SKELETON_POINT);
    }
}

fn draw_line(image: &mut RgbImage, p0: (i32, i32), p1: (i32, i32), color: Rgb<u8>, thickness: i32) {
    let (mut x0, mut y0) = p0;
    let (x1, y1) = p1;
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(image, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(image: &mut RgbImage, center: (i32, i32), radius: i32, color: Rgb<u8>) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(image, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 || x >= image.width() as i32 || y >= image.height() as i32 {
        return;
    }
    image.put_pixel(x as u32, y as u32, color);
}

/// Render `text` with the built-in 5x7 font, each font pixel drawn as a
/// `scale`x`scale` block. `(x, top)` is the top-left corner of the first glyph.
fn draw_label(image: &mut RgbImage, mut x: i32, top: i32, text: &str, color: Rgb<u8>, scale: i32) {
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        let px = x + col * scale;
                        let py = top + row as i32 * scale;
                        for sy in 0..scale {
                            for sx in 0..scale {
                                put_pixel_safe(image, px + sx, py + sy, color);
                            }
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ',' => [0, 0, 0, 0, 0b01100, 0b00100, 0b01000],
        '\'' => [0b00100, 0b00100, 0b01000, 0, 0, 0, 0],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}
