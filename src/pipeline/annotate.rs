use image::{Rgb, RgbImage};

use crate::common::{DetectionSet, Frame, PixelFormat};

const BORDER_THICKNESS: u32 = 2;

// Distinct colours per label, cycled by a cheap string hash.
const PALETTE: [[u8; 3]; 6] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [72, 249, 10],
    [0, 194, 255],
    [132, 56, 255],
];

pub fn label_color(label: &str) -> [u8; 3] {
    let hash = label
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    PALETTE[hash % PALETTE.len()]
}

/// Renders detection boxes onto a display-format copy of `frame`.
pub fn annotate(frame: &Frame, detections: &DetectionSet) -> Frame {
    let mut pixels = frame.display_pixels();
    for detection in detections {
        draw_rectangle(
            &mut pixels,
            detection.bbox.x1.round() as i64,
            detection.bbox.y1.round() as i64,
            detection.bbox.x2.round() as i64,
            detection.bbox.y2.round() as i64,
            label_color(&detection.label),
        );
    }
    frame.derive(pixels, PixelFormat::Rgb)
}

/// Draws a hollow rectangle, clamped to the image.
pub fn draw_rectangle(pixels: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64, rgb: [u8; 3]) {
    let (width, height) = pixels.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let clamp_x = |x: i64| x.clamp(0, i64::from(width) - 1) as u32;
    let clamp_y = |y: i64| y.clamp(0, i64::from(height) - 1) as u32;
    let (x1, x2) = (clamp_x(x1.min(x2)), clamp_x(x1.max(x2)));
    let (y1, y2) = (clamp_y(y1.min(y2)), clamp_y(y1.max(y2)));
    let color = Rgb(rgb);

    for t in 0..BORDER_THICKNESS {
        for x in x1..=x2 {
            pixels.put_pixel(x, (y1 + t).min(y2), color);
            pixels.put_pixel(x, y2.saturating_sub(t).max(y1), color);
        }
        for y in y1..=y2 {
            pixels.put_pixel((x1 + t).min(x2), y, color);
            pixels.put_pixel(x2.saturating_sub(t).max(x1), y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{BoundingBox, Detection, Resolution};

    #[test]
    fn annotation_is_display_format_and_keeps_identity() {
        let frame = Frame::filled(Resolution::new(64, 48), [0, 0, 0], PixelFormat::Bgr);
        let detections = DetectionSet::new(vec![Detection::new(
            "car",
            0.9,
            BoundingBox::new(10.0, 10.0, 30.0, 20.0),
        )]);
        let annotated = annotate(&frame, &detections);

        assert_eq!(annotated.format(), PixelFormat::Rgb);
        assert_eq!(annotated.frame_id(), frame.frame_id());
        assert_eq!(annotated.pixels().get_pixel(10, 10), &Rgb(label_color("car")));
        assert_eq!(annotated.pixels().get_pixel(20, 15), &Rgb([0, 0, 0]));
        assert_eq!(frame.pixels().get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_outside_the_frame_are_clamped() {
        let mut pixels = RgbImage::new(8, 8);
        draw_rectangle(&mut pixels, -5, -5, 100, 100, [1, 2, 3]);
        assert_eq!(pixels.get_pixel(0, 0), &Rgb([1, 2, 3]));
        assert_eq!(pixels.get_pixel(7, 7), &Rgb([1, 2, 3]));
        assert_eq!(pixels.get_pixel(4, 4), &Rgb([0, 0, 0]));
    }
}
