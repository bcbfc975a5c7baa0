//! Frame annotation.
//!
//! Everything here draws on a copy of the input frame; callers can keep using
//! the original and never observe a partially drawn overlay.

mod font;
mod palette;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::{ClassNames, Detection};
use crate::frame::Frame;

pub use palette::class_color;

/// Box outline thickness in pixels.
pub const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: u32 = 1;
const FPS_SCALE: u32 = 2;
const FPS_ORIGIN: (i32, i32) = (10, 10);

/// Label drawn above a detection box.
pub fn label_text(detection: &Detection, names: &ClassNames) -> String {
    format!(
        "{} {:.2}",
        names.name(detection.class_id),
        detection.confidence
    )
}

/// Draw boxes and labels for `detections` onto a copy of `frame`.
pub fn annotate(frame: &Frame, detections: &[Detection], names: &ClassNames) -> Frame {
    let mut canvas = frame.image().clone();
    for detection in detections {
        draw_detection(&mut canvas, detection, names);
    }
    Frame::new(frame.index(), canvas)
}

fn draw_detection(canvas: &mut RgbImage, detection: &Detection, names: &ClassNames) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let bbox = detection.bbox.clamped(width, height);
    let color = class_color(detection.class_id);

    let x = bbox.x1.round() as i32;
    let y = bbox.y1.round() as i32;
    let w = (bbox.x2.round() as i32 - x + 1).max(1) as u32;
    let h = (bbox.y2.round() as i32 - y + 1).max(1) as u32;
    draw_box(canvas, x, y, w, h, color, BOX_THICKNESS);

    let label = label_text(detection, names);
    let (_, label_h) = font::text_size(&label, LABEL_SCALE);
    let label_y = if y >= label_h as i32 {
        y - label_h as i32
    } else {
        y
    };
    font::draw_text(
        canvas,
        &label,
        x,
        label_y,
        LABEL_SCALE,
        palette::LABEL_TEXT,
        Some(color),
    );
}

/// Thick outline grown inwards from the given rectangle.
fn draw_box(canvas: &mut RgbImage, x: i32, y: i32, w: u32, h: u32, color: Rgb<u8>, thickness: u32) {
    for offset in 0..thickness {
        let inner_w = w.saturating_sub(2 * offset);
        let inner_h = h.saturating_sub(2 * offset);
        if inner_w == 0 || inner_h == 0 {
            break;
        }
        let rect = Rect::at(x + offset as i32, y + offset as i32).of_size(inner_w, inner_h);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// Human readable detection list, one line per detection.
pub fn detection_summary(detections: &[Detection], names: &ClassNames) -> String {
    if detections.is_empty() {
        return "No detections".to_string();
    }
    detections
        .iter()
        .map(|d| {
            format!(
                "Detected {} with confidence {:.2} at [{:.1}, {:.1}, {:.1}, {:.1}]",
                names.name(d.class_id),
                d.confidence,
                d.bbox.x1,
                d.bbox.y1,
                d.bbox.x2,
                d.bbox.y2
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Burn `FPS: <fps>` into a copy of `frame`.
pub fn overlay_fps(frame: &Frame, fps: f64) -> Frame {
    let mut canvas = frame.image().clone();
    font::draw_text(
        &mut canvas,
        &format!("FPS: {:.2}", fps),
        FPS_ORIGIN.0,
        FPS_ORIGIN.1,
        FPS_SCALE,
        palette::FPS_TEXT,
        None,
    );
    Frame::new(frame.index(), canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn blank(width: u32, height: u32) -> Frame {
        Frame::new(0, RgbImage::new(width, height))
    }

    #[test]
    fn annotate_draws_on_a_copy() {
        let frame = blank(64, 48);
        let before = frame.digest();
        let detection = Detection::new(0, 0.9, BoundingBox::new(10.0, 20.0, 40.0, 40.0));

        let annotated = annotate(&frame, &[detection], &ClassNames::coco());

        assert_eq!(frame.digest(), before);
        assert_ne!(annotated.digest(), before);
        assert!(!annotated.shares_pixels_with(&frame));
        assert_eq!(annotated.index(), frame.index());
        let color = class_color(0);
        assert_eq!(*annotated.image().get_pixel(10, 30), color);
        assert_eq!(*annotated.image().get_pixel(11, 30), color);
        assert_eq!(*annotated.image().get_pixel(25, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn annotate_without_detections_copies_pixels() {
        let frame = blank(8, 8);
        let annotated = annotate(&frame, &[], &ClassNames::coco());
        assert_eq!(annotated.digest(), frame.digest());
    }

    #[test]
    fn boxes_outside_the_frame_are_clamped() {
        let frame = blank(32, 32);
        let detection = Detection::new(5, 0.5, BoundingBox::new(-10.0, -10.0, 100.0, 100.0));
        let annotated = annotate(&frame, &[detection], &ClassNames::coco());
        assert_eq!(*annotated.image().get_pixel(31, 31), class_color(5));
    }

    #[test]
    fn label_and_summary_formatting() {
        let names = ClassNames::coco();
        let detection = Detection::new(2, 0.876, BoundingBox::new(1.0, 2.0, 30.0, 40.5));
        assert_eq!(label_text(&detection, &names), "car 0.88");
        assert_eq!(
            detection_summary(&[detection], &names),
            "Detected car with confidence 0.88 at [1.0, 2.0, 30.0, 40.5]"
        );
        assert_eq!(detection_summary(&[], &names), "No detections");
    }

    #[test]
    fn fps_overlay_is_green() {
        let frame = blank(200, 60);
        let burned = overlay_fps(&frame, 12.5);
        assert_ne!(burned.digest(), frame.digest());
        let has_green = burned.image().pixels().any(|p| *p == palette::FPS_TEXT);
        assert!(has_green);
    }
}
