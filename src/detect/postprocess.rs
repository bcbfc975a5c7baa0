//! YOLOv8-style output decoding and non-maximum suppression.

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection};

#[derive(Clone, Copy, Debug)]
pub struct PostprocessParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

/// Decode a `[1, 4 + classes, candidates]` tensor (or its transpose).
///
/// With `num_classes` known, the axis holding `4 + num_classes` values is the
/// attribute axis. Otherwise attributes are assumed to run along the shorter
/// axis, which holds for real exports (84 channels, 8400 candidates).
///
/// Box coordinates are in model input space and are multiplied by
/// `(scale_x, scale_y)` to land in frame pixels.
pub fn decode_yolov8(
    data: &[f32],
    shape: &[usize],
    num_classes: Option<usize>,
    params: &PostprocessParams,
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<Detection>> {
    let (rows, cols) = match shape {
        [1, rows, cols] => (*rows, *cols),
        [rows, cols] => (*rows, *cols),
        other => return Err(anyhow!("unexpected detector output shape {:?}", other)),
    };
    if data.len() != rows * cols {
        return Err(anyhow!(
            "detector output has {} values, shape {:?} needs {}",
            data.len(),
            shape,
            rows * cols
        ));
    }

    let channels_first = match num_classes.map(|n| n + 4) {
        Some(expected) if rows == expected => true,
        Some(expected) if cols == expected => false,
        _ => rows <= cols,
    };
    let (channels, candidates) = if channels_first {
        (rows, cols)
    } else {
        (cols, rows)
    };
    if channels < 5 {
        return Err(anyhow!("detector output has only {} channels", channels));
    }
    let at = |channel: usize, candidate: usize| -> f32 {
        if channels_first {
            data[channel * candidates + candidate]
        } else {
            data[candidate * channels + channel]
        }
    };

    let mut detections = Vec::new();
    for i in 0..candidates {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..channels - 4 {
            let score = at(4 + class, i);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !best_score.is_finite() || best_score < params.confidence_threshold {
            continue;
        }
        let bbox = BoundingBox::from_center(at(0, i), at(1, i), at(2, i), at(3, i))
            .scaled(scale_x, scale_y);
        detections.push(Detection::new(best_class, best_score, bbox));
    }

    Ok(non_max_suppression(
        detections,
        params.iou_threshold,
        params.max_detections,
    ))
}

/// Class-aware NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in detections {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PostprocessParams {
        PostprocessParams {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 10,
        }
    }

    #[test]
    fn nms_keeps_best_of_overlapping_same_class() {
        let a = Detection::new(0, 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let b = Detection::new(0, 0.8, BoundingBox::new(1.0, 1.0, 10.0, 10.0));
        let c = Detection::new(1, 0.7, BoundingBox::new(1.0, 1.0, 10.0, 10.0));
        let kept = non_max_suppression(vec![b, a.clone(), c.clone()], 0.45, 10);
        assert_eq!(kept, vec![a, c]);
    }

    #[test]
    fn nms_caps_output() {
        let dets = (0..5)
            .map(|i| {
                let x = i as f32 * 100.0;
                Detection::new(0, 0.5, BoundingBox::new(x, 0.0, x + 10.0, 10.0))
            })
            .collect();
        assert_eq!(non_max_suppression(dets, 0.45, 3).len(), 3);
    }

    #[test]
    fn decodes_channels_first_output() -> Result<()> {
        // 2 classes, 3 candidates: rows = cx, cy, w, h, cls0, cls1
        let data = vec![
            10.0, 50.0, 90.0, // cx
            10.0, 50.0, 90.0, // cy
            4.0, 4.0, 4.0, // w
            4.0, 4.0, 4.0, // h
            0.9, 0.1, 0.0, // class 0
            0.0, 0.6, 0.1, // class 1
        ];
        let dets = decode_yolov8(&data, &[1, 6, 3], Some(2), &params(), 2.0, 1.0)?;
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_id, 0);
        assert_eq!(dets[0].bbox, BoundingBox::new(16.0, 8.0, 24.0, 12.0));
        assert_eq!(dets[1].class_id, 1);
        Ok(())
    }

    #[test]
    fn decodes_transposed_output() -> Result<()> {
        let data = vec![
            10.0, 10.0, 4.0, 4.0, 0.1, 0.95, // candidate 0
            50.0, 50.0, 4.0, 4.0, 0.2, 0.1, // candidate 1
            90.0, 90.0, 4.0, 4.0, 0.0, 0.0, // candidate 2
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, // candidate 3
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, // candidate 4
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, // candidate 5
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, // candidate 6
        ];
        let dets = decode_yolov8(&data, &[1, 7, 6], Some(2), &params(), 1.0, 1.0)?;
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
        Ok(())
    }

    #[test]
    fn unknown_class_count_falls_back_to_shorter_axis() -> Result<()> {
        // 1 class, 8 candidates, channels first: only the first scores.
        let mut data = vec![0.0f32; 5 * 8];
        data[0] = 20.0;
        data[8] = 20.0;
        data[16] = 6.0;
        data[24] = 6.0;
        data[32] = 0.8;
        let dets = decode_yolov8(&data, &[1, 5, 8], None, &params(), 1.0, 1.0)?;
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(17.0, 17.0, 23.0, 23.0));
        Ok(())
    }

    #[test]
    fn rejects_mismatched_shape() {
        assert!(decode_yolov8(&[0.0; 5], &[1, 6, 3], Some(2), &params(), 1.0, 1.0).is_err());
    }
}
