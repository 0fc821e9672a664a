// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Greedy non-maximum suppression over corner-format boxes

use super::Detection;

/// Added to the IoU denominator so degenerate boxes never divide by zero
pub const IOU_EPSILON: f32 = 1e-6;

/// Intersection-over-union of two `[x1, y1, x2, y2]` boxes
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);

    inter / (area_a + area_b - inter + IOU_EPSILON)
}

/// Indices of the boxes that survive, in descending score order.
///
/// A box is suppressed only when its IoU with an already kept box is
/// strictly above `iou_threshold`.
pub fn nms(boxes: &[[f32; 4]], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len())).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut keep: Vec<usize> = Vec::with_capacity(order.len());
    for idx in order {
        if keep
            .iter()
            .all(|&kept| iou(&boxes[kept], &boxes[idx]) <= iou_threshold)
        {
            keep.push(idx);
        }
    }
    keep
}

/// Run [`nms`] over detections, returning survivors highest confidence first
pub fn suppress(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let boxes: Vec<[f32; 4]> = detections.iter().map(Detection::bbox).collect();
    let scores: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
    let keep = nms(&boxes, &scores, iou_threshold);

    let mut slots: Vec<Option<Detection>> = detections.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(b: [f32; 4], conf: f32) -> Detection {
        Detection {
            x1: b[0],
            y1: b[1],
            x2: b[2],
            y2: b[3],
            confidence: conf,
            class_name: "Tomato_Leaf".to_string(),
        }
    }

    /// Two 100x100 boxes offset along x so their IoU is exactly `target`
    fn pair_with_iou(target: f32) -> ([f32; 4], [f32; 4]) {
        // inter = 100 * (100 - dx), union = 2 * 10000 - inter
        let inter = 2.0 * 10000.0 * target / (1.0 + target);
        let dx = 100.0 - inter / 100.0;
        ([0.0, 0.0, 100.0, 100.0], [dx, 0.0, 100.0 + dx, 100.0])
    }

    #[test]
    fn test_iou_basics() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-5);
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        // Degenerate boxes stay finite
        let zero = [5.0, 5.0, 5.0, 5.0];
        assert_eq!(iou(&zero, &zero), 0.0);
    }

    #[test]
    fn test_heavy_overlap_keeps_stronger_box() {
        let (a, b) = pair_with_iou(0.7);
        assert!((iou(&a, &b) - 0.7).abs() < 1e-3);

        let kept = suppress(vec![det(b, 0.8), det(a, 0.9)], 0.6);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[0].bbox(), a);
    }

    #[test]
    fn test_overlap_at_or_below_threshold_survives() {
        let (a, b) = pair_with_iou(0.5);
        let kept = nms(&[a, b], &[0.9, 0.8], 0.6);
        assert_eq!(kept, vec![0, 1]);

        // Equality with the threshold does not suppress
        let same = [0.0, 0.0, 10.0, 10.0];
        let kept = nms(&[same, same], &[0.9, 0.8], 1.0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_suppress_is_idempotent() {
        let dets = vec![
            det([0.0, 0.0, 50.0, 50.0], 0.9),
            det([5.0, 5.0, 55.0, 55.0], 0.85),
            det([200.0, 200.0, 260.0, 250.0], 0.6),
            det([198.0, 202.0, 258.0, 252.0], 0.7),
            det([400.0, 0.0, 420.0, 30.0], 0.3),
        ];
        let once = suppress(dets, 0.6);
        let twice = suppress(once.clone(), 0.6);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
        assert!(once.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_empty_input() {
        assert!(nms(&[], &[], 0.5).is_empty());
        assert!(suppress(Vec::new(), 0.5).is_empty());
    }
}
