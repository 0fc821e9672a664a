//! Detection module - leaf detection, letterbox geometry and suppression

mod engine;
mod letterbox;
mod nms;
mod simulated;
#[cfg(feature = "onnx")]
mod onnx;

pub use engine::{DetectionEngine, InferenceBackend, ModelMetadata};
pub use letterbox::{to_nchw_tensor, Letterbox};
pub use nms::{iou, nms, suppress, IOU_EPSILON};
pub use simulated::SimulatedDetector;
#[cfg(feature = "onnx")]
pub use onnx::OnnxBackend;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from turning an image into detections
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("inference backend error: {0}")]
    Backend(String),

    #[error("unexpected model output shape {0:?}")]
    OutputShape(Vec<usize>),

    #[error("model not found at {0:?}")]
    ModelNotFound(PathBuf),
}

/// A detected object in original image pixel space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_name: String,
}

impl Detection {
    pub fn bbox(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        iou(&self.bbox(), &other.bbox())
    }
}

/// Anything that can find leaves in an encoded image
pub trait Detector: Send + Sync {
    /// Detections sorted by confidence, highest first. An empty list is a
    /// normal "nothing here" answer.
    fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectionError>;
}

/// Highest-confidence detection, if any
pub fn best(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(conf: f32) -> Detection {
        Detection {
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 20.0,
            confidence: conf,
            class_name: "Tomato_Leaf".to_string(),
        }
    }

    #[test]
    fn test_detection_geometry() {
        let d = det(0.5);
        assert_eq!(d.width(), 10.0);
        assert_eq!(d.height(), 20.0);
        assert_eq!(d.area(), 200.0);
        assert!((d.iou(&d) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_best_picks_highest_confidence() {
        let dets = vec![det(0.3), det(0.9), det(0.6)];
        assert_eq!(best(&dets).unwrap().confidence, 0.9);
        assert!(best(&[]).is_none());
    }

    #[test]
    fn test_detection_serializes_flat() {
        let json = serde_json::to_value(det(0.75)).unwrap();
        assert_eq!(json["class_name"], "Tomato_Leaf");
        assert_eq!(json["x2"], 10.0);
    }
}
