// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! YOLO-style single-stage detector: letterbox, infer, decode, suppress

use std::path::Path;
use std::time::Instant;

use ndarray::{Array4, ArrayD, ArrayViewD, Axis, Ix2};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::letterbox::{to_nchw_tensor, Letterbox};
use super::nms::suppress;
use super::{Detection, DetectionError, Detector};
use crate::config::DetectionConfig;

/// File looked up next to the model to override thresholds and classes
pub const METADATA_FILE: &str = "model_metadata_v2.json";

/// Runs the raw network. Implementations own the model session.
pub trait InferenceBackend: Send + Sync {
    /// `input` is `[1, 3, H, W]`, RGB, scaled to [0, 1]
    fn infer(&self, input: Array4<f32>) -> Result<ArrayD<f32>, DetectionError>;

    fn name(&self) -> &str;
}

/// Optional sidecar describing how the model was trained
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelMetadata {
    pub model_name: Option<String>,
    pub confidence_threshold: Option<f32>,
    pub iou_threshold: Option<f32>,
    pub class_names: Option<Vec<String>>,
    /// `[height, width, channels]`
    pub input_shape: Option<Vec<u32>>,
}

impl ModelMetadata {
    /// Read the sidecar from the model's directory. A missing or unreadable
    /// file leaves the configured values alone.
    pub fn load_beside(model_path: &Path) -> Option<Self> {
        let path = model_path.parent()?.join(METADATA_FILE);
        if !path.exists() {
            return None;
        }
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Self>(&text).map_err(|e| e.to_string()));
        match parsed {
            Ok(meta) => {
                info!(
                    "Loaded model metadata: {}",
                    meta.model_name.as_deref().unwrap_or("unknown")
                );
                Some(meta)
            }
            Err(e) => {
                warn!("Could not load model metadata from {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn apply(&self, config: &mut DetectionConfig) {
        if let Some(conf) = self.confidence_threshold {
            config.confidence_threshold = conf;
        }
        if let Some(iou) = self.iou_threshold {
            config.iou_threshold = iou;
        }
        if let Some(names) = &self.class_names {
            if !names.is_empty() {
                config.class_names = names.clone();
            }
        }
        if let Some(shape) = &self.input_shape {
            if shape.len() >= 2 && shape[0] > 0 && shape[1] > 0 {
                config.input_height = shape[0];
                config.input_width = shape[1];
            }
        }
    }
}

/// Leaf detector over an arbitrary inference backend
pub struct DetectionEngine {
    backend: Box<dyn InferenceBackend>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
    class_names: Vec<String>,
    pad_value: u8,
}

impl DetectionEngine {
    pub fn new(backend: Box<dyn InferenceBackend>, config: &DetectionConfig) -> Self {
        info!(
            "Detection engine ready: backend={}, input={}x{}, conf={}, iou={}",
            backend.name(),
            config.input_width,
            config.input_height,
            config.confidence_threshold,
            config.iou_threshold
        );
        Self {
            backend,
            input_width: config.input_width,
            input_height: config.input_height,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            class_names: config.class_names.clone(),
            pad_value: config.pad_value,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Detect leaves in an encoded image (JPEG or PNG)
    pub fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectionError> {
        let started = Instant::now();

        let decoded = image::load_from_memory(image)?;
        let letterbox = Letterbox::compute(
            decoded.width(),
            decoded.height(),
            self.input_width,
            self.input_height,
        );
        let padded = letterbox.apply(&decoded, self.pad_value);
        let tensor = to_nchw_tensor(&padded);

        let output = self.backend.infer(tensor)?;
        let detections = self.postprocess(output.view(), &letterbox)?;

        info!(
            "Detected {} leaves in {:.1}ms",
            detections.len(),
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(detections)
    }

    /// Decode raw `[1, 4+C, N]` (or transposed) output into detections in
    /// original image space
    pub fn postprocess(
        &self,
        output: ArrayViewD<f32>,
        letterbox: &Letterbox,
    ) -> Result<Vec<Detection>, DetectionError> {
        let shape = output.shape().to_vec();
        let table = match output.ndim() {
            3 if shape[0] >= 1 => output.index_axis_move(Axis(0), 0),
            2 => output,
            _ => return Err(DetectionError::OutputShape(shape)),
        };
        let table = table
            .into_dimensionality::<Ix2>()
            .map_err(|_| DetectionError::OutputShape(shape.clone()))?;

        // Rows must end up as predictions, columns as [cx, cy, w, h, scores..]
        let expected = 4 + self.class_names.len().max(1);
        let (rows, cols) = table.dim();
        let table = if cols == expected && rows != expected {
            table
        } else if rows == expected && cols != expected {
            table.reversed_axes()
        } else if rows < cols {
            table.reversed_axes()
        } else {
            table
        };

        let num_features = table.ncols();
        if num_features < 5 {
            return Err(DetectionError::OutputShape(shape));
        }
        let num_classes = num_features - 4;
        debug!(
            "Decoding {} candidates with {} classes",
            table.nrows(),
            num_classes
        );

        let mut candidates = Vec::new();
        for row in table.rows() {
            let (class_id, confidence) = if num_classes == 1 {
                (0, row[4])
            } else {
                (4..num_features)
                    .map(|c| (c - 4, row[c]))
                    .fold((0, f32::NEG_INFINITY), |best, cur| {
                        if cur.1 > best.1 {
                            cur
                        } else {
                            best
                        }
                    })
            };
            if confidence.is_nan() || confidence < self.confidence_threshold {
                continue;
            }

            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let [x1, y1, x2, y2] =
                letterbox.inverse_box([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);

            candidates.push(Detection {
                x1,
                y1,
                x2,
                y2,
                confidence,
                class_name: self.class_name(class_id),
            });
        }

        let mut detections: Vec<Detection> = suppress(candidates, self.iou_threshold)
            .into_iter()
            .map(round_detection)
            .collect();
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(detections)
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl Detector for DetectionEngine {
    fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectionError> {
        DetectionEngine::detect(self, image)
    }
}

fn round_to(value: f32, places: i32) -> f32 {
    let scale = 10f32.powi(places);
    (value * scale).round() / scale
}

fn round_detection(d: Detection) -> Detection {
    Detection {
        x1: round_to(d.x1, 1),
        y1: round_to(d.y1, 1),
        x2: round_to(d.x2, 1),
        y2: round_to(d.y2, 1),
        confidence: round_to(d.confidence, 4),
        class_name: d.class_name,
    }
}
