//! Core module - scan state machine, raster planner, event fan-out, orchestration

mod event_bus;
mod orchestrator;
mod planner;
mod state;

pub use event_bus::{event_types, EventBus, ScanEvent, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use orchestrator::{ManualClassification, ScanOrchestrator, ScanTiming};
pub use planner::{RasterPattern, ScanPosition, SERVO_MAX, SERVO_MIN};
pub use state::ScanState;

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::config::ScanConfig;
use crate::detection::{Detection, DetectionError};
use crate::device::DeviceError;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("camera rig not connected")]
    NotConnected,

    #[error("auto-scan already running")]
    AlreadyRunning,

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: ScanState, to: ScanState },

    #[error("invalid scan pattern: {0}")]
    InvalidPattern(String),

    #[error("detection confidence must be in [0, 1], got {0}")]
    InvalidConfidence(f32),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error("{stage} failed: {message}")]
    Collaborator { stage: &'static str, message: String },
}

impl ScanError {
    pub fn collaborator(stage: &'static str, err: anyhow::Error) -> Self {
        ScanError::Collaborator {
            stage,
            message: format!("{:#}", err),
        }
    }
}

pub(crate) fn encode_image(image: &[u8]) -> String {
    STANDARD.encode(image)
}

fn serialize_image<S: Serializer>(image: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&encode_image(image))
}

/// Outcome of one escalation, kept for the lifetime of a scan session
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub scan_index: u32,
    pub detections: Vec<Detection>,
    pub disease: String,
    pub disease_confidence: f32,
    pub classification_model: String,
    pub all_predictions: HashMap<String, f32>,
    pub advice: Option<serde_json::Value>,
    #[serde(rename = "image_base64", serialize_with = "serialize_image")]
    pub image: Bytes,
    pub position: ScanPosition,
    pub timestamp: DateTime<Utc>,
}

/// Per-scan parameters; `start_scan` overrides fall back to configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOptions {
    pub model_type: String,
    pub detection_confidence: f32,
    pub pattern: RasterPattern,
}

impl ScanOptions {
    pub fn from_config(config: &ScanConfig) -> Result<Self, ScanError> {
        Ok(Self {
            model_type: config.model_type.clone(),
            detection_confidence: config.detection_confidence,
            pattern: RasterPattern::from_config(config)?,
        })
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            model_type: "mobilenet".to_string(),
            detection_confidence: 0.25,
            pattern: RasterPattern::default(),
        }
    }
}

/// Read-only snapshot for status queries
#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub state: ScanState,
    pub connected: bool,
    pub scanning: bool,
    pub results: usize,
    pub subscribers: usize,
    pub position_index: usize,
    pub total_positions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_result_wire_shape() {
        let result = ScanResult {
            scan_index: 2,
            detections: Vec::new(),
            disease: "Late_Blight".to_string(),
            disease_confidence: 0.8,
            classification_model: "mobilenet".to_string(),
            all_predictions: HashMap::new(),
            advice: None,
            image: Bytes::from_static(b"abc"),
            position: ScanPosition { pan: 15, tilt: 30 },
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["image_base64"], "YWJj");
        assert_eq!(value["position"]["pan"], 15);
        assert!(value["advice"].is_null());
    }

    #[test]
    fn test_options_from_config() {
        let options = ScanOptions::from_config(&ScanConfig::default()).unwrap();
        assert_eq!(options, ScanOptions::default());

        let bad = ScanConfig {
            step: 0,
            ..ScanConfig::default()
        };
        assert!(ScanOptions::from_config(&bad).is_err());
    }

    #[test]
    fn test_collaborator_error_message() {
        let err = ScanError::collaborator("classification", anyhow::anyhow!("model offline"));
        assert_eq!(err.to_string(), "classification failed: model offline");
    }
}
