// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Configuration module

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::streaming::StreamingConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Application version
    pub version: String,

    /// Log level
    pub log_level: String,

    /// Enable demo mode (simulated rig)
    pub demo_mode: bool,

    /// Camera rig connection
    pub device: DeviceConfig,

    /// Leaf detector
    pub detection: DetectionConfig,

    /// Raster scan behaviour
    pub scan: ScanConfig,

    /// Classifier / advisor / weather services
    pub collaborators: CollaboratorConfig,

    /// Command and event surface
    pub streaming: StreamingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "AgriScan".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            demo_mode: false,
            device: DeviceConfig::default(),
            detection: DetectionConfig::default(),
            scan: ScanConfig::default(),
            collaborators: CollaboratorConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            // Create parent directories
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Reject values the scanner cannot run with
    pub fn validate(&self) -> Result<()> {
        self.scan.validate()?;

        let det = &self.detection;
        if !(0.0..=1.0).contains(&det.confidence_threshold) {
            return Err(anyhow!(
                "detection.confidence_threshold must be in [0, 1], got {}",
                det.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&det.iou_threshold) {
            return Err(anyhow!(
                "detection.iou_threshold must be in [0, 1], got {}",
                det.iou_threshold
            ));
        }
        if det.input_width == 0 || det.input_height == 0 {
            return Err(anyhow!("detection input size must be non-zero"));
        }
        if det.class_names.is_empty() {
            return Err(anyhow!("detection.class_names must not be empty"));
        }
        if self.device.port == 0 {
            return Err(anyhow!("device.port must be non-zero"));
        }
        Ok(())
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("agriscan"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Camera rig connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Rig IP or hostname. Nothing is contacted until this is set.
    pub address: Option<String>,

    /// HTTP port of the rig
    pub port: u16,

    /// Connect + control command timeout
    pub control_timeout_ms: u64,

    /// Still capture read timeout
    pub capture_timeout_ms: u64,

    /// Liveness probe timeout
    pub health_timeout_ms: u64,

    /// Per-read timeout on the long-lived stream connection
    pub stream_read_timeout_ms: u64,

    /// Degrees per manual motor command when none is given
    pub manual_step: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: 80,
            control_timeout_ms: 5_000,
            capture_timeout_ms: 15_000,
            health_timeout_ms: 3_000,
            stream_read_timeout_ms: 30_000,
            manual_step: 5,
        }
    }
}

/// Leaf detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// ONNX model file
    pub model_path: PathBuf,

    /// Model input width
    pub input_width: u32,

    /// Model input height
    pub input_height: u32,

    /// Minimum candidate confidence (inclusive)
    pub confidence_threshold: f32,

    /// NMS overlap threshold
    pub iou_threshold: f32,

    /// Class labels by output index
    pub class_names: Vec<String>,

    /// Letterbox fill grey
    pub pad_value: u8,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./models/YoloV8/best.onnx"),
            input_width: 640,
            input_height: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.6,
            class_names: vec!["Tomato_Leaf".to_string()],
            pad_value: 114,
        }
    }
}

/// Raster scan configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub pan_min: i32,
    pub pan_max: i32,
    pub tilt_min: i32,
    pub tilt_max: i32,

    /// Degrees between raster positions on both axes
    pub step: i32,

    /// Best detection must reach this to escalate
    pub detection_confidence: f32,

    /// Classifier model passed to classify()
    pub model_type: String,

    /// Settle after moving to the first position
    pub initial_settle_ms: u64,

    /// Settle after every later move
    pub settle_ms: u64,

    /// Pause between positions
    pub inter_position_ms: u64,

    /// Pause after a result so consumers can render it
    pub result_pause_ms: u64,

    /// Bounded queue length per event subscriber
    pub subscriber_capacity: usize,

    /// Take a fresh still before classifying
    pub recapture_on_detection: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            pan_min: 0,
            pan_max: 180,
            tilt_min: 30,
            tilt_max: 120,
            step: 15,
            detection_confidence: 0.25,
            model_type: "mobilenet".to_string(),
            initial_settle_ms: 1_000,
            settle_ms: 300,
            inter_position_ms: 100,
            result_pause_ms: 1_000,
            subscriber_capacity: 100,
            recapture_on_detection: false,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.step <= 0 {
            return Err(anyhow!("scan.step must be positive, got {}", self.step));
        }
        if self.pan_min > self.pan_max {
            return Err(anyhow!(
                "scan pan range is empty ({}..{})",
                self.pan_min,
                self.pan_max
            ));
        }
        if self.tilt_min > self.tilt_max {
            return Err(anyhow!(
                "scan tilt range is empty ({}..{})",
                self.tilt_min,
                self.tilt_max
            ));
        }
        for (name, v) in [
            ("pan_min", self.pan_min),
            ("pan_max", self.pan_max),
            ("tilt_min", self.tilt_min),
            ("tilt_max", self.tilt_max),
        ] {
            if !(0..=180).contains(&v) {
                return Err(anyhow!("scan.{} must be in [0, 180], got {}", name, v));
            }
        }
        if !(0.0..=1.0).contains(&self.detection_confidence) {
            return Err(anyhow!(
                "scan.detection_confidence must be in [0, 1], got {}",
                self.detection_confidence
            ));
        }
        if self.subscriber_capacity == 0 {
            return Err(anyhow!("scan.subscriber_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// External service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Disease classifier base URL
    pub classifier_url: String,

    /// Advisory service base URL
    pub advisor_url: String,

    /// Weather service base URL; no weather context when unset
    pub weather_url: Option<String>,

    /// Request timeout for all three
    pub timeout_secs: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            classifier_url: "http://127.0.0.1:8000".to_string(),
            advisor_url: "http://127.0.0.1:8000".to_string(),
            weather_url: None,
            timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.capture_timeout_ms, 15_000);
        assert_eq!(config.scan.step, 15);
        assert_eq!(config.detection.class_names, vec!["Tomato_Leaf"]);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.device.address = Some("192.168.4.1".to_string());
        config.scan.step = 30;
        config.collaborators.weather_url = Some("http://weather.local".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.device.address.as_deref(), Some("192.168.4.1"));
        assert_eq!(loaded.scan, config.scan);
        assert_eq!(
            loaded.collaborators.weather_url.as_deref(),
            Some("http://weather.local")
        );
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.scan, ScanConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan]\nstep = 45\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.scan.step, 45);
        assert_eq!(config.scan.tilt_min, 30);
        assert_eq!(config.device.port, 80);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.scan.step = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scan.pan_min = 100;
        config.scan.pan_max = 50;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scan.tilt_max = 200;
        assert!(config.validate().is_err());
    }
}
