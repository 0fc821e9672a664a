// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! AgriScan - pan-tilt camera scanning controller
//!
//! Sweeps a networked pan-tilt camera over a field of plants, finds leaves
//! with an object detector and escalates each find through disease
//! classification and treatment advice:
//! - HTTP link to the rig (motors, stills, MJPEG stream framing)
//! - Letterboxed YOLO-style detection with NMS on ONNX Runtime
//! - Serpentine raster planner and a validated scan state machine
//! - Live event fan-out and a JSON command channel over WebSocket
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Scan Orchestrator                     │
//! │   planner ─→ move/settle ─→ capture ─→ detect ─→ escalate │
//! ├──────────────┬──────────────┬──────────────┬─────────────┤
//! │  CameraRig   │   Detector   │ Classifier / │  Event Bus  │
//! │ (DeviceLink, │ (ONNX engine,│  Advisor /   │ (per-client │
//! │  simulator)  │  simulated)  │   Weather    │   queues)   │
//! └──────────────┴──────────────┴──────────────┴──────┬──────┘
//!                                                     ↓
//!                                          WebSocket + commands
//! ```

pub mod collaborators;
pub mod config;
pub mod core;
pub mod detection;
pub mod device;
pub mod streaming;

// Re-exports for convenience
pub use config::Config;
pub use core::{EventBus, ScanEvent, ScanOrchestrator, ScanState};
pub use detection::{Detection, DetectionEngine, Detector};
pub use device::{CameraRig, DeviceLink, SimulatedRig};
pub use streaming::{CommandHandler, WebSocketServer};

/// AgriScan version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// AgriScan name
pub const NAME: &str = "AgriScan";

/// Build info
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION.to_string(),
        target: std::env::consts::ARCH.to_string(),
        os: std::env::consts::OS.to_string(),
        features: enabled_features(),
    }
}

/// Build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Version string
    pub version: String,
    /// Target architecture
    pub target: String,
    /// Operating system
    pub os: String,
    /// Enabled features
    pub features: Vec<String>,
}

fn enabled_features() -> Vec<String> {
    let mut features = vec![];

    #[cfg(feature = "onnx")]
    features.push("onnx".to_string());

    #[cfg(feature = "cuda")]
    features.push("cuda".to_string());

    features
}
