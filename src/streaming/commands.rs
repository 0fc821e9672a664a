// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! JSON command channel
//!
//! Frames look like `{"command": "motor_left", "step": 10}`. Every known
//! command is answered with `{"type": "ack", "command", "success"}`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::core::{RasterPattern, ScanError, ScanOptions, ScanOrchestrator, SERVO_MAX, SERVO_MIN};
use crate::device::Direction;

fn default_step() -> u32 {
    5
}

fn default_pan() -> i32 {
    90
}

fn default_tilt() -> i32 {
    75
}

/// Optional per-scan overrides; anything missing comes from configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScanOverrides {
    pub model_type: Option<String>,
    pub detection_confidence: Option<f32>,
    pub pan_min: Option<i32>,
    pub pan_max: Option<i32>,
    pub tilt_min: Option<i32>,
    pub tilt_max: Option<i32>,
    pub step: Option<i32>,
}

impl ScanOverrides {
    pub fn apply(&self, defaults: &ScanOptions) -> Result<ScanOptions, ScanError> {
        let base = defaults.pattern;
        let pattern = RasterPattern::new(
            self.pan_min.unwrap_or(base.pan_min),
            self.pan_max.unwrap_or(base.pan_max),
            self.tilt_min.unwrap_or(base.tilt_min),
            self.tilt_max.unwrap_or(base.tilt_max),
            self.step.unwrap_or(base.step),
        )?;
        let detection_confidence = self
            .detection_confidence
            .unwrap_or(defaults.detection_confidence);
        // NaN fails the range check too
        if !(0.0..=1.0).contains(&detection_confidence) {
            return Err(ScanError::InvalidConfidence(detection_confidence));
        }
        Ok(ScanOptions {
            model_type: self
                .model_type
                .clone()
                .unwrap_or_else(|| defaults.model_type.clone()),
            detection_confidence,
            pattern,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    StartScan(ScanOverrides),
    StopScan,
    MotorLeft {
        #[serde(default = "default_step")]
        step: u32,
    },
    MotorRight {
        #[serde(default = "default_step")]
        step: u32,
    },
    MotorUp {
        #[serde(default = "default_step")]
        step: u32,
    },
    MotorDown {
        #[serde(default = "default_step")]
        step: u32,
    },
    MotorCenter,
    MotorStop,
    SetPosition {
        #[serde(default = "default_pan")]
        pan: i32,
        #[serde(default = "default_tilt")]
        tilt: i32,
    },
}

impl Command {
    pub const NAMES: [&'static str; 9] = [
        "start_scan",
        "stop_scan",
        "motor_left",
        "motor_right",
        "motor_up",
        "motor_down",
        "motor_center",
        "motor_stop",
        "set_position",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::StartScan(_) => "start_scan",
            Command::StopScan => "stop_scan",
            Command::MotorLeft { .. } => "motor_left",
            Command::MotorRight { .. } => "motor_right",
            Command::MotorUp { .. } => "motor_up",
            Command::MotorDown { .. } => "motor_down",
            Command::MotorCenter => "motor_center",
            Command::MotorStop => "motor_stop",
            Command::SetPosition { .. } => "set_position",
        }
    }
}

fn error_reply(message: String) -> Value {
    json!({ "type": "error", "message": message })
}

/// Routes decoded commands to the orchestrator and its rig
#[derive(Clone)]
pub struct CommandHandler {
    orchestrator: Arc<ScanOrchestrator>,
}

impl CommandHandler {
    pub fn new(orchestrator: Arc<ScanOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Decode one text frame and execute it
    pub async fn handle(&self, text: &str) -> Value {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return error_reply(format!("Invalid JSON: {}", e)),
        };

        let name = value
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !Command::NAMES.contains(&name.as_str()) {
            warn!("Unknown command: {}", name);
            return error_reply(format!("Unknown command: {}", name));
        }

        match serde_json::from_value::<Command>(value) {
            Ok(command) => self.execute(command).await,
            Err(e) => error_reply(format!("Invalid arguments for {}: {}", name, e)),
        }
    }

    pub async fn execute(&self, command: Command) -> Value {
        let name = command.name();
        info!("Command: {}", name);
        let rig = self.orchestrator.rig();

        let (success, error) = match command {
            Command::StartScan(overrides) => {
                let started = match overrides.apply(self.orchestrator.defaults()) {
                    Ok(options) => self.orchestrator.start_scan(options).await,
                    Err(e) => Err(e),
                };
                match started {
                    Ok(_) => (true, None),
                    Err(e) => {
                        warn!("start_scan rejected: {}", e);
                        (false, Some(e.to_string()))
                    }
                }
            }
            Command::StopScan => {
                self.orchestrator.stop_scan().await;
                (true, None)
            }
            Command::MotorLeft { step } => (rig.move_relative(Direction::Left, step).await, None),
            Command::MotorRight { step } => (rig.move_relative(Direction::Right, step).await, None),
            Command::MotorUp { step } => (rig.move_relative(Direction::Up, step).await, None),
            Command::MotorDown { step } => (rig.move_relative(Direction::Down, step).await, None),
            Command::MotorCenter => (rig.center().await, None),
            Command::MotorStop => (rig.hold().await, None),
            Command::SetPosition { pan, tilt } => {
                let travel = SERVO_MIN..=SERVO_MAX;
                if travel.contains(&pan) && travel.contains(&tilt) {
                    (rig.move_absolute(pan, tilt).await, None)
                } else {
                    (
                        false,
                        Some(format!(
                            "position ({}, {}) outside [{}, {}]",
                            pan, tilt, SERVO_MIN, SERVO_MAX
                        )),
                    )
                }
            }
        };

        let mut ack = json!({ "type": "ack", "command": name, "success": success });
        if let Some(error) = error {
            ack["error"] = Value::String(error);
        }
        ack
    }
}
