// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Serpentine raster scan planner

use serde::{Deserialize, Serialize};
use tracing::info;

use super::ScanError;
use crate::config::ScanConfig;

/// Servo travel, in degrees, on both axes
pub const SERVO_MIN: i32 = 0;
pub const SERVO_MAX: i32 = 180;

/// Servo angles of one scan stop, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPosition {
    pub pan: i32,
    pub tilt: i32,
}

/// Rectangular pan/tilt sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterPattern {
    pub pan_min: i32,
    pub pan_max: i32,
    pub tilt_min: i32,
    pub tilt_max: i32,
    pub step: i32,
}

impl RasterPattern {
    pub fn new(
        pan_min: i32,
        pan_max: i32,
        tilt_min: i32,
        tilt_max: i32,
        step: i32,
    ) -> Result<Self, ScanError> {
        if step <= 0 {
            return Err(ScanError::InvalidPattern(format!("step must be positive, got {}", step)));
        }
        if pan_min > pan_max || tilt_min > tilt_max {
            return Err(ScanError::InvalidPattern(format!(
                "empty range pan {}..{} tilt {}..{}",
                pan_min, pan_max, tilt_min, tilt_max
            )));
        }
        for (name, angle) in [
            ("pan_min", pan_min),
            ("pan_max", pan_max),
            ("tilt_min", tilt_min),
            ("tilt_max", tilt_max),
        ] {
            if !(SERVO_MIN..=SERVO_MAX).contains(&angle) {
                return Err(ScanError::InvalidPattern(format!(
                    "{} must be in [{}, {}], got {}",
                    name, SERVO_MIN, SERVO_MAX, angle
                )));
            }
        }
        Ok(Self {
            pan_min,
            pan_max,
            tilt_min,
            tilt_max,
            step,
        })
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self, ScanError> {
        Self::new(
            config.pan_min,
            config.pan_max,
            config.tilt_min,
            config.tilt_max,
            config.step,
        )
    }

    fn row_len(&self) -> usize {
        ((self.pan_max - self.pan_min) / self.step) as usize + 1
    }

    fn row_count(&self) -> usize {
        ((self.tilt_max - self.tilt_min) / self.step) as usize + 1
    }

    /// `floor(range / step) + 1` stops per axis; a partial last step is dropped
    pub fn len(&self) -> usize {
        self.row_len() * self.row_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Even rows sweep up from `pan_min`, odd rows sweep down from `pan_max`
    pub fn positions(&self) -> Vec<ScanPosition> {
        let mut positions = Vec::with_capacity(self.len());
        let mut left_to_right = true;
        let mut tilt = self.tilt_min;

        while tilt <= self.tilt_max {
            if left_to_right {
                let mut pan = self.pan_min;
                while pan <= self.pan_max {
                    positions.push(ScanPosition { pan, tilt });
                    pan += self.step;
                }
            } else {
                let mut pan = self.pan_max;
                while pan >= self.pan_min {
                    positions.push(ScanPosition { pan, tilt });
                    pan -= self.step;
                }
            }
            tilt += self.step;
            left_to_right = !left_to_right;
        }

        info!("Generated raster pattern with {} positions", positions.len());
        positions
    }
}

impl Default for RasterPattern {
    fn default() -> Self {
        Self {
            pan_min: 0,
            pan_max: 180,
            tilt_min: 30,
            tilt_max: 120,
            step: 15,
        }
    }
}
