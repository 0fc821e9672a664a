// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Model-free detector for demo mode
//!
//! Finds the largest patch of leaf-green pixels and reports its bounding box.
//! Pairs with [`crate::device::SimulatedRig`], which paints such a patch at
//! its leaf poses.

use tracing::debug;

use super::{Detection, DetectionError, Detector};

/// Patch must cover at least this share of the frame
const MIN_COVERAGE: f32 = 0.02;

pub struct SimulatedDetector {
    class_name: String,
}

impl SimulatedDetector {
    pub fn new(class_name: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
        }
    }

    fn is_leaf(r: u8, g: u8, b: u8) -> bool {
        let (r, g, b) = (r as i16, g as i16, b as i16);
        g - r > 40 && g - b > 40
    }
}

impl Default for SimulatedDetector {
    fn default() -> Self {
        Self::new("Tomato_Leaf")
    }
}

impl Detector for SimulatedDetector {
    fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectionError> {
        let rgb = image::load_from_memory(image)?.to_rgb8();
        let (width, height) = rgb.dimensions();

        let mut count = 0u32;
        let (mut x1, mut y1, mut x2, mut y2) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            if Self::is_leaf(r, g, b) {
                count += 1;
                x1 = x1.min(x);
                y1 = y1.min(y);
                x2 = x2.max(x + 1);
                y2 = y2.max(y + 1);
            }
        }

        let coverage = count as f32 / (width * height).max(1) as f32;
        if coverage < MIN_COVERAGE {
            return Ok(Vec::new());
        }

        let confidence = (0.5 + coverage * 2.5).min(0.99);
        debug!("Green patch covering {:.1}% of frame", coverage * 100.0);
        Ok(vec![Detection {
            x1: x1 as f32,
            y1: y1 as f32,
            x2: x2 as f32,
            y2: y2 as f32,
            confidence: (confidence * 10_000.0).round() / 10_000.0,
            class_name: self.class_name.clone(),
        }])
    }
}
