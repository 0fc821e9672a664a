// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Simulated pan-tilt rig for demo/testing

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use rand::prelude::*;
use tracing::debug;

use super::{CameraRig, DeviceError, Direction, Pose, CENTER_DEGREES};

const FRAME_WIDTH: u32 = 160;
const FRAME_HEIGHT: u32 = 120;

struct SimState {
    pan: i32,
    tilt: i32,
    connected: bool,
    captures: u64,
    rng: StdRng,
}

/// Rig that needs no hardware: tracks servo angles and renders synthetic stills
pub struct SimulatedRig {
    state: Mutex<SimState>,
    /// Poses (pan, tilt) where a leaf-coloured patch is painted into the frame
    leaf_poses: Vec<(i32, i32)>,
    latency: Duration,
}

impl SimulatedRig {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                pan: CENTER_DEGREES,
                tilt: CENTER_DEGREES,
                connected: true,
                captures: 0,
                rng: StdRng::from_entropy(),
            }),
            leaf_poses: vec![(45, 60), (135, 90)],
            latency: Duration::from_millis(20),
        }
    }

    pub fn with_leaf_poses(mut self, poses: Vec<(i32, i32)>) -> Self {
        self.leaf_poses = poses;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    pub fn captures(&self) -> u64 {
        self.state.lock().captures
    }

    fn step(&self, direction: Direction, step: u32) {
        let step = i32::try_from(step).unwrap_or(i32::MAX);
        let mut state = self.state.lock();
        match direction {
            Direction::Left => state.pan = state.pan.saturating_sub(step).clamp(0, 180),
            Direction::Right => state.pan = state.pan.saturating_add(step).clamp(0, 180),
            Direction::Up => state.tilt = state.tilt.saturating_add(step).clamp(0, 180),
            Direction::Down => state.tilt = state.tilt.saturating_sub(step).clamp(0, 180),
        }
    }

    fn render(&self) -> Result<Bytes, DeviceError> {
        let mut state = self.state.lock();
        state.captures += 1;
        let (pan, tilt) = (state.pan, state.tilt);

        let mut img = RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT);
        for pixel in img.pixels_mut() {
            // Soil-brown background with sensor noise
            let n: i16 = state.rng.gen_range(-12..12);
            *pixel = Rgb([
                (110 + n).clamp(0, 255) as u8,
                (80 + n).clamp(0, 255) as u8,
                (50 + n).clamp(0, 255) as u8,
            ]);
        }

        let near_leaf = self
            .leaf_poses
            .iter()
            .any(|&(p, t)| (p - pan).abs() <= 10 && (t - tilt).abs() <= 10);
        if near_leaf {
            let (cx, cy) = (FRAME_WIDTH / 2, FRAME_HEIGHT / 2);
            for y in cy - 25..cy + 25 {
                for x in cx - 35..cx + 35 {
                    img.put_pixel(x, y, Rgb([40, 150, 45]));
                }
            }
        }
        drop(state);

        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Jpeg)
            .map_err(|e| DeviceError::CaptureFailed(e.to_string()))?;
        Ok(Bytes::from(buf.into_inner()))
    }
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraRig for SimulatedRig {
    async fn connect(&self, address: &str, port: u16) -> bool {
        tokio::time::sleep(self.latency).await;
        debug!("Simulated rig answering as {}:{}", address, port);
        self.set_connected(true);
        true
    }

    fn disconnect(&self) {
        self.set_connected(false);
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn move_relative(&self, direction: Direction, step: u32) -> bool {
        if !self.is_connected() {
            return false;
        }
        tokio::time::sleep(self.latency).await;
        self.step(direction, step);
        true
    }

    async fn move_absolute(&self, pan: i32, tilt: i32) -> bool {
        if !self.is_connected() {
            return false;
        }
        tokio::time::sleep(self.latency).await;
        let mut state = self.state.lock();
        state.pan = pan.clamp(0, 180);
        state.tilt = tilt.clamp(0, 180);
        debug!("Simulated servos at pan={}, tilt={}", state.pan, state.tilt);
        true
    }

    async fn center(&self) -> bool {
        self.move_absolute(CENTER_DEGREES, CENTER_DEGREES).await
    }

    async fn hold(&self) -> bool {
        self.is_connected()
    }

    async fn position(&self) -> Pose {
        let state = self.state.lock();
        Pose {
            pan_angle: state.pan,
            tilt_angle: state.tilt,
        }
    }

    async fn capture_still(&self) -> Result<Bytes, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        tokio::time::sleep(self.latency).await;
        self.render()
    }

    async fn health_check(&self) -> bool {
        self.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_moves_clamp_to_servo_range() {
        let rig = SimulatedRig::new().with_latency(Duration::ZERO);
        assert!(rig.move_relative(Direction::Left, 200).await);
        assert!(rig.move_relative(Direction::Up, 200).await);
        assert_eq!(rig.position().await, Pose { pan_angle: 0, tilt_angle: 180 });

        assert!(rig.center().await);
        assert_eq!(rig.position().await, Pose { pan_angle: 90, tilt_angle: 90 });
    }

    #[tokio::test]
    async fn test_huge_steps_saturate_at_travel_limits() {
        let rig = SimulatedRig::new().with_latency(Duration::ZERO);
        assert!(rig.move_relative(Direction::Left, u32::MAX).await);
        assert!(rig.move_relative(Direction::Down, 1 << 31).await);
        assert_eq!(rig.position().await, Pose { pan_angle: 0, tilt_angle: 0 });

        assert!(rig.move_relative(Direction::Right, u32::MAX).await);
        assert!(rig.move_relative(Direction::Up, u32::MAX).await);
        assert_eq!(rig.position().await, Pose { pan_angle: 180, tilt_angle: 180 });
    }

    #[tokio::test]
    async fn test_capture_produces_decodable_jpeg() {
        let rig = SimulatedRig::new().with_latency(Duration::ZERO);
        let jpeg = rig.capture_still().await.unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), FRAME_WIDTH);
        assert_eq!(decoded.height(), FRAME_HEIGHT);
        assert_eq!(rig.captures(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_rig_refuses_work() {
        let rig = SimulatedRig::new().with_latency(Duration::ZERO);
        rig.set_connected(false);
        assert!(!rig.center().await);
        assert!(matches!(rig.capture_still().await, Err(DeviceError::NotConnected)));
    }
}
