//! Device module - pan-tilt camera rig link, stream framing, simulation

mod link;
mod mjpeg;
mod simulator;

pub use link::DeviceLink;
pub use mjpeg::{frame_stream, multipart_part, FrameParser, JPEG_EOI, JPEG_SOI};
pub use simulator::SimulatedRig;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Servo midpoint used for both axes
pub const CENTER_DEGREES: i32 = 90;

/// Pose reported when the rig cannot answer a position query
pub const DEFAULT_POSE: Pose = Pose { pan_angle: 90, tilt_angle: 75 };

/// Errors raised by rig operations that return data
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("not connected to camera rig, call connect() first")]
    NotConnected,

    #[error("camera rig unreachable at {0}")]
    Unreachable(String),

    #[error("timeout talking to camera rig: {0}")]
    Timeout(String),

    #[error("camera rig answered with status {0}")]
    Status(u16),

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DeviceError {
    /// Classify a transport error by failure mode
    pub fn from_transport(err: reqwest::Error, endpoint: &str) -> Self {
        if err.is_timeout() {
            DeviceError::Timeout(endpoint.to_string())
        } else if err.is_connect() {
            DeviceError::Unreachable(endpoint.to_string())
        } else {
            DeviceError::Http(err)
        }
    }
}

/// Servo axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Pan,
    Tilt,
}

/// Relative motor direction, mapped onto the rig's /motor/{dir} endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub fn axis(self) -> Axis {
        match self {
            Direction::Left | Direction::Right => Axis::Pan,
            Direction::Up | Direction::Down => Axis::Tilt,
        }
    }

    /// Endpoint path segment
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    /// Direction for a signed step on an axis (negative pans left / tilts down)
    pub fn from_signed(axis: Axis, step: i32) -> (Self, u32) {
        let magnitude = step.unsigned_abs();
        let dir = match (axis, step < 0) {
            (Axis::Pan, true) => Direction::Left,
            (Axis::Pan, false) => Direction::Right,
            (Axis::Tilt, true) => Direction::Down,
            (Axis::Tilt, false) => Direction::Up,
        };
        (dir, magnitude)
    }
}

/// Servo angles as reported by the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pose {
    pub pan_angle: i32,
    pub tilt_angle: i32,
}

/// Trait for anything that can move and shoot like the pan-tilt rig
#[async_trait]
pub trait CameraRig: Send + Sync {
    /// Probe the rig and remember it on success
    async fn connect(&self, address: &str, port: u16) -> bool;

    /// Forget the rig; idempotent
    fn disconnect(&self);

    /// Whether the last probe succeeded
    fn is_connected(&self) -> bool;

    /// Step one axis by a number of degrees
    async fn move_relative(&self, direction: Direction, step: u32) -> bool;

    /// Step an axis by a signed number of degrees
    async fn move_axis(&self, axis: Axis, step: i32) -> bool {
        let (direction, magnitude) = Direction::from_signed(axis, step);
        self.move_relative(direction, magnitude).await
    }

    /// Set absolute servo positions
    async fn move_absolute(&self, pan: i32, tilt: i32) -> bool;

    /// Return both axes to the midpoint
    async fn center(&self) -> bool;

    /// Hold the current position
    async fn hold(&self) -> bool;

    /// Current servo angles, falling back to the default pose
    async fn position(&self) -> Pose;

    /// High resolution still
    async fn capture_still(&self) -> Result<Bytes, DeviceError>;

    /// Lightweight liveness probe; updates the connected flag
    async fn health_check(&self) -> bool;
}
