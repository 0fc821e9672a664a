// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! HTTP link to the pan-tilt camera rig
//!
//! Rig endpoints:
//! ```text
//! GET  /status                      liveness + device status JSON
//! GET  /capture                     single high resolution JPEG
//! GET  /stream                      multipart JPEG stream
//! POST /motor/{left,right,up,down}?step=N
//! POST /motor/center
//! POST /motor/stop
//! POST /motor/position?pan=N&tilt=N
//! GET  /motor/position
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::mjpeg::{frame_stream, multipart_part};
use super::{CameraRig, DeviceError, Direction, Pose, DEFAULT_POSE};
use crate::config::DeviceConfig;

#[derive(Debug, Default)]
struct LinkState {
    base_url: Option<String>,
    connected: bool,
}

/// Connection to one rig endpoint
pub struct DeviceLink {
    client: reqwest::Client,
    control_timeout: Duration,
    capture_timeout: Duration,
    health_timeout: Duration,
    stream_read_timeout: Duration,
    state: RwLock<LinkState>,
}

impl DeviceLink {
    pub fn new(config: &DeviceConfig) -> Result<Self, DeviceError> {
        // No client-wide total timeout: the stream body is held open indefinitely
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.control_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            control_timeout: Duration::from_millis(config.control_timeout_ms),
            capture_timeout: Duration::from_millis(config.capture_timeout_ms),
            health_timeout: Duration::from_millis(config.health_timeout_ms),
            stream_read_timeout: Duration::from_millis(config.stream_read_timeout_ms),
            state: RwLock::new(LinkState::default()),
        })
    }

    /// Probe `/status` and record the endpoint on success.
    ///
    /// Transport failures are reported as `false`, never raised.
    pub async fn connect(&self, address: &str, port: u16) -> bool {
        let base_url = format!("http://{}:{}", address, port);
        let url = format!("{}/status", base_url);

        let outcome = self
            .client
            .get(&url)
            .timeout(self.control_timeout)
            .send()
            .await;

        let connected = match outcome {
            Ok(resp) if resp.status().is_success() => {
                info!("Connected to camera rig at {}", base_url);
                true
            }
            Ok(resp) => {
                warn!("Camera rig responded with status {}", resp.status().as_u16());
                false
            }
            Err(e) if e.is_connect() => {
                error!("Cannot reach camera rig at {}", base_url);
                false
            }
            Err(e) if e.is_timeout() => {
                error!("Timeout connecting to camera rig at {}", base_url);
                false
            }
            Err(e) => {
                error!("Camera rig connection error: {}", e);
                false
            }
        };

        let mut state = self.state.write();
        state.connected = connected;
        state.base_url = if connected { Some(base_url) } else { None };
        connected
    }

    /// Release the connection; safe to call repeatedly
    pub fn disconnect(&self) {
        let mut state = self.state.write();
        if state.connected {
            info!("Disconnected from camera rig");
        }
        state.connected = false;
        state.base_url = None;
    }

    pub fn base_url(&self) -> Option<String> {
        self.state.read().base_url.clone()
    }

    fn connected_base(&self) -> Option<String> {
        let state = self.state.read();
        if state.connected {
            state.base_url.clone()
        } else {
            None
        }
    }

    async fn post_command(&self, path: &str, query: &[(&str, i64)]) -> bool {
        let Some(base) = self.connected_base() else {
            warn!("Rig command {} ignored: not connected", path);
            return false;
        };
        let url = format!("{}{}", base, path);

        match self
            .client
            .post(&url)
            .query(query)
            .timeout(self.control_timeout)
            .send()
            .await
        {
            Ok(resp) => {
                let ok = resp.status().is_success();
                if !ok {
                    warn!("Rig command {} answered {}", path, resp.status().as_u16());
                }
                ok
            }
            Err(e) => {
                error!("Rig command {} failed: {}", path, e);
                false
            }
        }
    }

    /// Full device status document
    pub async fn status(&self) -> Result<serde_json::Value, DeviceError> {
        let base = self.connected_base().ok_or(DeviceError::NotConnected)?;
        let url = format!("{}/status", base);

        let result = self.fetch_status(&url).await;

        if let Err(ref e) = result {
            error!("Status request failed: {}", e);
            self.state.write().connected = false;
        }
        result
    }

    async fn fetch_status(&self, url: &str) -> Result<serde_json::Value, DeviceError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.control_timeout)
            .send()
            .await
            .map_err(|e| DeviceError::from_transport(e, url))?;
        if !resp.status().is_success() {
            return Err(DeviceError::Status(resp.status().as_u16()));
        }
        Ok(resp.json::<serde_json::Value>().await?)
    }

    /// Continuous sequence of complete JPEG frames from `/stream`
    pub async fn stream_frames(
        &self,
    ) -> Result<impl Stream<Item = Result<Bytes, DeviceError>> + Send + 'static, DeviceError> {
        let base = self.connected_base().ok_or(DeviceError::NotConnected)?;
        let url = format!("{}/stream", base);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DeviceError::from_transport(e, &url))?;
        if !resp.status().is_success() {
            return Err(DeviceError::Status(resp.status().as_u16()));
        }
        info!("Streaming frames from {}", url);

        let read_timeout = self.stream_read_timeout;
        let chunks = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| DeviceError::Stream(e.to_string())));

        // Per-read deadline; a stalled stream surfaces as Timeout and ends
        let chunks = stream::unfold(Box::pin(chunks), move |mut chunks| async move {
            match tokio::time::timeout(read_timeout, chunks.next()).await {
                Ok(Some(item)) => Some((item, chunks)),
                Ok(None) => None,
                Err(_) => Some((Err(DeviceError::Timeout("stream read".to_string())), chunks)),
            }
        });

        Ok(frame_stream(Box::pin(chunks)))
    }

    /// Frames re-wrapped as multipart parts for forwarding to a browser
    pub async fn proxy_stream(
        &self,
    ) -> Result<impl Stream<Item = Result<Bytes, DeviceError>> + Send + 'static, DeviceError> {
        let frames = self.stream_frames().await?;
        Ok(frames.map(|frame| frame.map(|f| multipart_part(&f))))
    }
}

#[async_trait]
impl CameraRig for DeviceLink {
    async fn connect(&self, address: &str, port: u16) -> bool {
        DeviceLink::connect(self, address, port).await
    }

    fn disconnect(&self) {
        DeviceLink::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    async fn move_relative(&self, direction: Direction, step: u32) -> bool {
        let path = format!("/motor/{}", direction.as_str());
        let ok = self.post_command(&path, &[("step", step as i64)]).await;
        if ok {
            info!("Stepping {} by {} degrees", direction.as_str(), step);
        }
        ok
    }

    async fn move_absolute(&self, pan: i32, tilt: i32) -> bool {
        let ok = self
            .post_command("/motor/position", &[("pan", pan as i64), ("tilt", tilt as i64)])
            .await;
        if ok {
            debug!("Servos positioned: pan={}, tilt={}", pan, tilt);
        }
        ok
    }

    async fn center(&self) -> bool {
        let ok = self.post_command("/motor/center", &[]).await;
        if ok {
            info!("Servos returning to center");
        }
        ok
    }

    async fn hold(&self) -> bool {
        self.post_command("/motor/stop", &[]).await
    }

    async fn position(&self) -> Pose {
        let Some(base) = self.connected_base() else {
            return DEFAULT_POSE;
        };
        let url = format!("{}/motor/position", base);

        match self.client.get(&url).timeout(self.control_timeout).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Pose>().await {
                Ok(pose) => pose,
                Err(e) => {
                    warn!("Malformed position reply: {}", e);
                    DEFAULT_POSE
                }
            },
            Ok(resp) => {
                warn!("Position request answered {}", resp.status().as_u16());
                DEFAULT_POSE
            }
            Err(e) => {
                error!("Get position failed: {}", e);
                DEFAULT_POSE
            }
        }
    }

    async fn capture_still(&self) -> Result<Bytes, DeviceError> {
        let base = self.connected_base().ok_or(DeviceError::NotConnected)?;
        let url = format!("{}/capture", base);

        let resp = self
            .client
            .get(&url)
            .timeout(self.capture_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeviceError::CaptureFailed("timeout capturing still image".to_string())
                } else {
                    DeviceError::CaptureFailed(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(DeviceError::CaptureFailed(format!(
                "status {}",
                resp.status().as_u16()
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| DeviceError::CaptureFailed(e.to_string()))?;
        if body.is_empty() {
            return Err(DeviceError::CaptureFailed("empty image".to_string()));
        }

        info!("Captured still image: {} bytes", body.len());
        Ok(body)
    }

    async fn health_check(&self) -> bool {
        let Some(base) = self.base_url() else {
            return false;
        };
        let url = format!("{}/status", base);

        let alive = match self.client.get(&url).timeout(self.health_timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Health probe failed: {}", e);
                false
            }
        };
        self.state.write().connected = alive;
        alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn test_config() -> DeviceConfig {
        DeviceConfig {
            control_timeout_ms: 2000,
            capture_timeout_ms: 2000,
            health_timeout_ms: 1000,
            stream_read_timeout_ms: 2000,
            ..DeviceConfig::default()
        }
    }

    fn split_host(server: &mockito::ServerGuard) -> (String, u16) {
        let host = server.host_with_port();
        let (addr, port) = host.rsplit_once(':').unwrap();
        (addr.to_string(), port.parse().unwrap())
    }

    async fn connected_link(server: &mut mockito::ServerGuard) -> DeviceLink {
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_body(r#"{"pan_angle":90,"tilt_angle":75,"camera":true}"#)
            .create_async()
            .await;
        let link = DeviceLink::new(&test_config()).unwrap();
        let (addr, port) = split_host(server);
        assert!(link.connect(&addr, port).await);
        link
    }

    #[tokio::test]
    async fn test_connect_success_records_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let link = connected_link(&mut server).await;
        assert!(link.is_connected());
        assert_eq!(link.base_url(), Some(server.url()));
    }

    #[tokio::test]
    async fn test_connect_refused_returns_false() {
        let link = DeviceLink::new(&test_config()).unwrap();
        assert!(!link.connect("127.0.0.1", 1).await);
        assert!(!link.is_connected());
        assert!(link.base_url().is_none());
    }

    #[tokio::test]
    async fn test_connect_non_200_returns_false() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/status").with_status(503).create_async().await;
        let link = DeviceLink::new(&test_config()).unwrap();
        let (addr, port) = split_host(&server);
        assert!(!link.connect(&addr, port).await);
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut server = mockito::Server::new_async().await;
        let link = connected_link(&mut server).await;
        link.disconnect();
        link.disconnect();
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_motor_commands_hit_endpoints() {
        let mut server = mockito::Server::new_async().await;
        let link = connected_link(&mut server).await;

        let left = server
            .mock("POST", "/motor/left")
            .match_query(Matcher::UrlEncoded("step".into(), "5".into()))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let position = server
            .mock("POST", "/motor/position")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("pan".into(), "45".into()),
                Matcher::UrlEncoded("tilt".into(), "120".into()),
            ]))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let center = server
            .mock("POST", "/motor/center")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        assert!(link.move_axis(crate::device::Axis::Pan, -5).await);
        assert!(link.move_absolute(45, 120).await);
        assert!(link.center().await);

        left.assert_async().await;
        position.assert_async().await;
        center.assert_async().await;
    }

    #[tokio::test]
    async fn test_motor_failure_reports_false() {
        let mut server = mockito::Server::new_async().await;
        let link = connected_link(&mut server).await;
        server.mock("POST", "/motor/stop").with_status(500).create_async().await;
        assert!(!link.hold().await);
    }

    #[tokio::test]
    async fn test_motor_without_connection_reports_false() {
        let link = DeviceLink::new(&test_config()).unwrap();
        assert!(!link.center().await);
        assert!(!link.move_relative(Direction::Up, 5).await);
    }

    #[tokio::test]
    async fn test_capture_still_returns_body() {
        let mut server = mockito::Server::new_async().await;
        let link = connected_link(&mut server).await;
        server
            .mock("GET", "/capture")
            .with_status(200)
            .with_body(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9])
            .create_async()
            .await;

        let image = link.capture_still().await.unwrap();
        assert_eq!(&image[..], &[0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn test_capture_failure_is_distinguishable() {
        let mut server = mockito::Server::new_async().await;
        let link = connected_link(&mut server).await;
        server.mock("GET", "/capture").with_status(500).create_async().await;

        let err = link.capture_still().await.unwrap_err();
        assert!(matches!(err, DeviceError::CaptureFailed(_)));
    }

    #[tokio::test]
    async fn test_capture_requires_connection() {
        let link = DeviceLink::new(&test_config()).unwrap();
        let err = link.capture_still().await.unwrap_err();
        assert!(matches!(err, DeviceError::NotConnected));
    }

    #[tokio::test]
    async fn test_position_falls_back_to_default() {
        let mut server = mockito::Server::new_async().await;
        let link = connected_link(&mut server).await;
        server.mock("GET", "/motor/position").with_status(500).create_async().await;
        assert_eq!(link.position().await, DEFAULT_POSE);
    }

    #[tokio::test]
    async fn test_position_parses_reply() {
        let mut server = mockito::Server::new_async().await;
        let link = connected_link(&mut server).await;
        server
            .mock("GET", "/motor/position")
            .with_status(200)
            .with_body(r#"{"pan_angle":30,"tilt_angle":100}"#)
            .create_async()
            .await;
        assert_eq!(link.position().await, Pose { pan_angle: 30, tilt_angle: 100 });
    }

    #[tokio::test]
    async fn test_health_check_updates_flag() {
        let mut server = mockito::Server::new_async().await;
        let status = server
            .mock("GET", "/status")
            .with_status(200)
            .create_async()
            .await;
        let link = DeviceLink::new(&test_config()).unwrap();
        let (addr, port) = split_host(&server);
        assert!(link.connect(&addr, port).await);
        assert!(link.health_check().await);

        // Unmatched requests get a 501 from the mock server
        status.remove_async().await;
        assert!(!link.health_check().await);
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_health_check_without_endpoint() {
        let link = DeviceLink::new(&test_config()).unwrap();
        assert!(!link.health_check().await);
    }

    #[tokio::test]
    async fn test_stream_frames_parses_multipart_body() {
        let mut server = mockito::Server::new_async().await;
        let link = connected_link(&mut server).await;

        let a = vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
        let b = vec![0xFF, 0xD8, 0x03, 0xFF, 0xD9];
        let mut body = multipart_part(&a).to_vec();
        body.extend_from_slice(&multipart_part(&b));
        server
            .mock("GET", "/stream")
            .with_status(200)
            .with_header("content-type", "multipart/x-mixed-replace; boundary=frame")
            .with_body(body)
            .create_async()
            .await;

        let frames: Vec<_> = link.stream_frames().await.unwrap().collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].as_ref().unwrap()[..], &a[..]);
        assert_eq!(&frames[1].as_ref().unwrap()[..], &b[..]);
    }
}
