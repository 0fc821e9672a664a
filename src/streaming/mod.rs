//! Streaming module - upward command channel and WebSocket event surface

mod commands;
mod websocket;

pub use commands::{Command, CommandHandler, ScanOverrides};
pub use websocket::WebSocketServer;

use serde::{Deserialize, Serialize};

/// Streaming configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Enable WebSocket server
    pub websocket_enabled: bool,
    pub websocket_port: u16,
    pub websocket_max_clients: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            websocket_enabled: true,
            websocket_port: 8765,
            websocket_max_clients: 10,
        }
    }
}
