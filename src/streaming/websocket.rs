// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! WebSocket server for live scan events and remote commands

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::CommandHandler;
use crate::core::ScanOrchestrator;

/// WebSocket server
pub struct WebSocketServer {
    port: u16,
    max_clients: usize,
    orchestrator: Arc<ScanOrchestrator>,
    clients: Arc<AtomicUsize>,
}

impl WebSocketServer {
    pub fn new(port: u16, max_clients: usize, orchestrator: Arc<ScanOrchestrator>) -> Self {
        Self {
            port,
            max_clients,
            orchestrator,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Bind and accept in the background until `shutdown` fires.
    /// Returns the bound address.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<SocketAddr> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;

        info!("WebSocket server listening on ws://{}", local);

        let clients = self.clients.clone();
        let max_clients = self.max_clients;
        let orchestrator = self.orchestrator.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                if clients.load(Ordering::SeqCst) >= max_clients {
                                    warn!("Max clients reached, rejecting connection from {}", addr);
                                    continue;
                                }
                                clients.fetch_add(1, Ordering::SeqCst);
                                let clients = clients.clone();
                                let orchestrator = orchestrator.clone();
                                let shutdown = shutdown.clone();
                                tokio::spawn(async move {
                                    handle_connection(stream, addr, orchestrator, shutdown).await;
                                    clients.fetch_sub(1, Ordering::SeqCst);
                                });
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("WebSocket server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(local)
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    orchestrator: Arc<ScanOrchestrator>,
    shutdown: CancellationToken,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let mut subscription = orchestrator.subscribe();
    let client_id = subscription.id;
    let commands = CommandHandler::new(orchestrator.clone());
    info!("New WebSocket connection from {} (id: {})", addr, client_id);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome = serde_json::json!({
        "type": "welcome",
        "client_id": client_id,
        "server": "AgriScan",
        "version": env!("CARGO_PKG_VERSION"),
        "state": orchestrator.state(),
    });
    if let Err(e) = ws_sender.send(Message::Text(welcome.to_string())).await {
        warn!("Failed to send welcome: {}", e);
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from {}: {}", addr, text);
                        let reply = commands.handle(&text).await;
                        if let Err(e) = ws_sender.send(Message::Text(reply.to_string())).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by client {}", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            event = subscription.recv() => {
                let Some(event) = event else {
                    // Bus dropped us for falling behind
                    warn!("Client {} fell behind the event stream", addr);
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to encode event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::Text(json)).await {
                    warn!("Failed to send to {}: {}", addr, e);
                    break;
                }
            }

            _ = shutdown.cancelled() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    orchestrator.unsubscribe(client_id);
    info!("WebSocket client {} disconnected", addr);
}
