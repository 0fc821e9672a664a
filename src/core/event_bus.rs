// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Event bus for scan progress fan-out
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a
//! subscriber whose queue is full (or whose receiver is gone) is removed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::ScanState;

/// Default queue length per subscriber
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

/// Event names carried in `event_type`
pub mod event_types {
    pub const STATE_CHANGE: &str = "state_change";
    pub const FRAME: &str = "frame";
    pub const CLASSIFICATION: &str = "classification";
    pub const ADVICE: &str = "advice";
}

/// One broadcast record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub event_type: String,
    pub state: ScanState,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ScanEvent {
    pub fn new(event_type: &str, state: ScanState, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            state,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Receiving end handed to a subscriber
pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<ScanEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ScanEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ScanEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Subscriber registry
pub struct EventBus {
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<ScanEvent>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        self.subscribers.lock().insert(id, tx);
        debug!("Subscriber {} added", id);
        Subscription { id, receiver: rx }
    }

    /// Returns false if `id` was not registered
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!("Subscriber {} removed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Offer `event` to every subscriber without blocking
    pub fn publish(&self, event: ScanEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber {} queue full, dropping it", id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Subscriber {} went away", id);
                false
            }
        });
    }

    pub fn emit(&self, event_type: &str, state: ScanState, data: serde_json::Value) {
        self.publish(ScanEvent::new(event_type, state, data));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}
