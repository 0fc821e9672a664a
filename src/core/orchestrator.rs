// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Scan orchestrator
//!
//! Drives the rig through a raster pattern, runs detection on every stop and
//! escalates qualifying leaves through classification and advice. One scan
//! task at a time owns the rig; everything it does is broadcast on the
//! [`EventBus`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::event_bus::{event_types, EventBus, Subscription};
use super::planner::ScanPosition;
use super::{encode_image, ScanError, ScanOptions, ScanResult, ScanState, ScanStatus};
use crate::collaborators::{
    is_healthy, Advisor, Classification, Classifier, WeatherContext, WeatherProvider,
};
use crate::config::ScanConfig;
use crate::detection::{best, Detection, DetectionError, Detector};
use crate::device::CameraRig;

/// Mechanical and presentation delays of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTiming {
    pub initial_settle: Duration,
    pub settle: Duration,
    pub inter_position: Duration,
    pub result_pause: Duration,
}

impl ScanTiming {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            initial_settle: Duration::from_millis(config.initial_settle_ms),
            settle: Duration::from_millis(config.settle_ms),
            inter_position: Duration::from_millis(config.inter_position_ms),
            result_pause: Duration::from_millis(config.result_pause_ms),
        }
    }

    /// No waiting at all
    pub fn immediate() -> Self {
        Self {
            initial_settle: Duration::ZERO,
            settle: Duration::ZERO,
            inter_position: Duration::ZERO,
            result_pause: Duration::ZERO,
        }
    }
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

/// Single-shot classification outside of a scan
#[derive(Debug, Clone, Serialize)]
pub struct ManualClassification {
    pub classification: Classification,
    pub advice: Option<serde_json::Value>,
    pub image_base64: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    index: usize,
    total: usize,
}

/// Everything a scan task needs, cheaply clonable
#[derive(Clone)]
struct Pipeline {
    rig: Arc<dyn CameraRig>,
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn Classifier>,
    advisor: Arc<dyn Advisor>,
    weather: Option<Arc<dyn WeatherProvider>>,
    bus: Arc<EventBus>,
    state: Arc<RwLock<ScanState>>,
    results: Arc<RwLock<Vec<ScanResult>>>,
    progress: Arc<RwLock<Progress>>,
    timing: ScanTiming,
    recapture: bool,
}

impl Pipeline {
    fn state(&self) -> ScanState {
        *self.state.read()
    }

    fn set_state(&self, to: ScanState, data: serde_json::Value) -> Result<(), ScanError> {
        {
            let mut state = self.state.write();
            *state = state.transition(to)?;
        }
        debug!("Scan state -> {}", to);
        self.bus.emit(event_types::STATE_CHANGE, to, data);
        Ok(())
    }

    /// For Idle and Error, which every state may enter
    fn settle_state(&self, to: ScanState, data: serde_json::Value) {
        if let Err(e) = self.set_state(to, data) {
            error!("{}", e);
        }
    }

    async fn detect(&self, frame: Bytes) -> Result<Vec<Detection>, ScanError> {
        let detector = self.detector.clone();
        let detections = tokio::task::spawn_blocking(move || detector.detect(&frame))
            .await
            .map_err(|e| DetectionError::Backend(format!("detector task failed: {}", e)))??;
        Ok(detections)
    }

    async fn capture_and_detect(&self) -> Result<(Bytes, Vec<Detection>), ScanError> {
        let frame = self.rig.capture_still().await?;
        let detections = self.detect(frame.clone()).await?;
        Ok((frame, detections))
    }

    async fn weather_context(&self) -> Option<WeatherContext> {
        let provider = self.weather.as_ref()?;
        match provider.current().await {
            Ok(weather) => Some(weather),
            Err(e) => {
                warn!("Weather lookup failed, advising without it: {:#}", e);
                None
            }
        }
    }
}

enum Halt {
    Cancelled,
    Failed(ScanError),
}

impl From<ScanError> for Halt {
    fn from(err: ScanError) -> Self {
        Halt::Failed(err)
    }
}

fn position_json(position: ScanPosition) -> serde_json::Value {
    json!({ "pan": position.pan, "tilt": position.tilt })
}

/// One raster pass, owned by its spawned task
struct ScanRun {
    pipeline: Pipeline,
    options: ScanOptions,
    positions: Vec<ScanPosition>,
    cancel: CancellationToken,
    done: CancellationToken,
    scan_index: u32,
}

impl ScanRun {
    fn checkpoint(&self) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn pause(&self, duration: Duration) -> Result<(), Halt> {
        if duration.is_zero() {
            return self.checkpoint();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn execute(mut self) {
        let outcome = self.scan().await;
        let pipeline = &self.pipeline;

        // Single re-center on every exit path
        if !pipeline.rig.center().await {
            warn!("Could not return rig to center after scan");
        }

        match outcome {
            Ok(()) => {
                let found = pipeline.results.read().len();
                info!("Raster scan complete: {} detections processed", found);
                pipeline.settle_state(
                    ScanState::Idle,
                    json!({
                        "reason": "scan_complete",
                        "total_positions": self.positions.len(),
                        "detections_found": found,
                    }),
                );
            }
            Err(Halt::Cancelled) => {
                info!("Raster scan cancelled");
                pipeline.settle_state(ScanState::Idle, json!({ "reason": "stopped_by_user" }));
            }
            Err(Halt::Failed(e)) => {
                error!("Raster scan error: {}", e);
                pipeline.settle_state(ScanState::Error, json!({ "message": e.to_string() }));
            }
        }
        self.done.cancel();
    }

    async fn scan(&mut self) -> Result<(), Halt> {
        let total = self.positions.len();
        let timing = self.pipeline.timing;

        for index in 0..total {
            self.checkpoint()?;
            let position = self.positions[index];
            *self.pipeline.progress.write() = Progress { index, total };

            if !self.pipeline.rig.move_absolute(position.pan, position.tilt).await {
                warn!(
                    "Move to ({}, {}) failed, skipping position",
                    position.pan, position.tilt
                );
                continue;
            }
            let settle = if index == 0 {
                timing.initial_settle
            } else {
                timing.settle
            };
            self.pause(settle).await?;

            let (frame, detections) = match self.pipeline.capture_and_detect().await {
                Ok(captured) => captured,
                Err(e) => {
                    error!(
                        "Capture/detection failed at ({}, {}): {}",
                        position.pan, position.tilt, e
                    );
                    continue;
                }
            };
            self.checkpoint()?;

            self.pipeline.bus.emit(
                event_types::FRAME,
                self.pipeline.state(),
                json!({
                    "frame_base64": encode_image(&frame),
                    "detections": detections,
                    "position": position_json(position),
                    "progress": (index + 1) as f64 / total as f64,
                    "position_index": index,
                    "total_positions": total,
                }),
            );

            let qualifies = best(&detections)
                .is_some_and(|d| d.confidence >= self.options.detection_confidence);
            if qualifies {
                self.escalate(&detections, position, frame).await?;
                self.pipeline.set_state(ScanState::Scanning, json!({}))?;
            }

            self.pause(timing.inter_position).await?;
        }

        *self.pipeline.progress.write() = Progress { index: total, total };
        Ok(())
    }

    async fn escalate(
        &mut self,
        detections: &[Detection],
        position: ScanPosition,
        frame: Bytes,
    ) -> Result<(), Halt> {
        self.scan_index += 1;
        let scan_index = self.scan_index;
        let p = self.pipeline.clone();
        let model_type = self.options.model_type.clone();

        p.set_state(
            ScanState::LeafDetected,
            json!({
                "detections": detections,
                "scan_index": scan_index,
                "position": position_json(position),
            }),
        )?;

        let image = if p.recapture {
            self.checkpoint()?;
            p.set_state(
                ScanState::Capturing,
                json!({ "scan_index": scan_index, "position": position_json(position) }),
            )?;
            match p.rig.capture_still().await {
                Ok(still) => still,
                Err(e) => {
                    warn!("Recapture failed, classifying the scan frame: {}", e);
                    frame
                }
            }
        } else {
            frame
        };

        self.checkpoint()?;
        p.set_state(ScanState::Classifying, json!({ "scan_index": scan_index }))?;
        let classified = p.classifier.classify(&image, &model_type).await;
        self.checkpoint()?;
        let classification =
            classified.map_err(|e| ScanError::collaborator("classification", e))?;

        p.bus.emit(
            event_types::CLASSIFICATION,
            ScanState::Classifying,
            json!({
                "disease": classification.label,
                "confidence": classification.confidence,
                "model": model_type,
                "all_predictions": classification.all_predictions,
                "inference_time_ms": classification.inference_time_ms,
                "scan_index": scan_index,
                "position": position_json(position),
            }),
        );

        let mut advice = None;
        if !is_healthy(&classification.label) {
            p.set_state(
                ScanState::Advising,
                json!({ "disease": classification.label, "scan_index": scan_index }),
            )?;
            let weather = p.weather_context().await;
            self.checkpoint()?;
            let advised = p.advisor.advise(&classification.label, weather.as_ref()).await;
            self.checkpoint()?;
            advice = Some(advised.map_err(|e| ScanError::collaborator("advice", e))?);
        }

        info!(
            "Scan #{} at ({}, {}): {} ({:.1}%) | advice: {}",
            scan_index,
            position.pan,
            position.tilt,
            classification.label,
            classification.confidence * 100.0,
            if advice.is_some() { "yes" } else { "skipped (healthy)" }
        );

        let result = ScanResult {
            scan_index,
            detections: detections.to_vec(),
            disease: classification.label.clone(),
            disease_confidence: classification.confidence,
            classification_model: model_type,
            all_predictions: classification.all_predictions.clone(),
            advice: advice.clone(),
            image: image.clone(),
            position,
            timestamp: Utc::now(),
        };
        let result_json = serde_json::to_value(&result).unwrap_or_default();
        p.results.write().push(result);

        p.set_state(
            ScanState::ResultReady,
            json!({ "result": result_json, "position": position_json(position) }),
        )?;
        p.bus.emit(
            event_types::ADVICE,
            ScanState::ResultReady,
            json!({
                "disease": classification.label,
                "confidence": classification.confidence,
                "advice": advice,
                "scan_index": scan_index,
                "position": position_json(position),
                "image_base64": encode_image(&image),
            }),
        );

        self.pause(p.timing.result_pause).await
    }
}

struct ScanTask {
    cancel: CancellationToken,
    done: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the scan state machine and the single scan task
pub struct ScanOrchestrator {
    pipeline: Pipeline,
    defaults: ScanOptions,
    task: Mutex<Option<ScanTask>>,
}

impl ScanOrchestrator {
    pub fn new(
        rig: Arc<dyn CameraRig>,
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn Classifier>,
        advisor: Arc<dyn Advisor>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            pipeline: Pipeline {
                rig,
                detector,
                classifier,
                advisor,
                weather: None,
                bus,
                state: Arc::new(RwLock::new(ScanState::Idle)),
                results: Arc::new(RwLock::new(Vec::new())),
                progress: Arc::new(RwLock::new(Progress::default())),
                timing: ScanTiming::default(),
                recapture: false,
            },
            defaults: ScanOptions::default(),
            task: Mutex::new(None),
        }
    }

    /// Orchestrator with timing, defaults and event capacity taken from `config`
    pub fn from_config(
        rig: Arc<dyn CameraRig>,
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn Classifier>,
        advisor: Arc<dyn Advisor>,
        config: &ScanConfig,
    ) -> Result<Self, ScanError> {
        let bus = Arc::new(EventBus::new(config.subscriber_capacity));
        Ok(Self::new(rig, detector, classifier, advisor, bus)
            .with_timing(ScanTiming::from_config(config))
            .with_recapture(config.recapture_on_detection)
            .with_defaults(ScanOptions::from_config(config)?))
    }

    pub fn with_weather(mut self, weather: Arc<dyn WeatherProvider>) -> Self {
        self.pipeline.weather = Some(weather);
        self
    }

    pub fn with_timing(mut self, timing: ScanTiming) -> Self {
        self.pipeline.timing = timing;
        self
    }

    pub fn with_recapture(mut self, recapture: bool) -> Self {
        self.pipeline.recapture = recapture;
        self
    }

    pub fn with_defaults(mut self, defaults: ScanOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> &ScanOptions {
        &self.defaults
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.pipeline.bus.clone()
    }

    pub fn rig(&self) -> Arc<dyn CameraRig> {
        self.pipeline.rig.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        let sub = self.pipeline.bus.subscribe();
        info!(
            "Event subscriber added. Total: {}",
            self.pipeline.bus.subscriber_count()
        );
        sub
    }

    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.pipeline.bus.unsubscribe(id)
    }

    pub fn state(&self) -> ScanState {
        self.pipeline.state()
    }

    pub fn is_connected(&self) -> bool {
        self.pipeline.rig.is_connected()
    }

    /// Results of the current (or last) scan session
    pub fn scan_results(&self) -> Vec<ScanResult> {
        self.pipeline.results.read().clone()
    }

    pub fn status(&self) -> ScanStatus {
        let state = self.state();
        let progress = *self.pipeline.progress.read();
        ScanStatus {
            state,
            connected: self.is_connected(),
            scanning: state.is_active(),
            results: self.pipeline.results.read().len(),
            subscribers: self.pipeline.bus.subscriber_count(),
            position_index: progress.index,
            total_positions: progress.total,
        }
    }

    /// Connect the rig, broadcasting Connecting then Idle
    pub async fn connect(&self, address: &str, port: u16) -> bool {
        let _task = self.task.lock().await;
        if self.state().is_active() {
            warn!("Refusing to reconnect while a scan is running");
            return false;
        }
        if let Err(e) = self.pipeline.set_state(
            ScanState::Connecting,
            json!({ "address": address, "port": port }),
        ) {
            warn!("{}", e);
            return false;
        }

        let connected = self.pipeline.rig.connect(address, port).await;
        self.pipeline.settle_state(
            ScanState::Idle,
            json!({
                "reason": if connected { "connected" } else { "connect_failed" },
                "connected": connected,
                "address": address,
                "port": port,
            }),
        );
        connected
    }

    /// Stop any scan and release the rig
    pub async fn disconnect(&self) {
        self.stop_scan().await;
        self.pipeline.rig.disconnect();
    }

    /// Start a raster scan in the background. Returns the number of positions.
    pub async fn start_scan(&self, options: ScanOptions) -> Result<usize, ScanError> {
        let mut task = self.task.lock().await;
        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() {
                warn!("Auto-scan already running");
                return Err(ScanError::AlreadyRunning);
            }
        }
        if !self.pipeline.rig.is_connected() {
            return Err(ScanError::NotConnected);
        }

        let positions = options.pattern.positions();
        if positions.is_empty() {
            return Err(ScanError::InvalidPattern("pattern has no positions".to_string()));
        }
        let total = positions.len();

        self.pipeline.results.write().clear();
        *self.pipeline.progress.write() = Progress { index: 0, total };
        self.pipeline.set_state(
            ScanState::Scanning,
            json!({
                "total_positions": total,
                "model_type": options.model_type,
                "detection_confidence": options.detection_confidence,
            }),
        )?;

        info!(
            "Raster scan started: {} positions, model={}, conf={}",
            total, options.model_type, options.detection_confidence
        );

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let run = ScanRun {
            pipeline: self.pipeline.clone(),
            options,
            positions,
            cancel: cancel.clone(),
            done: done.clone(),
            scan_index: 0,
        };
        let handle = tokio::spawn(run.execute());
        *task = Some(ScanTask {
            cancel,
            done,
            handle,
        });
        Ok(total)
    }

    /// Stop the scan at its next safe point, re-center and go Idle.
    ///
    /// No-op when already idle.
    pub async fn stop_scan(&self) {
        let mut task = self.task.lock().await;

        if let Some(running) = task.take() {
            if !running.handle.is_finished() {
                running.cancel.cancel();
                if let Err(e) = running.handle.await {
                    error!("Scan task ended abnormally: {}", e);
                }
                if self.state() == ScanState::Idle {
                    info!("Auto-scan stopped");
                    return;
                }
            }
        }

        if self.state() == ScanState::Idle {
            debug!("Stop requested while idle");
            return;
        }

        if !self.pipeline.rig.center().await {
            warn!("Could not return rig to center");
        }
        self.pipeline
            .settle_state(ScanState::Idle, json!({ "reason": "stopped_by_user" }));
        info!("Auto-scan stopped");
    }

    /// Wait for the running scan, if any, to finish on its own
    pub async fn join(&self) {
        let done = self.task.lock().await.as_ref().map(|t| t.done.clone());
        if let Some(done) = done {
            done.cancelled().await;
        }
    }

    /// Capture and detect once, outside the state machine
    pub async fn manual_detect(&self) -> Result<Vec<Detection>, ScanError> {
        if !self.is_connected() {
            return Err(ScanError::NotConnected);
        }
        let (_, detections) = self.pipeline.capture_and_detect().await?;
        Ok(detections)
    }

    /// Capture, classify and (for diseased leaves) advise once, outside the
    /// state machine. Advice failures leave `advice` empty.
    pub async fn manual_classify(
        &self,
        model_type: Option<&str>,
    ) -> Result<ManualClassification, ScanError> {
        if !self.is_connected() {
            return Err(ScanError::NotConnected);
        }
        let model_type = model_type.unwrap_or(&self.defaults.model_type);
        let image = self.pipeline.rig.capture_still().await?;

        let classification = self
            .pipeline
            .classifier
            .classify(&image, model_type)
            .await
            .map_err(|e| ScanError::collaborator("classification", e))?;

        let mut advice = None;
        if !classification.label.is_empty() && !is_healthy(&classification.label) {
            let weather = self.pipeline.weather_context().await;
            match self
                .pipeline
                .advisor
                .advise(&classification.label, weather.as_ref())
                .await
            {
                Ok(a) => advice = Some(a),
                Err(e) => error!("Advice failed: {:#}", e),
            }
        }

        Ok(ManualClassification {
            classification,
            advice,
            image_base64: encode_image(&image),
            timestamp: Utc::now(),
        })
    }
}
