// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! AgriScan - pan-tilt camera scanning controller
//!
//! Headless service: connects the camera rig, loads the leaf detector and
//! exposes scan events and remote commands over WebSocket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use agriscan::collaborators::{
    Advisor, Classifier, DemoAdvisor, DemoClassifier, HttpAdvisor, HttpClassifier, HttpWeather,
};
use agriscan::detection::SimulatedDetector;
use agriscan::{
    CameraRig, Config, DeviceLink, Detector, ScanOrchestrator, SimulatedRig, WebSocketServer,
    VERSION,
};

/// AgriScan - pan-tilt camera scanning controller
#[derive(Parser, Debug)]
#[command(name = "agriscan")]
#[command(author = "AgriScan Project")]
#[command(version = VERSION)]
#[command(about = "Raster-scan a field with a pan-tilt camera and flag diseased leaves")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera rig address
    #[arg(long)]
    device: Option<String>,

    /// Camera rig HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Demo mode with a simulated rig
    #[arg(long)]
    demo: bool,

    /// ONNX detection model path
    #[arg(long)]
    model: Option<PathBuf>,

    /// WebSocket server port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("AgriScan v{} - pan-tilt leaf scanner", VERSION);

    // Load or create configuration
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if args.demo {
        config.demo_mode = true;
    }
    if let Some(device) = args.device {
        config.device.address = Some(device);
    }
    if let Some(port) = args.port {
        config.device.port = port;
    }
    if let Some(model) = args.model {
        config.detection.model_path = model;
    }
    if let Some(ws_port) = args.ws_port {
        config.streaming.websocket_port = ws_port;
    }
    config.validate()?;

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

fn build_detector(config: &Config) -> Result<Arc<dyn Detector>> {
    let model_path = &config.detection.model_path;

    if config.demo_mode && !model_path.exists() {
        info!("No model at {:?}, using simulated detector", model_path);
        let class = config
            .detection
            .class_names
            .first()
            .map(String::as_str)
            .unwrap_or("Tomato_Leaf");
        return Ok(Arc::new(SimulatedDetector::new(class)));
    }

    #[cfg(feature = "onnx")]
    {
        let engine = agriscan::DetectionEngine::load_onnx(&config.detection)?;
        info!("Detector ready ({})", engine.backend_name());
        Ok(Arc::new(engine))
    }

    #[cfg(not(feature = "onnx"))]
    {
        Err(anyhow!(
            "ONNX support not enabled. Build with --features onnx or use --demo"
        ))
    }
}

fn build_orchestrator(config: &Config, rig: Arc<dyn CameraRig>) -> Result<ScanOrchestrator> {
    let detector = build_detector(config)?;
    let timeout = Duration::from_secs(config.collaborators.timeout_secs);

    let (classifier, advisor): (Arc<dyn Classifier>, Arc<dyn Advisor>) = if config.demo_mode {
        (Arc::new(DemoClassifier), Arc::new(DemoAdvisor))
    } else {
        (
            Arc::new(HttpClassifier::new(&config.collaborators.classifier_url, timeout)?),
            Arc::new(HttpAdvisor::new(&config.collaborators.advisor_url, timeout)?),
        )
    };

    let mut orchestrator =
        ScanOrchestrator::from_config(rig, detector, classifier, advisor, &config.scan)?;
    if let Some(url) = &config.collaborators.weather_url {
        orchestrator = orchestrator.with_weather(Arc::new(HttpWeather::new(url, timeout)?));
    }
    Ok(orchestrator)
}

/// Run until Ctrl+C
async fn run(config: Config) -> Result<()> {
    let (rig, address): (Arc<dyn CameraRig>, String) = if config.demo_mode {
        (Arc::new(SimulatedRig::new()), "simulator".to_string())
    } else {
        let address = config
            .device
            .address
            .clone()
            .ok_or_else(|| anyhow!("No camera rig address; pass --device or set device.address"))?;
        (Arc::new(DeviceLink::new(&config.device)?), address)
    };

    let orchestrator = Arc::new(build_orchestrator(&config, rig)?);
    info!("Scan orchestrator initialized");

    if !orchestrator.connect(&address, config.device.port).await {
        warn!(
            "Camera rig at {}:{} not reachable; scans will be refused until it is",
            address, config.device.port
        );
    }

    let shutdown = CancellationToken::new();
    if config.streaming.websocket_enabled {
        let server = WebSocketServer::new(
            config.streaming.websocket_port,
            config.streaming.websocket_max_clients,
            orchestrator.clone(),
        );
        server.start(shutdown.clone()).await?;
    } else {
        info!("WebSocket surface disabled");
    }

    info!("AgriScan running");
    info!("   Press Ctrl+C to shutdown");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received, cleaning up...");
    shutdown.cancel();
    orchestrator.disconnect().await;

    info!("AgriScan shutdown complete");
    Ok(())
}
