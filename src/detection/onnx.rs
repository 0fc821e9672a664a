// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! ONNX Runtime backend (CPU)

use std::path::Path;

use ndarray::{Array4, ArrayD};
#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::engine::{DetectionEngine, InferenceBackend, ModelMetadata};
use super::DetectionError;
use crate::config::DetectionConfig;

fn backend_err(context: &str, err: ort::Error) -> DetectionError {
    DetectionError::Backend(format!("{}: {}", context, err))
}

/// Providers in preference order. ONNX Runtime skips any that fail to
/// register, so CPU always remains.
fn execution_providers() -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::new();
    #[cfg(feature = "cuda")]
    providers.push(CUDAExecutionProvider::default().build());
    providers.push(CPUExecutionProvider::default().build());
    providers
}

/// ONNX model session. `Session::run` needs exclusive access, so calls are
/// serialized through a mutex.
pub struct OnnxBackend {
    session: Mutex<Session>,
    input_name: String,
}

impl OnnxBackend {
    pub fn load(model_path: &Path) -> Result<Self, DetectionError> {
        if !model_path.exists() {
            return Err(DetectionError::ModelNotFound(model_path.to_path_buf()));
        }

        info!("Loading detection model from {}", model_path.display());

        let session = Session::builder()
            .map_err(|e| backend_err("session builder", e))?
            .with_execution_providers(execution_providers())
            .map_err(|e| backend_err("execution provider", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| backend_err("optimization level", e))?
            .commit_from_file(model_path)
            .map_err(|e| backend_err("load model", e))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());
        debug!("Detection model input: {}", input_name);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn infer(&self, input: Array4<f32>) -> Result<ArrayD<f32>, DetectionError> {
        let input_value = Value::from_array(input).map_err(|e| backend_err("input tensor", e))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .map_err(|e| backend_err("inference", e))?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| backend_err("extract output", e))?;
        Ok(output.to_owned())
    }

    fn name(&self) -> &str {
        "onnx-cpu"
    }
}

impl DetectionEngine {
    /// Load the configured ONNX model, applying any metadata sidecar found
    /// beside it
    pub fn load_onnx(config: &DetectionConfig) -> Result<Self, DetectionError> {
        let mut config = config.clone();
        if let Some(meta) = ModelMetadata::load_beside(&config.model_path) {
            meta.apply(&mut config);
        }
        let backend = OnnxBackend::load(&config.model_path)?;
        Ok(DetectionEngine::new(Box::new(backend), &config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_provider_is_always_last_resort() {
        let expected = if cfg!(feature = "cuda") { 2 } else { 1 };
        assert_eq!(execution_providers().len(), expected);
    }

    #[test]
    fn test_missing_model_is_reported() {
        let path = Path::new("/nonexistent/agriscan/best.onnx");
        assert!(matches!(
            OnnxBackend::load(path),
            Err(DetectionError::ModelNotFound(p)) if p == path
        ));

        let config = DetectionConfig {
            model_path: path.to_path_buf(),
            ..DetectionConfig::default()
        };
        assert!(DetectionEngine::load_onnx(&config).is_err());
    }
}
