//! Collaborators - disease classifier, advisory and weather capabilities
//!
//! The orchestrator only sees these traits. HTTP implementations live in
//! `http`, offline demo stand-ins in `simulated`; tests substitute
//! in-process stubs.

mod http;
mod simulated;

pub use http::{HttpAdvisor, HttpClassifier, HttpWeather};
pub use simulated::{DemoAdvisor, DemoClassifier};

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Label a classifier uses for a leaf with no disease
pub const HEALTHY_LABEL: &str = "healthy";

/// Whether a classifier label means no advice is needed
pub fn is_healthy(label: &str) -> bool {
    label.eq_ignore_ascii_case(HEALTHY_LABEL)
}

/// Classifier verdict for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
    #[serde(default)]
    pub all_predictions: HashMap<String, f32>,
    #[serde(default)]
    pub inference_time_ms: f64,
}

/// Current conditions passed along with an advice request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherContext {
    pub condition: Option<String>,
    pub forecast: Option<String>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &[u8], model_type: &str) -> Result<Classification>;
}

#[async_trait]
pub trait Advisor: Send + Sync {
    /// Structured treatment advice for a disease label
    async fn advise(&self, label: &str, weather: Option<&WeatherContext>) -> Result<serde_json::Value>;
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self) -> Result<WeatherContext>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_is_case_insensitive() {
        assert!(is_healthy("healthy"));
        assert!(is_healthy("Healthy"));
        assert!(is_healthy("HEALTHY"));
        assert!(!is_healthy("Tomato_Early_Blight"));
        assert!(!is_healthy(""));
    }

    #[test]
    fn test_classification_wire_names() {
        let c: Classification = serde_json::from_str(
            r#"{"class":"Early_Blight","confidence":0.91,"all_predictions":{"Early_Blight":0.91,"Healthy":0.09},"inference_time_ms":12.5}"#,
        )
        .unwrap();
        assert_eq!(c.label, "Early_Blight");
        assert_eq!(c.all_predictions.len(), 2);

        let back = serde_json::to_value(&c).unwrap();
        assert_eq!(back["class"], "Early_Blight");
    }

    #[test]
    fn test_classification_optional_fields() {
        let c: Classification = serde_json::from_str(r#"{"class":"Healthy","confidence":0.99}"#).unwrap();
        assert!(c.all_predictions.is_empty());
        assert_eq!(c.inference_time_ms, 0.0);
    }
}
