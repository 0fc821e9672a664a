// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Offline collaborators for demo mode

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::{is_healthy, Advisor, Classification, Classifier, WeatherContext};

const DEMO_LABELS: [&str; 4] = ["Healthy", "Early_Blight", "Late_Blight", "Leaf_Mold"];

/// Picks a label from the image bytes so the same frame always gets the
/// same answer
pub struct DemoClassifier;

#[async_trait]
impl Classifier for DemoClassifier {
    async fn classify(&self, image: &[u8], _model_type: &str) -> Result<Classification> {
        let sum = image
            .iter()
            .fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u64));
        let pick = (sum % DEMO_LABELS.len() as u64) as usize;
        let label = DEMO_LABELS[pick];
        let confidence = 0.72 + (sum % 25) as f32 / 100.0;

        let all_predictions: HashMap<String, f32> = DEMO_LABELS
            .iter()
            .map(|&l| {
                let score = if l == label {
                    confidence
                } else {
                    (1.0 - confidence) / (DEMO_LABELS.len() - 1) as f32
                };
                (l.to_string(), score)
            })
            .collect();

        Ok(Classification {
            label: label.to_string(),
            confidence,
            all_predictions,
            inference_time_ms: 0.0,
        })
    }
}

/// Canned advice
pub struct DemoAdvisor;

#[async_trait]
impl Advisor for DemoAdvisor {
    async fn advise(&self, label: &str, weather: Option<&WeatherContext>) -> Result<serde_json::Value> {
        let severity = if is_healthy(label) { "None" } else { "Moderate" };
        Ok(json!({
            "disease": label,
            "severity": severity,
            "action_plan": format!("Inspect neighbouring plants for {} and remove affected leaves", label),
            "weather_considered": weather.and_then(|w| w.condition.clone()),
            "source": "demo",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_classifier_is_deterministic() {
        let a = DemoClassifier.classify(b"frame-one", "mobilenet").await.unwrap();
        let b = DemoClassifier.classify(b"frame-one", "mobilenet").await.unwrap();
        assert_eq!(a, b);
        assert!(DEMO_LABELS.contains(&a.label.as_str()));
        assert_eq!(a.all_predictions.len(), DEMO_LABELS.len());
        assert!((0.0..=1.0).contains(&a.confidence));
    }

    #[tokio::test]
    async fn test_demo_advice_mentions_label() {
        let weather = WeatherContext {
            condition: Some("Rain".to_string()),
            forecast: None,
        };
        let advice = DemoAdvisor.advise("Late_Blight", Some(&weather)).await.unwrap();
        assert_eq!(advice["disease"], "Late_Blight");
        assert_eq!(advice["weather_considered"], "Rain");
    }
}
