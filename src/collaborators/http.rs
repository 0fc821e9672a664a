// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! HTTP-backed collaborators

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{Advisor, Classification, Classifier, WeatherContext, WeatherProvider};

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

fn trim_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(anyhow!("{} returned {}: {}", what, status.as_u16(), body))
}

/// `POST {base}/classify?model_type=…` with the raw JPEG as body
pub struct HttpClassifier {
    client: Client,
    base_url: String,
}

impl HttpClassifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base(base_url),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, image: &[u8], model_type: &str) -> Result<Classification> {
        let url = format!("{}/classify", self.base_url);
        debug!("Classifying {} bytes with {}", image.len(), model_type);

        let resp = self
            .client
            .post(&url)
            .query(&[("model_type", model_type)])
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(image.to_vec())
            .send()
            .await
            .with_context(|| format!("Classifier request to {} failed", url))?;

        let resp = check(resp, "Classifier").await?;
        resp.json::<Classification>()
            .await
            .context("Malformed classifier response")
    }
}

/// `POST {base}/advise` with `{disease, weather_condition, weather_forecast}`
pub struct HttpAdvisor {
    client: Client,
    base_url: String,
}

impl HttpAdvisor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base(base_url),
        })
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn advise(&self, label: &str, weather: Option<&WeatherContext>) -> Result<serde_json::Value> {
        let url = format!("{}/advise", self.base_url);
        let body = json!({
            "disease": label,
            "weather_condition": weather.and_then(|w| w.condition.clone()),
            "weather_forecast": weather.and_then(|w| w.forecast.clone()),
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Advisor request to {} failed", url))?;

        let resp = check(resp, "Advisor").await?;
        resp.json::<serde_json::Value>()
            .await
            .context("Malformed advisor response")
    }
}

#[derive(Deserialize)]
struct WeatherReply {
    current: Option<String>,
    forecast: Option<String>,
}

/// `GET {base}/weather` returning `{current, forecast}`
pub struct HttpWeather {
    client: Client,
    base_url: String,
}

impl HttpWeather {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base(base_url),
        })
    }
}

#[async_trait]
impl WeatherProvider for HttpWeather {
    async fn current(&self) -> Result<WeatherContext> {
        let url = format!("{}/weather", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Weather request to {} failed", url))?;

        let reply: WeatherReply = check(resp, "Weather service")
            .await?
            .json()
            .await
            .context("Malformed weather response")?;
        Ok(WeatherContext {
            condition: reply.current,
            forecast: reply.forecast,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_classifier_posts_image() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/classify")
            .match_query(Matcher::UrlEncoded("model_type".into(), "mobilenet".into()))
            .match_header("content-type", "image/jpeg")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"class":"Late_Blight","confidence":0.87,"all_predictions":{"Late_Blight":0.87},"inference_time_ms":31.0}"#)
            .create_async()
            .await;

        let classifier = HttpClassifier::new(&format!("{}/", server.url()), TIMEOUT).unwrap();
        let result = classifier
            .classify(&[0xFF, 0xD8, 0x01, 0xFF, 0xD9], "mobilenet")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.label, "Late_Blight");
        assert!((result.confidence - 0.87).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_classifier_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/classify")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("model crashed")
            .create_async()
            .await;

        let classifier = HttpClassifier::new(&server.url(), TIMEOUT).unwrap();
        let err = classifier.classify(b"jpeg", "mobilenet").await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_advisor_sends_weather() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/advise")
            .match_body(Matcher::Json(json!({
                "disease": "Late_Blight",
                "weather_condition": "Rain",
                "weather_forecast": "Rain for 3 days",
            })))
            .with_status(200)
            .with_body(r#"{"severity":"High","action_plan":"Apply copper fungicide"}"#)
            .create_async()
            .await;

        let advisor = HttpAdvisor::new(&server.url(), TIMEOUT).unwrap();
        let weather = WeatherContext {
            condition: Some("Rain".to_string()),
            forecast: Some("Rain for 3 days".to_string()),
        };
        let advice = advisor.advise("Late_Blight", Some(&weather)).await.unwrap();

        mock.assert_async().await;
        assert_eq!(advice["severity"], "High");
    }

    #[tokio::test]
    async fn test_advisor_without_weather_sends_nulls() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/advise")
            .match_body(Matcher::Json(json!({
                "disease": "Leaf_Mold",
                "weather_condition": null,
                "weather_forecast": null,
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let advisor = HttpAdvisor::new(&server.url(), TIMEOUT).unwrap();
        advisor.advise("Leaf_Mold", None).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_weather_reply() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather")
            .with_status(200)
            .with_body(r#"{"current":"Sunny, 28C","forecast":"Dry week"}"#)
            .create_async()
            .await;

        let weather = HttpWeather::new(&server.url(), TIMEOUT).unwrap();
        let ctx = weather.current().await.unwrap();
        assert_eq!(ctx.condition.as_deref(), Some("Sunny, 28C"));
        assert_eq!(ctx.forecast.as_deref(), Some("Dry week"));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_error() {
        let weather = HttpWeather::new("http://127.0.0.1:1", TIMEOUT).unwrap();
        assert!(weather.current().await.is_err());
    }
}
