//! API client for communicating with the flood forecaster service

use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with an error body
    #[error("{message} (HTTP {status}, {code})")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

impl ApiError {
    /// Machine-readable code of a service error
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// API client for the forecaster service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }

        Ok(Self { client, base_url })
    }

    /// Append percent-encoded path segments to the base URL
    pub fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> ApiResult<T> {
        let url = self.endpoint(segments)?;
        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> ApiResult<T> {
        let url = self.endpoint(segments)?;
        let response = self.client.post(url).json(body).send().await?;
        Self::decode(response).await
    }

    pub async fn stored_forecast(&self, zone_id: &str) -> ApiResult<ForecastResponse> {
        self.get(&zone_path(zone_id, "forecast")).await
    }

    pub async fn generate_forecast(
        &self,
        zone_id: &str,
        force_retrain: bool,
    ) -> ApiResult<ForecastResponse> {
        self.post(
            &zone_path(zone_id, "forecast"),
            &GenerateRequest { force_retrain },
        )
        .await
    }

    pub async fn predict(&self, zone_id: &str) -> ApiResult<Prediction> {
        self.get(&zone_path(zone_id, "predict")).await
    }

    pub async fn retrain(&self, zone_id: &str) -> ApiResult<RetrainResponse> {
        self.post(&zone_path(zone_id, "retrain"), &serde_json::json!({}))
            .await
    }

    /// Service health; an unhealthy service still answers with a body
    pub async fn health(&self) -> ApiResult<HealthResponse> {
        let url = self.endpoint(&["healthz"])?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(response.json().await?);
        }
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => (err.code, err.error),
            Err(_) => ("unknown".to_string(), body),
        };
        Err(ApiError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

fn zone_path<'a>(zone_id: &'a str, action: &'a str) -> [&'a str; 5] {
    ["api", "v1", "zones", zone_id, action]
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub force_retrain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPrediction {
    pub flood_zone_id: String,
    pub time_horizon: u32,
    pub generated_at: DateTime<Utc>,
    pub valid_for: DateTime<Utc>,
    pub flood_risk: f64,
    pub severity: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_level: Option<f64>,
    pub model_version: String,
    pub data_quality: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertTrigger {
    pub rule_id: String,
    pub alert_type: String,
    pub severity: String,
    pub time_horizon: u32,
    pub observed_value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub zone_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub records: Vec<StoredPrediction>,
    #[serde(default)]
    pub alerts: Vec<AlertTrigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonForecast {
    pub time_horizon: u32,
    pub flood_risk: f64,
    pub severity: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_level: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub weights: BTreeMap<String, f64>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub flood_zone_id: String,
    pub generated_at: DateTime<Utc>,
    pub model_version: String,
    pub per_horizon: Vec<HorizonForecast>,
    pub ensemble_weights: EnsembleWeights,
    pub data_quality: String,
    pub readings_used: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainResponse {
    pub zone_id: String,
    pub updated: bool,
    pub weights: EnsembleWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(horizon: u32) -> serde_json::Value {
        json!({
            "flood_zone_id": "z1",
            "time_horizon": horizon,
            "generated_at": "2026-04-01T12:00:00Z",
            "valid_for": "2026-04-01T18:00:00Z",
            "flood_risk": 0.42,
            "severity": "MODERATE",
            "confidence": 0.81,
            "water_level": 11.2,
            "model_version": "ensemble-v3",
            "data_quality": "HIGH",
            "ensemble_weights": {}
        })
    }

    #[tokio::test]
    async fn test_stored_forecast_parses_records() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/zones/z1/forecast")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "zone_id": "z1", "records": [record(1), record(6)] }).to_string())
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let forecast = client.stored_forecast("z1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(forecast.records.len(), 2);
        assert_eq!(forecast.records[1].time_horizon, 6);
        assert!(forecast.source.is_none());
        assert!(forecast.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_generate_sends_force_retrain() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/zones/z1/forecast")
            .match_body(mockito::Matcher::Json(json!({ "force_retrain": true })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "zone_id": "z1", "source": "fresh", "records": [record(1)] }).to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let forecast = client.generate_forecast("z1", true).await.unwrap();

        mock.assert_async().await;
        assert_eq!(forecast.source.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_error_body_becomes_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/zones/dry/forecast")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "error": "insufficient data for zone dry: 5 readings available, 24 required",
                    "code": "insufficient_data"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.generate_forecast("dry", false).await.unwrap_err();

        assert_eq!(err.code(), Some("insufficient_data"));
        match err {
            ApiError::Api { status, message, .. } => {
                assert_eq!(status, 422);
                assert!(message.contains("5 readings"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_plain_text_error_keeps_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/zones/z1/predict")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.predict("z1").await.unwrap_err();

        assert_eq!(err.code(), Some("unknown"));
        assert!(err.to_string().contains("bad gateway"));
    }

    #[tokio::test]
    async fn test_unhealthy_service_still_reports_health() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "status": "unhealthy",
                    "components": {
                        "repository": {
                            "status": "unhealthy",
                            "message": "Snapshot unreadable",
                            "last_check_timestamp": 1_775_000_000
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health = client.health().await.unwrap();

        assert_eq!(health.status, "unhealthy");
        assert_eq!(
            health.components["repository"].message.as_deref(),
            Some("Snapshot unreadable")
        );
    }

    #[tokio::test]
    async fn test_zone_id_is_percent_encoded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/zones/a%2Fb%3Fc%23d/forecast")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "zone_id": "a/b?c#d", "records": [] }).to_string())
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let forecast = client.stored_forecast("a/b?c#d").await.unwrap();

        mock.assert_async().await;
        assert_eq!(forecast.zone_id, "a/b?c#d");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = ApiClient::new("http://localhost:8080/forecaster/").unwrap();
        let url = client.endpoint(&zone_path("z 1", "retrain")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/forecaster/api/v1/zones/z%201/retrain"
        );

        let client = ApiClient::new("http://localhost:8080").unwrap();
        assert_eq!(
            client.endpoint(&["healthz"]).unwrap().as_str(),
            "http://localhost:8080/healthz"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ApiClient::new("not a url"),
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(matches!(
            ApiClient::new("mailto:ops@example.com"),
            Err(ApiError::InvalidUrl(_))
        ));
    }
}
