//! HTTP API for forecasts, health checks and Prometheus metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use forecast_lib::{
    alerts::AlertTrigger,
    health::{ComponentStatus, HealthRegistry},
    EnsemblePrediction, EnsembleWeights, FloodForecaster, ForecastError, ForecastSource,
    GenerationOutcome, StoredPrediction,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub forecaster: Arc<FloodForecaster>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(forecaster: Arc<FloodForecaster>, health_registry: HealthRegistry) -> Self {
        Self {
            forecaster,
            health_registry,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    pub force_retrain: bool,
}

/// Records of a generation together with where they came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub zone_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ForecastSource>,
    pub records: Vec<StoredPrediction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<AlertTrigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl ForecastResponse {
    fn from_outcome(zone_id: String, outcome: GenerationOutcome) -> Self {
        let source = outcome.source();
        let fallback_reason = outcome.fallback_reason().map(|e| e.to_string());
        let alerts = outcome.alerts().to_vec();
        let records = outcome.records().to_vec();
        Self {
            zone_id,
            source: Some(source),
            records,
            alerts,
            fallback_reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainResponse {
    pub zone_id: String,
    pub updated: bool,
    pub weights: EnsembleWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// HTTP status for an engine error
pub fn status_for(error: &ForecastError) -> StatusCode {
    match error {
        ForecastError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ForecastError::UnknownZone(_) => StatusCode::NOT_FOUND,
        ForecastError::NoContributingModels { .. } | ForecastError::Persistence(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ForecastError::ValidationRejected { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &ForecastError) -> Response {
    (
        status_for(error),
        Json(ErrorResponse {
            error: error.to_string(),
            code: error.kind().to_string(),
        }),
    )
        .into_response()
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving fallbacks
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Latest still-valid stored forecast for a zone
async fn get_forecast(
    State(state): State<Arc<AppState>>,
    Path(zone_id): Path<String>,
) -> Response {
    match state.forecaster.stored_predictions(&zone_id).await {
        Ok(records) if records.is_empty() => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no valid forecast for zone {}", zone_id),
                code: "no_valid_forecast".to_string(),
            }),
        )
            .into_response(),
        Ok(records) => Json(ForecastResponse {
            zone_id,
            source: None,
            records,
            alerts: Vec::new(),
            fallback_reason: None,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// Generate a forecast, retraining first when requested
async fn generate_forecast(
    State(state): State<Arc<AppState>>,
    Path(zone_id): Path<String>,
    request: Option<Json<GenerateRequest>>,
) -> Response {
    let Json(request) = request.unwrap_or_default();
    match state
        .forecaster
        .generate_with_retrain(&zone_id, request.force_retrain)
        .await
    {
        Ok(outcome) => Json(ForecastResponse::from_outcome(zone_id, outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Fresh prediction without validation or persistence
async fn predict(State(state): State<Arc<AppState>>, Path(zone_id): Path<String>) -> Response {
    match state.forecaster.predict(&zone_id).await {
        Ok(prediction) => Json(prediction).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn retrain(
    State(state): State<Arc<AppState>>,
    Path(zone_id): Path<String>,
) -> Json<RetrainResponse> {
    let updated = state.forecaster.update_models(&zone_id).await;
    let weights = state.forecaster.committed_weights(&zone_id);
    Json(RetrainResponse {
        zone_id,
        updated,
        weights: (*weights).clone(),
    })
}

async fn validate(
    State(state): State<Arc<AppState>>,
    Json(prediction): Json<EnsemblePrediction>,
) -> Json<ValidateResponse> {
    let reason = state
        .forecaster
        .rejection(&prediction)
        .map(|r| r.to_string());
    Json(ValidateResponse {
        valid: reason.is_none(),
        reason,
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route(
            "/api/v1/zones/:zone_id/forecast",
            get(get_forecast).post(generate_forecast),
        )
        .route("/api/v1/zones/:zone_id/predict", get(predict))
        .route("/api/v1/zones/:zone_id/retrain", post(retrain))
        .route("/api/v1/predictions/validate", post(validate))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
