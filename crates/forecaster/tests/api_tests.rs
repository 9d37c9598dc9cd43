//! Integration tests for the forecaster API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use flood_forecaster::api::{create_router, AppState};
use forecast_lib::{
    health::{components, HealthRegistry},
    lifecycle::FloodForecaster,
    predictor::ModelRegistry,
    repository::InMemoryRepository,
    EngineConfig, FloodStages, FloodZone, ForecastMetrics, GaugeReading, RiskLevel,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn zone(id: &str) -> FloodZone {
    FloodZone {
        id: id.to_string(),
        name: format!("Zone {}", id),
        state: "LA".to_string(),
        county: None,
        latitude: 30.45,
        longitude: -91.19,
        population: None,
        risk_level: RiskLevel::Moderate,
        flood_stages: FloodStages::new(8.0, 12.0, 16.0, 20.0),
    }
}

fn readings(count: usize) -> Vec<GaugeReading> {
    let now = Utc::now();
    (0..count)
        .map(|i| GaugeReading {
            station_id: "gauge-7".to_string(),
            timestamp: now - ChronoDuration::hours((count - i - 1) as i64),
            water_level: 6.0 + 0.04 * i as f64,
            discharge: Some(1200.0),
            temperature: None,
            gage_height: None,
            velocity: None,
        })
        .collect()
}

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let repository = InMemoryRepository::new();
    repository.insert_zone(zone("river-north")).await;
    repository
        .insert_readings("river-north", readings(49))
        .await;
    repository.insert_zone(zone("dry-creek")).await;
    repository.insert_readings("dry-creek", readings(5)).await;

    let forecaster = Arc::new(FloodForecaster::new(
        Arc::new(repository),
        ModelRegistry::standard(),
        EngineConfig::default(),
    ));

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ENGINE).await;
    health_registry.register(components::REPOSITORY).await;

    let state = Arc::new(AppState::new(forecaster, health_registry));
    let router = create_router(state.clone());

    (router, state)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = send(app, get("/healthz")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["engine"].is_object());
    assert!(health["components"]["repository"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::ENGINE, "zone river-north served stored forecast")
        .await;

    let (status, health) = send(app, get("/healthz")).await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::REPOSITORY, "Snapshot unreadable")
        .await;

    let (status, health) = send(app, get("/healthz")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let (app, state) = setup_test_app().await;

    let (status, readiness) = send(app.clone(), get("/readyz")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, readiness) = send(app, get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app().await;

    let metrics = ForecastMetrics::new();
    metrics.observe_generation_latency(0.02);
    metrics.inc_forecasts_accepted();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("flood_forecaster_generation_latency_seconds_bucket"));
    assert!(metrics_text.contains("flood_forecaster_forecasts_accepted_total"));
}

#[tokio::test]
async fn test_get_forecast_is_404_before_generation() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = send(app, get("/api/v1/zones/river-north/forecast")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "no_valid_forecast");
}

#[tokio::test]
async fn test_generate_then_read_forecast() {
    let (app, _state) = setup_test_app().await;

    let (status, generated) = send(
        app.clone(),
        post_json("/api/v1/zones/river-north/forecast", &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(generated["source"], "fresh");
    assert_eq!(generated["records"].as_array().unwrap().len(), 5);

    let (status, stored) = send(app, get("/api/v1/zones/river-north/forecast")).await;
    assert_eq!(status, StatusCode::OK);
    let records = stored["records"].as_array().unwrap();
    let horizons: Vec<u64> = records
        .iter()
        .map(|r| r["time_horizon"].as_u64().unwrap())
        .collect();
    assert_eq!(horizons, vec![1, 3, 6, 12, 24]);
}

#[tokio::test]
async fn test_generate_accepts_empty_body() {
    let (app, _state) = setup_test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/zones/river-north/forecast")
        .body(Body::empty())
        .unwrap();
    let (status, generated) = send(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(generated["zone_id"], "river-north");
}

#[tokio::test]
async fn test_generate_unknown_zone_is_404() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = send(
        app,
        post_json("/api/v1/zones/atlantis/forecast", &json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_zone");
}

#[tokio::test]
async fn test_generate_with_insufficient_data_is_422() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = send(
        app,
        post_json("/api/v1/zones/dry-creek/forecast", &json!({ "force_retrain": true })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_data");
}

#[tokio::test]
async fn test_predict_does_not_persist() {
    let (app, _state) = setup_test_app().await;

    let (status, prediction) = send(app.clone(), get("/api/v1/zones/river-north/predict")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(prediction["flood_zone_id"], "river-north");
    assert_eq!(prediction["per_horizon"].as_array().unwrap().len(), 5);

    let (status, _) = send(app, get("/api/v1/zones/river-north/forecast")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_retrain_without_outcomes_keeps_uniform_weights() {
    let (app, _state) = setup_test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/zones/river-north/retrain")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], false);
    assert_eq!(body["weights"]["version"], 0);
    assert_eq!(body["weights"]["weights"].as_object().unwrap().len(), 3);
}

#[tokio::test]
async fn test_validate_accepts_and_rejects() {
    let (app, _state) = setup_test_app().await;

    let (_, mut prediction) = send(app.clone(), get("/api/v1/zones/river-north/predict")).await;

    let (status, verdict) = send(
        app.clone(),
        post_json("/api/v1/predictions/validate", &prediction),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["valid"], true);
    assert!(verdict.get("reason").is_none());

    prediction["per_horizon"][0]["flood_risk"] = json!(1.5);
    let (status, verdict) = send(app, post_json("/api/v1/predictions/validate", &prediction)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["valid"], false);
    assert!(verdict["reason"].as_str().unwrap().contains("flood_risk"));
}
