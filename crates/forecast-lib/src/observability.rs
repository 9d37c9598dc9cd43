//! Observability infrastructure for the forecast engine
//!
//! Provides:
//! - Prometheus metrics (generation latency, acceptance, fallbacks, model faults, retraining)
//! - Structured JSON logging with tracing

use crate::alerts::AlertTrigger;
use crate::error::ForecastError;
use crate::models::EnsemblePrediction;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for generation latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ForecastMetricsInner> = OnceLock::new();

struct ForecastMetricsInner {
    generation_latency_seconds: Histogram,
    forecasts_accepted: IntCounter,
    forecasts_reused: IntCounter,
    fallbacks_served: IntCounter,
    validation_rejections: IntCounter,
    generation_failures: IntCounterVec,
    model_faults: IntCounterVec,
    retrain_runs: IntCounterVec,
    alert_conditions: IntCounter,
    generations_in_flight: IntGauge,
    zones_scheduled: IntGauge,
}

impl ForecastMetricsInner {
    fn new() -> Self {
        Self {
            generation_latency_seconds: register_histogram!(
                "flood_forecaster_generation_latency_seconds",
                "Time spent generating a zone forecast",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register generation_latency_seconds"),

            forecasts_accepted: register_int_counter!(
                "flood_forecaster_forecasts_accepted_total",
                "Forecasts that passed validation and were persisted"
            )
            .expect("Failed to register forecasts_accepted"),

            forecasts_reused: register_int_counter!(
                "flood_forecaster_forecasts_reused_total",
                "Generation requests served from a concurrent or recent generation"
            )
            .expect("Failed to register forecasts_reused"),

            fallbacks_served: register_int_counter!(
                "flood_forecaster_fallbacks_served_total",
                "Generation requests answered with previously stored forecasts"
            )
            .expect("Failed to register fallbacks_served"),

            validation_rejections: register_int_counter!(
                "flood_forecaster_validation_rejections_total",
                "Predictions rejected by the quality validator"
            )
            .expect("Failed to register validation_rejections"),

            generation_failures: register_int_counter_vec!(
                "flood_forecaster_generation_failures_total",
                "Generation requests that returned an error, by kind",
                &["kind"]
            )
            .expect("Failed to register generation_failures"),

            model_faults: register_int_counter_vec!(
                "flood_forecaster_model_faults_total",
                "Model invocations that faulted and were excluded",
                &["model"]
            )
            .expect("Failed to register model_faults"),

            retrain_runs: register_int_counter_vec!(
                "flood_forecaster_retrain_runs_total",
                "Retraining attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register retrain_runs"),

            alert_conditions: register_int_counter!(
                "flood_forecaster_alert_conditions_total",
                "Alert rule conditions detected on accepted forecasts"
            )
            .expect("Failed to register alert_conditions"),

            generations_in_flight: register_int_gauge!(
                "flood_forecaster_generations_in_flight",
                "Zone generations currently running"
            )
            .expect("Failed to register generations_in_flight"),

            zones_scheduled: register_int_gauge!(
                "flood_forecaster_zones_scheduled",
                "Zones covered by the last scheduled cycle"
            )
            .expect("Failed to register zones_scheduled"),
        }
    }
}

/// Forecast engine metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ForecastMetrics {
    _private: (),
}

impl Default for ForecastMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ForecastMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ForecastMetricsInner {
        GLOBAL_METRICS.get_or_init(ForecastMetricsInner::new)
    }

    pub fn observe_generation_latency(&self, duration_secs: f64) {
        self.inner().generation_latency_seconds.observe(duration_secs);
    }

    pub fn inc_forecasts_accepted(&self) {
        self.inner().forecasts_accepted.inc();
    }

    pub fn inc_forecasts_reused(&self) {
        self.inner().forecasts_reused.inc();
    }

    pub fn inc_fallbacks_served(&self) {
        self.inner().fallbacks_served.inc();
    }

    pub fn inc_validation_rejections(&self) {
        self.inner().validation_rejections.inc();
    }

    pub fn inc_generation_failures(&self, kind: &str) {
        self.inner()
            .generation_failures
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_model_faults(&self, model_id: &str) {
        self.inner().model_faults.with_label_values(&[model_id]).inc();
    }

    /// `outcome` is one of committed, skipped, rejected
    pub fn inc_retrain_runs(&self, outcome: &str) {
        self.inner().retrain_runs.with_label_values(&[outcome]).inc();
    }

    pub fn add_alert_conditions(&self, count: usize) {
        self.inner().alert_conditions.inc_by(count as u64);
    }

    pub fn set_zones_scheduled(&self, count: i64) {
        self.inner().zones_scheduled.set(count);
    }

    /// Track a running generation until the returned guard drops
    pub fn generation_in_flight(&self) -> InFlightGuard {
        self.inner().generations_in_flight.inc();
        InFlightGuard {
            metrics: self.clone(),
        }
    }
}

/// Decrements the in-flight gauge on drop
pub struct InFlightGuard {
    metrics: ForecastMetrics,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner().generations_in_flight.dec();
    }
}

/// Structured logger for forecast engine events
///
/// Emits consistent `event = "..."` fields for generation, fallback,
/// model faults, retraining and alert conditions.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_forecast_accepted(&self, prediction: &EnsemblePrediction, duration_ms: u64) {
        let peak = prediction
            .per_horizon
            .iter()
            .map(|f| f.flood_risk)
            .fold(0.0f64, f64::max);
        info!(
            event = "forecast_accepted",
            service = %self.service,
            zone_id = %prediction.flood_zone_id,
            model_version = %prediction.model_version,
            horizons = prediction.per_horizon.len(),
            peak_flood_risk = peak,
            data_quality = %prediction.data_quality,
            readings_used = prediction.readings_used,
            duration_ms = duration_ms,
            "Generated flood forecast"
        );
    }

    pub fn log_validation_rejected(&self, zone_id: &str, reason: &str) {
        warn!(
            event = "forecast_rejected",
            service = %self.service,
            zone_id = %zone_id,
            reason = %reason,
            "Forecast failed quality validation"
        );
    }

    pub fn log_fallback(&self, zone_id: &str, cause: &ForecastError, records: usize) {
        warn!(
            event = "forecast_fallback",
            service = %self.service,
            zone_id = %zone_id,
            cause = %cause,
            cause_kind = cause.kind(),
            records = records,
            "Serving previously stored forecast"
        );
    }

    pub fn log_generation_failed(&self, zone_id: &str, error: &ForecastError) {
        warn!(
            event = "forecast_failed",
            service = %self.service,
            zone_id = %zone_id,
            error = %error,
            kind = error.kind(),
            "Forecast generation failed with no fallback available"
        );
    }

    pub fn log_model_fault(&self, zone_id: &str, model_id: &str, horizon: u32, error: &str) {
        warn!(
            event = "model_fault",
            service = %self.service,
            zone_id = %zone_id,
            model_id = %model_id,
            horizon_hours = horizon,
            error = %error,
            "Model excluded from ensemble"
        );
    }

    pub fn log_retrain(&self, zone_id: &str, old_version: u64, new_version: u64, success: bool) {
        if success {
            info!(
                event = "weights_updated",
                service = %self.service,
                zone_id = %zone_id,
                old_version = old_version,
                new_version = new_version,
                "Ensemble weights updated"
            );
        } else {
            warn!(
                event = "weights_update_skipped",
                service = %self.service,
                zone_id = %zone_id,
                version = old_version,
                "Ensemble weights unchanged, keeping previous version"
            );
        }
    }

    pub fn log_alert_condition(&self, trigger: &AlertTrigger) {
        warn!(
            event = "alert_condition",
            service = %self.service,
            zone_id = %trigger.flood_zone_id,
            rule_id = %trigger.rule_id,
            alert_type = %trigger.alert_type,
            severity = %trigger.severity,
            horizon_hours = trigger.time_horizon,
            observed_value = trigger.observed_value,
            threshold = trigger.threshold,
            "Alert condition detected"
        );
    }

    pub fn log_startup(&self, version: &str, models: &[String]) {
        info!(
            event = "forecaster_started",
            service = %self.service,
            version = %version,
            models = ?models,
            "Flood forecaster started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "forecaster_shutdown",
            service = %self.service,
            reason = %reason,
            "Flood forecaster shutting down"
        );
    }
}
