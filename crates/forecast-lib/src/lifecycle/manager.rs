//! Forecast lifecycle: predict, validate, persist, fall back
//!
//! Generations for the same zone are serialised. A caller that arrives while
//! a generation is running waits for it and reuses its result when it is
//! younger than the configured reuse window.

use super::retrain::{RetrainController, RetrainState};
use super::weights::WeightStore;
use crate::alerts::{AlertEvaluator, AlertTrigger};
use crate::config::EngineConfig;
use crate::error::{ForecastError, ForecastResult};
use crate::models::{
    DataQuality, EnsemblePrediction, EnsembleWeights, FeatureVector, FloodZone, GaugeReading,
    ModelContribution, StoredPrediction, WeatherSignal,
};
use crate::observability::{ForecastMetrics, StructuredLogger};
use crate::predictor::{
    enforce_confidence_decay, Coverage, EnsembleCombiner, FeatureBuilder, ModelRegistry,
    QualityValidator, Rejection,
};
use crate::repository::FloodRepository;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Where the records of a generation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastSource {
    /// Newly computed, validated and persisted
    Fresh,
    /// Result of a concurrent or very recent generation
    Reused,
    /// Previously stored records served because generation failed
    Fallback,
}

#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Fresh {
        prediction: EnsemblePrediction,
        records: Vec<StoredPrediction>,
        alerts: Vec<AlertTrigger>,
    },
    Reused {
        prediction: EnsemblePrediction,
        records: Vec<StoredPrediction>,
    },
    Fallback {
        reason: ForecastError,
        records: Vec<StoredPrediction>,
    },
}

impl GenerationOutcome {
    pub fn source(&self) -> ForecastSource {
        match self {
            GenerationOutcome::Fresh { .. } => ForecastSource::Fresh,
            GenerationOutcome::Reused { .. } => ForecastSource::Reused,
            GenerationOutcome::Fallback { .. } => ForecastSource::Fallback,
        }
    }

    pub fn records(&self) -> &[StoredPrediction] {
        match self {
            GenerationOutcome::Fresh { records, .. }
            | GenerationOutcome::Reused { records, .. }
            | GenerationOutcome::Fallback { records, .. } => records,
        }
    }

    pub fn prediction(&self) -> Option<&EnsemblePrediction> {
        match self {
            GenerationOutcome::Fresh { prediction, .. }
            | GenerationOutcome::Reused { prediction, .. } => Some(prediction),
            GenerationOutcome::Fallback { .. } => None,
        }
    }

    pub fn alerts(&self) -> &[AlertTrigger] {
        match self {
            GenerationOutcome::Fresh { alerts, .. } => alerts,
            _ => &[],
        }
    }

    /// The failure a fallback is covering for
    pub fn fallback_reason(&self) -> Option<&ForecastError> {
        match self {
            GenerationOutcome::Fallback { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Last accepted generation of a zone
struct Accepted {
    at: Instant,
    prediction: EnsemblePrediction,
    records: Vec<StoredPrediction>,
}

#[derive(Default)]
struct ZoneSlot {
    last: Option<Accepted>,
}

/// Entry point of the engine
pub struct FloodForecaster {
    repository: Arc<dyn FloodRepository>,
    registry: Arc<ModelRegistry>,
    weights: Arc<WeightStore>,
    retrainer: RetrainController,
    feature_builder: FeatureBuilder,
    combiner: EnsembleCombiner,
    validator: QualityValidator,
    alerts: AlertEvaluator,
    config: EngineConfig,
    slots: DashMap<String, Arc<Mutex<ZoneSlot>>>,
    metrics: ForecastMetrics,
    logger: StructuredLogger,
}

impl FloodForecaster {
    pub fn new(
        repository: Arc<dyn FloodRepository>,
        registry: ModelRegistry,
        config: EngineConfig,
    ) -> Self {
        Self::with_logger(
            repository,
            registry,
            config,
            StructuredLogger::new("flood-forecaster"),
        )
    }

    pub fn with_logger(
        repository: Arc<dyn FloodRepository>,
        registry: ModelRegistry,
        config: EngineConfig,
        logger: StructuredLogger,
    ) -> Self {
        let registry = Arc::new(registry);
        let weights = Arc::new(WeightStore::new());
        let retrainer = RetrainController::new(
            Arc::clone(&repository),
            Arc::clone(&registry),
            Arc::clone(&weights),
            config.retrain.clone(),
            config.fetch_timeout(),
            logger.clone(),
        );
        Self {
            repository,
            registry,
            weights,
            retrainer,
            feature_builder: FeatureBuilder::new(config.feature.clone()),
            combiner: EnsembleCombiner::new(config.ensemble.clone()),
            validator: QualityValidator::new(config.validation.clone()),
            alerts: AlertEvaluator::new(),
            config,
            slots: DashMap::new(),
            metrics: ForecastMetrics::new(),
            logger,
        }
    }

    /// Replace the alert evaluator, e.g. to change its cooldown
    pub fn with_alert_evaluator(mut self, alerts: AlertEvaluator) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Weights in force for the zone; uniform until a retrain commits
    pub fn committed_weights(&self, zone_id: &str) -> Arc<EnsembleWeights> {
        self.weights.current(zone_id, &self.registry)
    }

    pub fn retrain_state(&self, zone_id: &str) -> RetrainState {
        self.retrainer.state(zone_id)
    }

    pub async fn zone_ids(&self) -> anyhow::Result<Vec<String>> {
        let zones = timeout(self.config.fetch_timeout(), self.repository.zones())
            .await
            .map_err(|_| anyhow::anyhow!("timed out listing zones"))??;
        Ok(zones.into_iter().map(|z| z.id).collect())
    }

    /// Compute a prediction without validating or persisting it
    pub async fn predict(&self, zone_id: &str) -> ForecastResult<EnsemblePrediction> {
        let now = Utc::now();
        let zone = self.fetch_zone(zone_id).await?;
        let readings = self.fetch_readings(zone_id).await?;
        let weather = self.fetch_weather(zone_id).await;

        let horizons = self.config.normalized_horizons();
        let features =
            self.feature_builder
                .build(&zone, &readings, weather.as_ref(), &horizons, now)?;
        let weights = self.weights.current(zone_id, &self.registry);
        let contributions = self.run_models(zone_id, &features);

        self.assemble(zone_id, now, &features, contributions, &weights)
    }

    pub fn validate_prediction(&self, prediction: &EnsemblePrediction) -> bool {
        self.validator.validate(prediction)
    }

    pub fn rejection(&self, prediction: &EnsemblePrediction) -> Option<Rejection> {
        self.validator.rejection(prediction)
    }

    /// Recompute the zone's weights; a commit drops the reusable generation
    pub async fn update_models(&self, zone_id: &str) -> bool {
        let updated = self.retrainer.update_models(zone_id).await;
        if updated {
            self.invalidate(zone_id).await;
        }
        updated
    }

    /// Latest still-valid stored record per horizon
    pub async fn stored_predictions(&self, zone_id: &str) -> ForecastResult<Vec<StoredPrediction>> {
        let now = Utc::now();
        match timeout(
            self.config.fetch_timeout(),
            self.repository.latest_valid_predictions(zone_id, now),
        )
        .await
        {
            Ok(Ok(records)) => Ok(records.into_iter().filter(|r| r.is_valid_at(now)).collect()),
            Ok(Err(e)) => Err(ForecastError::Persistence(e.to_string())),
            Err(_) => Err(ForecastError::Persistence(
                "timed out reading stored predictions".to_string(),
            )),
        }
    }

    /// Produce, validate and persist a forecast for the zone.
    ///
    /// Falls back to the latest still-valid stored records when generation
    /// fails; the generation error is returned only when there are none.
    pub async fn generate(&self, zone_id: &str) -> ForecastResult<GenerationOutcome> {
        if !self.slots.contains_key(zone_id) {
            if let Err(reason @ ForecastError::UnknownZone(_)) = self.fetch_zone(zone_id).await {
                return self.fallback(zone_id, reason).await;
            }
        }
        let slot = self.slot(zone_id);
        let mut slot = slot.lock().await;

        if let Some(last) = &slot.last {
            if last.at.elapsed() < self.config.reuse_window() {
                debug!(zone_id = %zone_id, "Reusing recent generation");
                self.metrics.inc_forecasts_reused();
                return Ok(GenerationOutcome::Reused {
                    prediction: last.prediction.clone(),
                    records: last.records.clone(),
                });
            }
        }

        let _in_flight = self.metrics.generation_in_flight();
        let start = Instant::now();
        let result = self.generate_fresh(zone_id).await;
        self.metrics
            .observe_generation_latency(start.elapsed().as_secs_f64());

        match result {
            Ok((prediction, records)) => {
                self.metrics.inc_forecasts_accepted();
                self.logger
                    .log_forecast_accepted(&prediction, start.elapsed().as_millis() as u64);
                let alerts = self.detect_alerts(&prediction).await;
                slot.last = Some(Accepted {
                    at: Instant::now(),
                    prediction: prediction.clone(),
                    records: records.clone(),
                });
                Ok(GenerationOutcome::Fresh {
                    prediction,
                    records,
                    alerts,
                })
            }
            Err(reason) => self.fallback(zone_id, reason).await,
        }
    }

    /// Generate, optionally recomputing the zone's weights first
    pub async fn generate_with_retrain(
        &self,
        zone_id: &str,
        force_retrain: bool,
    ) -> ForecastResult<GenerationOutcome> {
        if force_retrain {
            let updated = self.update_models(zone_id).await;
            debug!(zone_id = %zone_id, updated = updated, "Forced retrain before generation");
        }
        self.generate(zone_id).await
    }

    /// Forget the zone's reusable generation
    async fn invalidate(&self, zone_id: &str) {
        let Some(slot) = self.slots.get(zone_id).map(|s| Arc::clone(s.value())) else {
            return;
        };
        slot.lock().await.last = None;
    }

    #[cfg(test)]
    pub(super) fn tracked_zone_count(&self) -> (usize, usize) {
        (self.slots.len(), self.retrainer.tracked_zone_count())
    }

    #[cfg(test)]
    pub(super) fn commit_weights(&self, zone_id: &str, weights: EnsembleWeights) {
        self.weights.commit(zone_id, weights);
    }

    async fn generate_fresh(
        &self,
        zone_id: &str,
    ) -> ForecastResult<(EnsemblePrediction, Vec<StoredPrediction>)> {
        let prediction = self.predict(zone_id).await?;

        if let Some(rejection) = self.validator.rejection(&prediction) {
            self.metrics.inc_validation_rejections();
            self.logger
                .log_validation_rejected(zone_id, &rejection.to_string());
            return Err(ForecastError::ValidationRejected {
                zone_id: zone_id.to_string(),
            });
        }

        let records = prediction.to_stored();
        match timeout(
            self.config.fetch_timeout(),
            self.repository.save_predictions(&records),
        )
        .await
        {
            Ok(Ok(())) => Ok((prediction, records)),
            Ok(Err(e)) => Err(ForecastError::Persistence(e.to_string())),
            Err(_) => Err(ForecastError::Persistence(
                "timed out saving predictions".to_string(),
            )),
        }
    }

    async fn fallback(
        &self,
        zone_id: &str,
        reason: ForecastError,
    ) -> ForecastResult<GenerationOutcome> {
        match self.stored_predictions(zone_id).await {
            Ok(records) if !records.is_empty() => {
                self.metrics.inc_fallbacks_served();
                self.logger.log_fallback(zone_id, &reason, records.len());
                Ok(GenerationOutcome::Fallback { reason, records })
            }
            Ok(_) => {
                self.metrics.inc_generation_failures(reason.kind());
                self.logger.log_generation_failed(zone_id, &reason);
                Err(reason)
            }
            Err(e) => {
                warn!(zone_id = %zone_id, error = %e, "Fallback lookup failed");
                self.metrics.inc_generation_failures(reason.kind());
                self.logger.log_generation_failed(zone_id, &reason);
                Err(reason)
            }
        }
    }

    async fn detect_alerts(&self, prediction: &EnsemblePrediction) -> Vec<AlertTrigger> {
        let rules = match timeout(
            self.config.fetch_timeout(),
            self.repository.alert_rules(&prediction.flood_zone_id),
        )
        .await
        {
            Ok(Ok(rules)) => rules,
            Ok(Err(e)) => {
                warn!(zone_id = %prediction.flood_zone_id, error = %e, "Failed to load alert rules");
                return Vec::new();
            }
            Err(_) => {
                warn!(zone_id = %prediction.flood_zone_id, "Timed out loading alert rules");
                return Vec::new();
            }
        };
        let triggers = self.alerts.evaluate(prediction, &rules, Utc::now());
        for trigger in &triggers {
            self.logger.log_alert_condition(trigger);
        }
        self.metrics.add_alert_conditions(triggers.len());
        triggers
    }

    fn slot(&self, zone_id: &str) -> Arc<Mutex<ZoneSlot>> {
        let entry = self.slots.entry(zone_id.to_string()).or_default();
        Arc::clone(entry.value())
    }

    async fn fetch_zone(&self, zone_id: &str) -> ForecastResult<FloodZone> {
        match timeout(self.config.fetch_timeout(), self.repository.zone(zone_id)).await {
            Ok(Ok(Some(zone))) => Ok(zone),
            Ok(Ok(None)) => Err(ForecastError::UnknownZone(zone_id.to_string())),
            Ok(Err(e)) => {
                warn!(zone_id = %zone_id, error = %e, "Failed to load zone");
                Err(self.unavailable(zone_id))
            }
            Err(_) => {
                warn!(zone_id = %zone_id, "Timed out loading zone");
                Err(self.unavailable(zone_id))
            }
        }
    }

    async fn fetch_readings(&self, zone_id: &str) -> ForecastResult<Vec<GaugeReading>> {
        let window = self.config.feature.window_hours;
        match timeout(
            self.config.fetch_timeout(),
            self.repository.recent_readings(zone_id, window),
        )
        .await
        {
            Ok(Ok(readings)) => Ok(readings),
            Ok(Err(e)) => {
                warn!(zone_id = %zone_id, error = %e, "Failed to load readings");
                Err(self.unavailable(zone_id))
            }
            Err(_) => {
                warn!(zone_id = %zone_id, "Timed out loading readings");
                Err(self.unavailable(zone_id))
            }
        }
    }

    /// Weather is optional; any failure degrades to the neutral default
    async fn fetch_weather(&self, zone_id: &str) -> Option<WeatherSignal> {
        match timeout(
            self.config.fetch_timeout(),
            self.repository.weather_signal(zone_id),
        )
        .await
        {
            Ok(Ok(signal)) => signal,
            Ok(Err(e)) => {
                debug!(zone_id = %zone_id, error = %e, "Weather signal unavailable");
                None
            }
            Err(_) => {
                debug!(zone_id = %zone_id, "Timed out loading weather signal");
                None
            }
        }
    }

    fn unavailable(&self, zone_id: &str) -> ForecastError {
        ForecastError::InsufficientData {
            zone_id: zone_id.to_string(),
            available: 0,
            required: self.config.feature.min_readings,
        }
    }

    /// Run every model on every horizon, isolating faults and panics
    fn run_models(&self, zone_id: &str, features: &[FeatureVector]) -> Vec<ModelContribution> {
        let mut contributions = Vec::with_capacity(features.len() * self.registry.len());
        for feature in features {
            let horizon = feature.horizon_hours;
            for model in self.registry.iter() {
                let result = catch_unwind(AssertUnwindSafe(|| model.predict(feature, horizon)));
                let error = match result {
                    Ok(Ok(mut contribution)) => {
                        contribution.model_id = model.id().to_string();
                        contribution.horizon_hours = horizon;
                        contributions.push(contribution);
                        continue;
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "model panicked".to_string(),
                };
                self.metrics.inc_model_faults(model.id());
                self.logger
                    .log_model_fault(zone_id, model.id(), horizon, &error);
            }
        }
        contributions
    }

    fn assemble(
        &self,
        zone_id: &str,
        generated_at: DateTime<Utc>,
        features: &[FeatureVector],
        contributions: Vec<ModelContribution>,
        weights: &EnsembleWeights,
    ) -> ForecastResult<EnsemblePrediction> {
        let Some(first) = features.first() else {
            return Err(self.unavailable(zone_id));
        };
        let coverage = Coverage {
            expected_models: self.registry.len(),
            window_full: first.window_full(),
        };

        let mut per_horizon = Vec::with_capacity(features.len());
        let mut data_quality = DataQuality::High;
        for feature in features {
            let combined = self.combiner.combine(
                zone_id,
                &contributions,
                weights,
                feature.horizon_hours,
                coverage,
            )?;
            data_quality = data_quality.min(combined.data_quality);
            per_horizon.push(combined.forecast);
        }
        enforce_confidence_decay(&mut per_horizon);

        Ok(EnsemblePrediction {
            flood_zone_id: zone_id.to_string(),
            generated_at,
            model_version: format!("ensemble-v{}", weights.version),
            per_horizon,
            ensemble_weights: weights.clone(),
            data_quality,
            model_contributions: contributions,
            weather_factors: first.weather,
            readings_used: first.readings_used,
        })
    }
}
