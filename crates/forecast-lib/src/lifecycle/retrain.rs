//! Ensemble weight retraining from historical outcomes
//!
//! Each registered model is scored by its mean absolute error over the
//! lookback window and weighted by `1 / (1 + MAE)`. A zone retrains at most
//! once at a time; a second request while one is running is rejected.

use super::weights::WeightStore;
use crate::config::RetrainConfig;
use crate::models::{EnsembleWeights, HistoricalOutcome};
use crate::observability::{ForecastMetrics, StructuredLogger};
use crate::predictor::ModelRegistry;
use crate::repository::FloodRepository;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetrainState {
    Idle,
    Training,
}

/// Inverse-error weights for `model_ids`, not yet normalised.
///
/// Returns None when any model has fewer than `min_outcomes` scored
/// outcomes predicted at or after `since`.
pub fn inverse_error_weights(
    outcomes: &[HistoricalOutcome],
    model_ids: &[String],
    min_outcomes: usize,
    since: DateTime<Utc>,
) -> Option<BTreeMap<String, f64>> {
    if model_ids.is_empty() {
        return None;
    }
    let mut raw = BTreeMap::new();
    for model_id in model_ids {
        let errors: Vec<f64> = outcomes
            .iter()
            .filter(|o| &o.model_id == model_id && o.predicted_at >= since)
            .filter_map(HistoricalOutcome::absolute_error)
            .collect();
        if errors.len() < min_outcomes.max(1) {
            return None;
        }
        let mae = errors.iter().sum::<f64>() / errors.len() as f64;
        raw.insert(model_id.clone(), 1.0 / (1.0 + mae));
    }
    Some(raw)
}

/// Returns a zone to Idle when a retrain ends, however it ends
struct TrainingGuard<'a> {
    states: &'a DashMap<String, RetrainState>,
    zone_id: String,
}

// Idle zones have no entry
impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        self.states.remove(&self.zone_id);
    }
}

pub struct RetrainController {
    repository: Arc<dyn FloodRepository>,
    registry: Arc<ModelRegistry>,
    weights: Arc<WeightStore>,
    config: RetrainConfig,
    fetch_timeout: Duration,
    states: DashMap<String, RetrainState>,
    metrics: ForecastMetrics,
    logger: StructuredLogger,
}

impl RetrainController {
    pub fn new(
        repository: Arc<dyn FloodRepository>,
        registry: Arc<ModelRegistry>,
        weights: Arc<WeightStore>,
        config: RetrainConfig,
        fetch_timeout: Duration,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            repository,
            registry,
            weights,
            config,
            fetch_timeout,
            states: DashMap::new(),
            metrics: ForecastMetrics::new(),
            logger,
        }
    }

    pub fn state(&self, zone_id: &str) -> RetrainState {
        self.states
            .get(zone_id)
            .map(|s| *s.value())
            .unwrap_or(RetrainState::Idle)
    }

    /// Recompute and commit the zone's weights.
    ///
    /// Returns true only when new weights were committed. Rejected while
    /// the zone is already training; on any other failure the previously
    /// committed weights stay in force.
    pub async fn update_models(&self, zone_id: &str) -> bool {
        let Some(_guard) = self.try_begin(zone_id) else {
            debug!(zone_id = %zone_id, "Retrain already in progress");
            self.metrics.inc_retrain_runs("rejected");
            return false;
        };

        let previous_version = self
            .weights
            .committed(zone_id)
            .map(|w| w.version)
            .unwrap_or(0);

        let outcomes = match tokio::time::timeout(
            self.fetch_timeout,
            self.repository.historical_outcomes(zone_id),
        )
        .await
        {
            Ok(Ok(outcomes)) => outcomes,
            Ok(Err(e)) => {
                warn!(zone_id = %zone_id, error = %e, "Failed to fetch historical outcomes");
                return self.skip(zone_id, previous_version);
            }
            Err(_) => {
                warn!(zone_id = %zone_id, "Timed out fetching historical outcomes");
                return self.skip(zone_id, previous_version);
            }
        };

        let now = Utc::now();
        let since = now - ChronoDuration::hours(i64::from(self.config.lookback_hours));
        let raw = inverse_error_weights(
            &outcomes,
            &self.registry.ids(),
            self.config.min_outcomes_per_model,
            since,
        );
        let Some(weights) =
            raw.and_then(|raw| EnsembleWeights::normalized(raw, previous_version + 1, now))
        else {
            debug!(
                zone_id = %zone_id,
                outcomes = outcomes.len(),
                "Not enough outcomes to retrain"
            );
            return self.skip(zone_id, previous_version);
        };

        let committed = self.weights.commit(zone_id, weights);
        self.metrics.inc_retrain_runs("committed");
        self.logger
            .log_retrain(zone_id, previous_version, committed.version, true);
        true
    }

    #[cfg(test)]
    pub(super) fn tracked_zone_count(&self) -> usize {
        self.states.len()
    }

    fn skip(&self, zone_id: &str, version: u64) -> bool {
        self.metrics.inc_retrain_runs("skipped");
        self.logger.log_retrain(zone_id, version, version, false);
        false
    }

    /// Atomically move the zone from Idle to Training
    fn try_begin(&self, zone_id: &str) -> Option<TrainingGuard<'_>> {
        match self.states.entry(zone_id.to_string()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(entry) => {
                entry.insert(RetrainState::Training);
            }
        }
        Some(TrainingGuard {
            states: &self.states,
            zone_id: zone_id.to_string(),
        })
    }
}
