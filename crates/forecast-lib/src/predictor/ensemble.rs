//! Weighted combination of model contributions

use crate::config::EnsembleConfig;
use crate::error::{ForecastError, ForecastResult};
use crate::models::{
    clamp_unit, DataQuality, EnsembleWeights, HorizonForecast, ModelContribution,
};

/// What the ensemble expected to receive for a horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    /// Number of registered models
    pub expected_models: usize,
    /// Whether the reading window was complete
    pub window_full: bool,
}

/// Ensemble output for one horizon
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedForecast {
    pub forecast: HorizonForecast,
    pub data_quality: DataQuality,
    /// Models that carried positive weight into the consensus
    pub contributing_models: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EnsembleCombiner {
    config: EnsembleConfig,
}

impl EnsembleCombiner {
    pub fn new(config: EnsembleConfig) -> Self {
        Self { config }
    }

    /// Multiplier applied to confidence at a horizon
    pub fn decay_factor(&self, horizon: u32) -> f64 {
        let linear = 1.0 - self.config.confidence_decay_rate * f64::from(horizon);
        linear.max(self.config.confidence_decay_floor).min(1.0)
    }

    /// Combine the contributions for `horizon` using the zone's weights.
    ///
    /// Contributions for other horizons are ignored. A model with no weight
    /// entry weighs zero. Fails with `NoContributingModels` when no
    /// contribution carries positive weight.
    pub fn combine(
        &self,
        zone_id: &str,
        contributions: &[ModelContribution],
        weights: &EnsembleWeights,
        horizon: u32,
        coverage: Coverage,
    ) -> ForecastResult<CombinedForecast> {
        let for_horizon: Vec<&ModelContribution> = contributions
            .iter()
            .filter(|c| c.horizon_hours == horizon)
            .collect();
        let weighted: Vec<(&ModelContribution, f64)> = for_horizon
            .iter()
            .map(|c| (*c, weights.weight(&c.model_id)))
            .filter(|(_, w)| w.is_finite() && *w > 0.0)
            .collect();

        let total: f64 = weighted.iter().map(|(_, w)| w).sum();
        if weighted.is_empty() || total <= 0.0 {
            return Err(ForecastError::NoContributingModels {
                zone_id: zone_id.to_string(),
            });
        }

        let flood_risk = weighted.iter().map(|(c, w)| c.flood_risk * w).sum::<f64>() / total;
        let raw_confidence = weighted.iter().map(|(c, w)| c.confidence * w).sum::<f64>() / total;

        let level_weight: f64 = weighted
            .iter()
            .filter(|(c, _)| c.water_level.is_some())
            .map(|(_, w)| w)
            .sum();
        let water_level = (level_weight > 0.0).then(|| {
            weighted
                .iter()
                .filter_map(|(c, w)| c.water_level.map(|l| l * w))
                .sum::<f64>()
                / level_weight
        });

        let flood_risk = clamp_unit(flood_risk);
        let confidence = clamp_unit(raw_confidence * self.decay_factor(horizon));
        let severity = self.config.severity.classify(flood_risk);

        let missing_models = coverage.expected_models.saturating_sub(for_horizon.len());
        let window_penalty = usize::from(!coverage.window_full);
        let data_quality = DataQuality::High.degrade(missing_models + window_penalty);

        Ok(CombinedForecast {
            forecast: HorizonForecast {
                time_horizon: horizon,
                flood_risk,
                severity,
                confidence,
                water_level,
            },
            data_quality,
            contributing_models: weighted.len(),
        })
    }
}

/// Make confidence non-increasing across ascending horizons
pub fn enforce_confidence_decay(forecasts: &mut [HorizonForecast]) {
    forecasts.sort_by_key(|f| f.time_horizon);
    let mut ceiling = 1.0f64;
    for forecast in forecasts.iter_mut() {
        forecast.confidence = forecast.confidence.min(ceiling);
        ceiling = forecast.confidence;
    }
}
