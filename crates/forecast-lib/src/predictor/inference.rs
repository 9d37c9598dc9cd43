//! Built-in flood models
//!
//! Each model is a deterministic function of a feature vector and a horizon.
//! Models clamp their own outputs; a fault is reported as an error and the
//! engine drops that model for the cycle.

use super::FloodModel;
use crate::models::{FeatureVector, ModelContribution};
use anyhow::{bail, Result};

pub const TREND_EXTRAPOLATION: &str = "trend_extrapolation";
pub const STAGE_THRESHOLD: &str = "stage_threshold";
pub const WEATHER_CORRELATION: &str = "weather_correlation";

fn ensure_finite(model_id: &str, features: &FeatureVector) -> Result<()> {
    let values = [
        features.current_level,
        features.level_trend,
        features.level_mean,
        features.level_volatility,
        features.seasonal_index,
        features.baseline_risk,
    ];
    if values.iter().any(|v| !v.is_finite()) {
        bail!("{} received a non-finite feature value", model_id);
    }
    Ok(())
}

/// Projects the current level forward along the recent trend
///
/// The trend is damped each hour so long horizons do not run away.
#[derive(Debug, Clone)]
pub struct TrendExtrapolationModel {
    /// Fraction of the trend carried into the next hour
    damping: f64,
    base_confidence: f64,
    /// Horizon over which confidence halves
    confidence_half_life_hours: f64,
    min_confidence: f64,
}

impl Default for TrendExtrapolationModel {
    fn default() -> Self {
        Self {
            damping: 0.9,
            base_confidence: 0.92,
            confidence_half_life_hours: 18.0,
            min_confidence: 0.1,
        }
    }
}

impl TrendExtrapolationModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Water level expected `horizon` hours ahead
    pub fn projected_level(&self, features: &FeatureVector, horizon: u32) -> f64 {
        let h = f64::from(horizon);
        let carried_hours = if (1.0 - self.damping).abs() < f64::EPSILON {
            h
        } else {
            (1.0 - self.damping.powf(h)) / (1.0 - self.damping)
        };
        (features.current_level + features.level_trend * carried_hours).max(0.0)
    }
}

impl FloodModel for TrendExtrapolationModel {
    fn id(&self) -> &str {
        TREND_EXTRAPOLATION
    }

    fn predict(&self, features: &FeatureVector, horizon: u32) -> Result<ModelContribution> {
        ensure_finite(self.id(), features)?;
        let level = self.projected_level(features, horizon);
        let risk = features.stages.stage_risk(level);
        let decay = 0.5f64.powf(f64::from(horizon) / self.confidence_half_life_hours);
        let confidence = (self.base_confidence * decay).max(self.min_confidence);
        Ok(ModelContribution::clamped(
            self.id(),
            horizon,
            risk,
            Some(level),
            confidence,
        ))
    }
}

/// Scores the current level against the zone's flood stages
///
/// Does not project a water level and is insensitive to the horizon.
#[derive(Debug, Clone)]
pub struct StageThresholdModel {
    stage_weight: f64,
    confidence: f64,
    /// Confidence used when the zone's stages are not ascending
    malformed_stage_confidence: f64,
}

impl Default for StageThresholdModel {
    fn default() -> Self {
        Self {
            stage_weight: 0.75,
            confidence: 0.75,
            malformed_stage_confidence: 0.3,
        }
    }
}

impl StageThresholdModel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FloodModel for StageThresholdModel {
    fn id(&self) -> &str {
        STAGE_THRESHOLD
    }

    fn predict(&self, features: &FeatureVector, horizon: u32) -> Result<ModelContribution> {
        ensure_finite(self.id(), features)?;
        // One standard deviation above the current level
        let exceedance = features.current_level + features.level_volatility;
        let stage_risk = features.stages.stage_risk(exceedance);
        let risk = self.stage_weight * stage_risk + (1.0 - self.stage_weight) * features.baseline_risk;
        let confidence = if features.stages.is_well_formed() {
            self.confidence
        } else {
            self.malformed_stage_confidence
        };
        Ok(ModelContribution::clamped(
            self.id(),
            horizon,
            risk,
            None,
            confidence,
        ))
    }
}

/// Shifts stage risk by the precipitation anomaly, weighted by season
///
/// Weather matters more for later horizons; the full effect is reached at
/// `full_effect_hours`. Confidence follows signal reliability, so a neutral
/// default weather input yields a low-confidence contribution.
#[derive(Debug, Clone)]
pub struct WeatherCorrelationModel {
    /// Risk added per unit of precipitation anomaly at full effect
    risk_sensitivity: f64,
    /// Feet of rise per unit of precipitation anomaly at full effect
    level_sensitivity: f64,
    full_effect_hours: f64,
    min_confidence: f64,
    max_confidence: f64,
}

impl Default for WeatherCorrelationModel {
    fn default() -> Self {
        Self {
            risk_sensitivity: 0.12,
            level_sensitivity: 0.8,
            full_effect_hours: 12.0,
            min_confidence: 0.15,
            max_confidence: 0.85,
        }
    }
}

impl WeatherCorrelationModel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FloodModel for WeatherCorrelationModel {
    fn id(&self) -> &str {
        WEATHER_CORRELATION
    }

    fn predict(&self, features: &FeatureVector, horizon: u32) -> Result<ModelContribution> {
        ensure_finite(self.id(), features)?;
        let weather = &features.weather;
        let effect = (f64::from(horizon) / self.full_effect_hours).min(1.0)
            * (0.5 + 0.5 * features.seasonal_index)
            * weather.precipitation_anomaly;

        let level = (features.current_level + self.level_sensitivity * effect).max(0.0);
        let risk = features.stages.stage_risk(level) + self.risk_sensitivity * effect;
        let confidence = self.min_confidence
            + (self.max_confidence - self.min_confidence) * weather.reliability;
        Ok(ModelContribution::clamped(
            self.id(),
            horizon,
            risk,
            Some(level),
            confidence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FloodStages, WeatherFactors, WeatherSource};

    fn features(current_level: f64, level_trend: f64) -> FeatureVector {
        FeatureVector {
            horizon_hours: 1,
            current_level,
            level_trend,
            level_mean: current_level,
            level_volatility: 0.0,
            discharge: None,
            temperature: None,
            seasonal_index: 0.5,
            weather: WeatherFactors::neutral(),
            stages: FloodStages::new(8.0, 12.0, 16.0, 20.0),
            baseline_risk: 0.2,
            readings_used: 48,
            window_fill: 1.0,
        }
    }

    fn observed(anomaly: f64, reliability: f64) -> WeatherFactors {
        WeatherFactors {
            precipitation_anomaly: anomaly,
            reliability,
            source: WeatherSource::Observed,
        }
    }

    #[test]
    fn test_trend_rising_increases_risk_with_horizon() {
        let model = TrendExtrapolationModel::new();
        let f = features(10.0, 0.5);
        let near = model.predict(&f, 1).unwrap();
        let far = model.predict(&f, 24).unwrap();
        assert!(far.flood_risk > near.flood_risk);
        assert!(far.water_level.unwrap() > near.water_level.unwrap());
        assert!(far.confidence < near.confidence);
        assert_eq!(near.model_id, TREND_EXTRAPOLATION);
    }

    #[test]
    fn test_trend_falling_level_never_negative() {
        let model = TrendExtrapolationModel::new();
        let c = model.predict(&features(1.0, -3.0), 24).unwrap();
        assert_eq!(c.water_level, Some(0.0));
        assert_eq!(c.flood_risk, 0.0);
    }

    #[test]
    fn test_stage_threshold_has_no_level() {
        let model = StageThresholdModel::new();
        let c = model.predict(&features(16.0, 0.0), 6).unwrap();
        assert!(c.water_level.is_none());
        // 0.75 * 0.50 + 0.25 * 0.2
        assert!((c.flood_risk - 0.425).abs() < 1e-9);
        assert_eq!(c.confidence, 0.75);
    }

    #[test]
    fn test_stage_threshold_malformed_stages_lower_confidence() {
        let model = StageThresholdModel::new();
        let mut f = features(10.0, 0.0);
        f.stages = FloodStages::new(10.0, 10.0, 10.0, 10.0);
        let c = model.predict(&f, 1).unwrap();
        assert_eq!(c.confidence, 0.3);
        assert!(c.flood_risk >= 0.0 && c.flood_risk <= 1.0);
    }

    #[test]
    fn test_weather_neutral_has_low_confidence() {
        let model = WeatherCorrelationModel::new();
        let c = model.predict(&features(10.0, 0.0), 12).unwrap();
        assert!((c.confidence - 0.15).abs() < 1e-9);
        assert_eq!(c.water_level, Some(10.0));
    }

    #[test]
    fn test_weather_wet_anomaly_raises_risk() {
        let model = WeatherCorrelationModel::new();
        let dry = model.predict(&features(10.0, 0.0), 12).unwrap();
        let mut f = features(10.0, 0.0);
        f.weather = observed(3.0, 0.9);
        let wet = model.predict(&f, 12).unwrap();
        assert!(wet.flood_risk > dry.flood_risk);
        assert!(wet.confidence > dry.confidence);
    }

    #[test]
    fn test_outputs_always_clamped() {
        let models: Vec<Box<dyn FloodModel>> = vec![
            Box::new(TrendExtrapolationModel::new()),
            Box::new(StageThresholdModel::new()),
            Box::new(WeatherCorrelationModel::new()),
        ];
        let mut f = features(45.0, 4.0);
        f.weather = observed(5.0, 1.0);
        f.level_volatility = 10.0;
        for model in &models {
            for horizon in [1, 3, 6, 12, 24, 72] {
                let c = model.predict(&f, horizon).unwrap();
                assert!((0.0..=1.0).contains(&c.flood_risk), "{}", model.id());
                assert!((0.0..=1.0).contains(&c.confidence), "{}", model.id());
            }
        }
    }

    #[test]
    fn test_non_finite_feature_is_a_fault() {
        let model = TrendExtrapolationModel::new();
        let f = features(f64::NAN, 0.0);
        assert!(model.predict(&f, 1).is_err());
    }
}
