//! Acceptance checks run before a prediction is persisted

use crate::config::{ValidationConfig, MAX_HORIZON_HOURS};
use crate::models::{DataQuality, EnsemblePrediction};
use std::fmt;

/// Why a prediction was not accepted
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    NoHorizons,
    HorizonsNotAscending,
    NonPositiveHorizon,
    HorizonTooLong { horizon: u32 },
    NonFiniteValue { field: &'static str },
    OutOfRange { field: &'static str, horizon: u32 },
    QualityBelowMinimum {
        actual: DataQuality,
        required: DataQuality,
    },
    ConfidenceIncreases { horizon: u32 },
    WeightsNotNormalized { total: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoHorizons => write!(f, "prediction has no horizons"),
            Rejection::HorizonsNotAscending => write!(f, "horizons are not strictly increasing"),
            Rejection::NonPositiveHorizon => write!(f, "horizon must be positive"),
            Rejection::HorizonTooLong { horizon } => {
                write!(f, "horizon {}h exceeds {}h", horizon, MAX_HORIZON_HOURS)
            }
            Rejection::NonFiniteValue { field } => write!(f, "{} is not finite", field),
            Rejection::OutOfRange { field, horizon } => {
                write!(f, "{} out of [0, 1] at horizon {}h", field, horizon)
            }
            Rejection::QualityBelowMinimum { actual, required } => {
                write!(f, "data quality {} below required {}", actual, required)
            }
            Rejection::ConfidenceIncreases { horizon } => {
                write!(f, "confidence increases at horizon {}h", horizon)
            }
            Rejection::WeightsNotNormalized { total } => {
                write!(f, "ensemble weights sum to {:.6}", total)
            }
        }
    }
}

/// Pure acceptance predicate over an ensemble prediction
#[derive(Debug, Clone, Default)]
pub struct QualityValidator {
    config: ValidationConfig,
}

impl QualityValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, prediction: &EnsemblePrediction) -> bool {
        self.rejection(prediction).is_none()
    }

    /// First failed check, or None when the prediction is acceptable
    pub fn rejection(&self, prediction: &EnsemblePrediction) -> Option<Rejection> {
        let horizons = &prediction.per_horizon;
        if horizons.is_empty() {
            return Some(Rejection::NoHorizons);
        }
        if horizons.iter().any(|f| f.time_horizon == 0) {
            return Some(Rejection::NonPositiveHorizon);
        }
        if let Some(forecast) = horizons
            .iter()
            .find(|f| f.time_horizon > MAX_HORIZON_HOURS)
        {
            return Some(Rejection::HorizonTooLong {
                horizon: forecast.time_horizon,
            });
        }
        if horizons
            .windows(2)
            .any(|pair| pair[0].time_horizon >= pair[1].time_horizon)
        {
            return Some(Rejection::HorizonsNotAscending);
        }

        for forecast in horizons {
            if !forecast.flood_risk.is_finite() {
                return Some(Rejection::NonFiniteValue { field: "flood_risk" });
            }
            if !forecast.confidence.is_finite() {
                return Some(Rejection::NonFiniteValue { field: "confidence" });
            }
            if forecast.water_level.is_some_and(|l| !l.is_finite()) {
                return Some(Rejection::NonFiniteValue { field: "water_level" });
            }
            if !(0.0..=1.0).contains(&forecast.flood_risk) {
                return Some(Rejection::OutOfRange {
                    field: "flood_risk",
                    horizon: forecast.time_horizon,
                });
            }
            if !(0.0..=1.0).contains(&forecast.confidence) {
                return Some(Rejection::OutOfRange {
                    field: "confidence",
                    horizon: forecast.time_horizon,
                });
            }
        }

        for contribution in &prediction.model_contributions {
            let values = [contribution.flood_risk, contribution.confidence];
            if values.iter().any(|v| !v.is_finite())
                || contribution.water_level.is_some_and(|l| !l.is_finite())
            {
                return Some(Rejection::NonFiniteValue {
                    field: "model_contributions",
                });
            }
        }
        if prediction
            .ensemble_weights
            .weights
            .values()
            .any(|w| !w.is_finite())
        {
            return Some(Rejection::NonFiniteValue {
                field: "ensemble_weights",
            });
        }

        let required = self.config.min_quality_for(&prediction.flood_zone_id);
        if prediction.data_quality < required {
            return Some(Rejection::QualityBelowMinimum {
                actual: prediction.data_quality,
                required,
            });
        }

        if self.config.strict {
            if let Some(pair) = horizons
                .windows(2)
                .find(|pair| pair[1].confidence > pair[0].confidence)
            {
                return Some(Rejection::ConfidenceIncreases {
                    horizon: pair[1].time_horizon,
                });
            }
            if !prediction
                .ensemble_weights
                .is_normalized(self.config.weight_tolerance)
            {
                return Some(Rejection::WeightsNotNormalized {
                    total: prediction.ensemble_weights.total(),
                });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        EnsembleWeights, HorizonForecast, ModelContribution, Severity, WeatherFactors,
    };
    use chrono::Utc;
    use std::collections::HashMap;

    fn forecast(h: u32, risk: f64, confidence: f64) -> HorizonForecast {
        HorizonForecast {
            time_horizon: h,
            flood_risk: risk,
            severity: Severity::Low,
            confidence,
            water_level: Some(9.0),
        }
    }

    fn prediction() -> EnsemblePrediction {
        let now = Utc::now();
        EnsemblePrediction {
            flood_zone_id: "zone-1".to_string(),
            generated_at: now,
            model_version: "ensemble-v0".to_string(),
            per_horizon: vec![forecast(1, 0.1, 0.9), forecast(3, 0.12, 0.85)],
            ensemble_weights: EnsembleWeights::uniform(["a", "b"], now),
            data_quality: DataQuality::High,
            model_contributions: vec![ModelContribution::clamped("a", 1, 0.1, None, 0.9)],
            weather_factors: WeatherFactors::neutral(),
            readings_used: 48,
        }
    }

    #[test]
    fn test_accepts_well_formed_prediction() {
        let validator = QualityValidator::default();
        assert!(validator.validate(&prediction()));
    }

    #[test]
    fn test_rejects_non_finite_risk() {
        let validator = QualityValidator::default();
        let mut p = prediction();
        p.per_horizon[1].flood_risk = f64::NAN;
        assert_eq!(
            validator.rejection(&p),
            Some(Rejection::NonFiniteValue { field: "flood_risk" })
        );
    }

    #[test]
    fn test_rejects_out_of_range_confidence() {
        let validator = QualityValidator::default();
        let mut p = prediction();
        p.per_horizon[0].confidence = 1.2;
        assert!(!validator.validate(&p));
    }

    #[test]
    fn test_rejects_unordered_horizons() {
        let validator = QualityValidator::default();
        let mut p = prediction();
        p.per_horizon.reverse();
        assert_eq!(validator.rejection(&p), Some(Rejection::HorizonsNotAscending));

        let mut p = prediction();
        p.per_horizon[1].time_horizon = 1;
        assert_eq!(validator.rejection(&p), Some(Rejection::HorizonsNotAscending));
    }

    #[test]
    fn test_rejects_horizon_beyond_a_year() {
        let validator = QualityValidator::default();
        let mut p = prediction();
        p.per_horizon[1].time_horizon = u32::MAX;
        assert_eq!(
            validator.rejection(&p),
            Some(Rejection::HorizonTooLong { horizon: u32::MAX })
        );

        p.per_horizon[1].time_horizon = MAX_HORIZON_HOURS;
        assert!(validator.validate(&p));
    }

    #[test]
    fn test_rejects_empty_prediction() {
        let validator = QualityValidator::default();
        let mut p = prediction();
        p.per_horizon.clear();
        assert_eq!(validator.rejection(&p), Some(Rejection::NoHorizons));
    }

    #[test]
    fn test_quality_threshold_per_zone() {
        let mut p = prediction();
        p.data_quality = DataQuality::Moderate;
        assert!(QualityValidator::default().validate(&p));

        let mut overrides = HashMap::new();
        overrides.insert("zone-1".to_string(), DataQuality::High);
        let validator = QualityValidator::new(ValidationConfig {
            zone_min_quality: overrides,
            ..Default::default()
        });
        assert_eq!(
            validator.rejection(&p),
            Some(Rejection::QualityBelowMinimum {
                actual: DataQuality::Moderate,
                required: DataQuality::High,
            })
        );

        p.data_quality = DataQuality::Low;
        assert!(!QualityValidator::default().validate(&p));
    }

    #[test]
    fn test_strict_mode_checks_decay_and_weights() {
        let strict = QualityValidator::new(ValidationConfig {
            strict: true,
            ..Default::default()
        });
        let mut p = prediction();
        p.per_horizon[1].confidence = 0.95;
        assert!(QualityValidator::default().validate(&p));
        assert_eq!(
            strict.rejection(&p),
            Some(Rejection::ConfidenceIncreases { horizon: 3 })
        );

        let mut p = prediction();
        p.ensemble_weights.weights.insert("c".to_string(), 0.5);
        assert!(matches!(
            strict.rejection(&p),
            Some(Rejection::WeightsNotNormalized { .. })
        ));
    }
}
