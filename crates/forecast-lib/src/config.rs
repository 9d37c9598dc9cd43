//! Engine configuration
//!
//! Every tunable numeric constant of the engine lives here with a default.
//! All structs deserialize with missing fields filled from `Default`, so a
//! service config only needs to name the values it overrides.

use crate::models::{DataQuality, SeverityThresholds};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default forecast horizons in hours
pub const DEFAULT_HORIZONS: [u32; 5] = [1, 3, 6, 12, 24];

/// Longest accepted forecast horizon, one year in hours
pub const MAX_HORIZON_HOURS: u32 = 8760;

/// Reading window and feature derivation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Minimum distinct readings required to build features
    pub min_readings: usize,
    /// Length of the reading window in hours
    pub window_hours: u32,
    /// Number of most recent aggregated samples used for the trend
    pub trend_samples: usize,
    /// Expected reporting interval of one station
    pub expected_interval_minutes: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_readings: 24,
            window_hours: 48,
            trend_samples: 12,
            expected_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Confidence lost per horizon hour
    pub confidence_decay_rate: f64,
    /// Smallest decay multiplier applied to confidence
    pub confidence_decay_floor: f64,
    pub severity: SeverityThresholds,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            confidence_decay_rate: 0.02,
            confidence_decay_floor: 0.6,
            severity: SeverityThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Lowest data quality accepted when a zone has no override
    pub min_quality: DataQuality,
    /// Per-zone minimum data quality
    pub zone_min_quality: HashMap<String, DataQuality>,
    /// Also require decaying confidence and normalised weights
    pub strict: bool,
    /// Allowed deviation of the weight sum from 1 in strict mode
    pub weight_tolerance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_quality: DataQuality::Moderate,
            zone_min_quality: HashMap::new(),
            strict: false,
            weight_tolerance: 1e-6,
        }
    }
}

impl ValidationConfig {
    pub fn min_quality_for(&self, zone_id: &str) -> DataQuality {
        self.zone_min_quality
            .get(zone_id)
            .copied()
            .unwrap_or(self.min_quality)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainConfig {
    /// Outcomes each registered model needs before weights are recomputed
    pub min_outcomes_per_model: usize,
    /// Only outcomes predicted within this many hours are scored
    pub lookback_hours: u32,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            min_outcomes_per_model: 10,
            lookback_hours: 30 * 24,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub horizons: Vec<u32>,
    pub feature: FeatureConfig,
    pub ensemble: EnsembleConfig,
    pub validation: ValidationConfig,
    pub retrain: RetrainConfig,
    /// Upper bound on any single repository call
    pub fetch_timeout_ms: u64,
    /// A generation younger than this is reused instead of recomputed
    pub reuse_window_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizons: DEFAULT_HORIZONS.to_vec(),
            feature: FeatureConfig::default(),
            ensemble: EnsembleConfig::default(),
            validation: ValidationConfig::default(),
            retrain: RetrainConfig::default(),
            fetch_timeout_ms: 5_000,
            reuse_window_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Horizons in `1..=MAX_HORIZON_HOURS`, ascending, without duplicates
    pub fn normalized_horizons(&self) -> Vec<u32> {
        let mut horizons: Vec<u32> = self
            .horizons
            .iter()
            .copied()
            .filter(|h| (1..=MAX_HORIZON_HOURS).contains(h))
            .collect();
        horizons.sort_unstable();
        horizons.dedup();
        if horizons.is_empty() {
            DEFAULT_HORIZONS.to_vec()
        } else {
            horizons
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn reuse_window(&self) -> Duration {
        Duration::from_secs(self.reuse_window_secs)
    }
}
