//! Core data models for the flood forecast engine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Baseline risk classification of a flood zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Extreme,
}

impl RiskLevel {
    /// Prior flood risk implied by the zone classification
    pub fn baseline_risk(&self) -> f64 {
        match self {
            RiskLevel::Low => 0.1,
            RiskLevel::Moderate => 0.2,
            RiskLevel::High => 0.4,
            RiskLevel::Extreme => 0.7,
        }
    }
}

/// NWS-style flood stage levels for a zone, in feet
///
/// Levels are ascending: action < minor < moderate < major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloodStages {
    pub action: f64,
    pub minor: f64,
    pub moderate: f64,
    pub major: f64,
}

impl FloodStages {
    pub fn new(action: f64, minor: f64, moderate: f64, major: f64) -> Self {
        Self {
            action,
            minor,
            moderate,
            major,
        }
    }

    /// True when every level is finite, positive and strictly ascending
    pub fn is_well_formed(&self) -> bool {
        let levels = [self.action, self.minor, self.moderate, self.major];
        levels.iter().all(|l| l.is_finite() && *l > 0.0)
            && levels.windows(2).all(|pair| pair[0] < pair[1])
    }

    /// Map a water level onto flood risk.
    ///
    /// Each stage band maps onto the matching severity band, so a level at
    /// the minor stage yields 0.30 and a level at the major stage yields 0.70.
    /// Above major, risk approaches 1.0 one moderate-to-major span later.
    pub fn stage_risk(&self, level: f64) -> f64 {
        if !level.is_finite() || level <= 0.0 {
            return 0.0;
        }
        let risk = if level < self.action {
            interpolate(level, 0.0, self.action, 0.0, 0.15)
        } else if level < self.minor {
            interpolate(level, self.action, self.minor, 0.15, 0.30)
        } else if level < self.moderate {
            interpolate(level, self.minor, self.moderate, 0.30, 0.50)
        } else if level < self.major {
            interpolate(level, self.moderate, self.major, 0.50, 0.70)
        } else {
            let span = self.major - self.moderate;
            interpolate(level, self.major, self.major + span, 0.70, 1.0)
        };
        risk.clamp(0.0, 1.0)
    }
}

fn interpolate(value: f64, lo: f64, hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let span = (hi - lo).max(f64::EPSILON);
    let t = ((value - lo) / span).clamp(0.0, 1.0);
    out_lo + t * (out_hi - out_lo)
}

/// Monitored geographic area aggregating one or more gauge stations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodZone {
    pub id: String,
    pub name: String,
    pub state: String,
    #[serde(default)]
    pub county: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub population: Option<u64>,
    pub risk_level: RiskLevel,
    pub flood_stages: FloodStages,
}

/// One timestamped sample from a gauge station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeReading {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    /// Water level in feet
    pub water_level: f64,
    /// Discharge in cubic feet per second
    #[serde(default)]
    pub discharge: Option<f64>,
    /// Water temperature in degrees Celsius
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub gage_height: Option<f64>,
    #[serde(default)]
    pub velocity: Option<f64>,
}

/// Externally supplied weather signal for a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSignal {
    pub observed_at: DateTime<Utc>,
    /// Standardised precipitation anomaly; 0 is climatological normal
    pub precipitation_anomaly: f64,
    #[serde(default)]
    pub precipitation_mm: Option<f64>,
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub wind_speed_kmh: Option<f64>,
    /// Reliability of the signal in [0, 1]
    pub reliability: f64,
}

/// Where the weather factors of a feature vector came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherSource {
    Observed,
    /// Neutral baseline used when no signal is available
    Default,
}

/// Weather-derived model inputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherFactors {
    pub precipitation_anomaly: f64,
    pub reliability: f64,
    pub source: WeatherSource,
}

/// Largest anomaly magnitude the models accept, in standard deviations
const MAX_PRECIPITATION_ANOMALY: f64 = 5.0;

impl WeatherFactors {
    /// Zero anomaly with zero reliability
    pub fn neutral() -> Self {
        Self {
            precipitation_anomaly: 0.0,
            reliability: 0.0,
            source: WeatherSource::Default,
        }
    }

    pub fn from_signal(signal: &WeatherSignal) -> Self {
        if !signal.precipitation_anomaly.is_finite() || !signal.reliability.is_finite() {
            return Self::neutral();
        }
        Self {
            precipitation_anomaly: signal
                .precipitation_anomaly
                .clamp(-MAX_PRECIPITATION_ANOMALY, MAX_PRECIPITATION_ANOMALY),
            reliability: signal.reliability.clamp(0.0, 1.0),
            source: WeatherSource::Observed,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.source == WeatherSource::Default
    }
}

/// Per-horizon model input derived from a reading window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub horizon_hours: u32,
    /// Latest aggregated water level in feet
    pub current_level: f64,
    /// Short-window level slope in feet per hour
    pub level_trend: f64,
    pub level_mean: f64,
    pub level_volatility: f64,
    pub discharge: Option<f64>,
    pub temperature: Option<f64>,
    /// Calendar position in [0, 1], peaking in the spring flood season
    pub seasonal_index: f64,
    pub weather: WeatherFactors,
    pub stages: FloodStages,
    pub baseline_risk: f64,
    pub readings_used: usize,
    /// Share of the expected reading window that was present, in (0, 1]
    pub window_fill: f64,
}

impl FeatureVector {
    pub fn window_full(&self) -> bool {
        self.window_fill >= 1.0
    }
}

/// One model's output for one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelContribution {
    pub model_id: String,
    pub horizon_hours: u32,
    pub flood_risk: f64,
    /// None when the model does not predict a level
    pub water_level: Option<f64>,
    pub confidence: f64,
}

impl ModelContribution {
    /// Build a contribution with risk and confidence clamped into [0, 1]
    pub fn clamped(
        model_id: impl Into<String>,
        horizon_hours: u32,
        flood_risk: f64,
        water_level: Option<f64>,
        confidence: f64,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            horizon_hours,
            flood_risk: clamp_unit(flood_risk),
            water_level: water_level.filter(|l| l.is_finite()).map(|l| l.max(0.0)),
            confidence: clamp_unit(confidence),
        }
    }
}

/// Clamp into [0, 1], mapping non-finite values to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Per-zone model weights used by the ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub weights: BTreeMap<String, f64>,
    /// Incremented on every committed retrain
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl EnsembleWeights {
    /// Equal weight for every model
    pub fn uniform<I, S>(model_ids: I, updated_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = model_ids.into_iter().map(Into::into).collect();
        let share = if ids.is_empty() {
            0.0
        } else {
            1.0 / ids.len() as f64
        };
        Self {
            weights: ids.into_iter().map(|id| (id, share)).collect(),
            version: 0,
            updated_at,
        }
    }

    /// Normalise raw weights to sum to 1. Returns None when the raw weights
    /// are empty, negative, non-finite or sum to zero.
    pub fn normalized(
        raw: BTreeMap<String, f64>,
        version: u64,
        updated_at: DateTime<Utc>,
    ) -> Option<Self> {
        if raw.values().any(|w| !w.is_finite() || *w < 0.0) {
            return None;
        }
        let total: f64 = raw.values().sum();
        if total <= 0.0 {
            return None;
        }
        Some(Self {
            weights: raw.into_iter().map(|(id, w)| (id, w / total)).collect(),
            version,
            updated_at,
        })
    }

    /// Weight for a model; models without an entry weigh nothing
    pub fn weight(&self, model_id: &str) -> f64 {
        self.weights.get(model_id).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn is_normalized(&self, tolerance: f64) -> bool {
        (self.total() - 1.0).abs() <= tolerance
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }
}

/// Discretised flood risk band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Severe,
    Extreme,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Moderate => write!(f, "MODERATE"),
            Severity::High => write!(f, "HIGH"),
            Severity::Severe => write!(f, "SEVERE"),
            Severity::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// Lower bounds of each severity band above LOW
///
/// A risk equal to a bound belongs to the higher band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub moderate: f64,
    pub high: f64,
    pub severe: f64,
    pub extreme: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            moderate: 0.15,
            high: 0.30,
            severe: 0.50,
            extreme: 0.70,
        }
    }
}

impl SeverityThresholds {
    pub fn classify(&self, flood_risk: f64) -> Severity {
        if flood_risk >= self.extreme {
            Severity::Extreme
        } else if flood_risk >= self.severe {
            Severity::Severe
        } else if flood_risk >= self.high {
            Severity::High
        } else if flood_risk >= self.moderate {
            Severity::Moderate
        } else {
            Severity::Low
        }
    }
}

/// Coarse completeness grade of the inputs behind a forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataQuality {
    Low,
    Moderate,
    High,
}

impl DataQuality {
    /// Drop `levels` grades, bottoming out at LOW
    pub fn degrade(self, levels: usize) -> Self {
        let rank = match self {
            DataQuality::High => 2usize,
            DataQuality::Moderate => 1,
            DataQuality::Low => 0,
        };
        match rank.saturating_sub(levels) {
            2 => DataQuality::High,
            1 => DataQuality::Moderate,
            _ => DataQuality::Low,
        }
    }
}

impl std::fmt::Display for DataQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataQuality::Low => write!(f, "LOW"),
            DataQuality::Moderate => write!(f, "MODERATE"),
            DataQuality::High => write!(f, "HIGH"),
        }
    }
}

/// Consensus forecast for a single horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonForecast {
    pub time_horizon: u32,
    pub flood_risk: f64,
    pub severity: Severity,
    pub confidence: f64,
    pub water_level: Option<f64>,
}

/// Result of one predict cycle for a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub flood_zone_id: String,
    pub generated_at: DateTime<Utc>,
    pub model_version: String,
    /// Ordered by strictly increasing horizon
    pub per_horizon: Vec<HorizonForecast>,
    pub ensemble_weights: EnsembleWeights,
    pub data_quality: DataQuality,
    pub model_contributions: Vec<ModelContribution>,
    pub weather_factors: WeatherFactors,
    pub readings_used: usize,
}

impl EnsemblePrediction {
    /// One storage record per horizon
    pub fn to_stored(&self) -> Vec<StoredPrediction> {
        self.per_horizon
            .iter()
            .map(|forecast| StoredPrediction::from_forecast(self, forecast))
            .collect()
    }

    /// Model ids that produced at least one contribution
    pub fn contributing_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .model_contributions
            .iter()
            .map(|c| c.model_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Persisted forecast for one horizon, keyed by (zone, horizon, generated_at)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrediction {
    pub flood_zone_id: String,
    pub time_horizon: u32,
    pub generated_at: DateTime<Utc>,
    pub valid_for: DateTime<Utc>,
    pub flood_risk: f64,
    pub severity: Severity,
    pub confidence: f64,
    pub water_level: Option<f64>,
    pub model_version: String,
    pub data_quality: DataQuality,
    pub ensemble_weights: BTreeMap<String, f64>,
}

/// Storage key of a stored prediction
pub type PredictionKey = (String, u32, DateTime<Utc>);

impl StoredPrediction {
    pub fn from_forecast(prediction: &EnsemblePrediction, forecast: &HorizonForecast) -> Self {
        Self {
            flood_zone_id: prediction.flood_zone_id.clone(),
            time_horizon: forecast.time_horizon,
            generated_at: prediction.generated_at,
            valid_for: prediction
                .generated_at
                .checked_add_signed(Duration::hours(i64::from(forecast.time_horizon)))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            flood_risk: forecast.flood_risk,
            severity: forecast.severity,
            confidence: forecast.confidence,
            water_level: forecast.water_level,
            model_version: prediction.model_version.clone(),
            data_quality: prediction.data_quality,
            ensemble_weights: prediction.ensemble_weights.weights.clone(),
        }
    }

    pub fn key(&self) -> PredictionKey {
        (self.flood_zone_id.clone(), self.time_horizon, self.generated_at)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_for >= now
    }
}

/// A past model prediction paired with what was later observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalOutcome {
    pub model_id: String,
    pub predicted_at: DateTime<Utc>,
    pub horizon_hours: u32,
    pub predicted_risk: f64,
    pub observed_risk: f64,
}

impl HistoricalOutcome {
    pub fn absolute_error(&self) -> Option<f64> {
        let error = (self.predicted_risk - self.observed_risk).abs();
        error.is_finite().then_some(error)
    }
}
