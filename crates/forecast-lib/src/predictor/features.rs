//! Feature derivation for flood models
//!
//! Turns a zone's recent gauge readings plus an optional weather signal into
//! one feature vector per forecast horizon. Readings from all stations of a
//! zone are averaged per timestamp before the level statistics are taken.

use crate::config::FeatureConfig;
use crate::error::{ForecastError, ForecastResult};
use crate::models::{FeatureVector, FloodZone, GaugeReading, WeatherFactors, WeatherSignal};
use chrono::{DateTime, Datelike, Duration, Utc};
use std::collections::{BTreeMap, HashSet};

/// Day of year at which the seasonal index peaks (mid April snowmelt)
const SEASONAL_PEAK_DAY: f64 = 105.0;

const DAYS_PER_YEAR: f64 = 365.25;

/// Builds feature vectors from a reading window
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Build one feature vector per horizon.
    ///
    /// Readings that are non-finite, in the future, or older than the window
    /// are ignored, and duplicates of the same (station, timestamp) count once.
    /// Fails with `InsufficientData` when fewer than `min_readings` remain.
    pub fn build(
        &self,
        zone: &FloodZone,
        readings: &[GaugeReading],
        weather: Option<&WeatherSignal>,
        horizons: &[u32],
        now: DateTime<Utc>,
    ) -> ForecastResult<Vec<FeatureVector>> {
        let usable = self.usable_readings(readings, now);
        if usable.len() < self.config.min_readings {
            return Err(ForecastError::InsufficientData {
                zone_id: zone.id.clone(),
                available: usable.len(),
                required: self.config.min_readings,
            });
        }

        let series = aggregate_by_timestamp(&usable);
        let levels: Vec<f64> = series.iter().map(|(_, level)| *level).collect();
        let current_level = levels.last().copied().unwrap_or(0.0);
        let level_mean = mean(&levels);
        let level_volatility = std_dev(&levels);
        let level_trend = self.level_trend(&series);

        let discharge = usable.iter().rev().find_map(|r| r.discharge);
        let temperature = usable.iter().rev().find_map(|r| r.temperature);
        let weather = weather
            .map(WeatherFactors::from_signal)
            .unwrap_or_else(WeatherFactors::neutral);
        let seasonal_index = seasonal_index(now);
        let window_fill = self.window_fill(&usable);

        Ok(horizons
            .iter()
            .map(|&horizon_hours| FeatureVector {
                horizon_hours,
                current_level,
                level_trend,
                level_mean,
                level_volatility,
                discharge,
                temperature,
                seasonal_index,
                weather,
                stages: zone.flood_stages,
                baseline_risk: zone.risk_level.baseline_risk(),
                readings_used: usable.len(),
                window_fill,
            })
            .collect())
    }

    /// Filter to the window, drop non-finite levels, dedupe and sort by time
    fn usable_readings(&self, readings: &[GaugeReading], now: DateTime<Utc>) -> Vec<GaugeReading> {
        let cutoff = now - Duration::hours(i64::from(self.config.window_hours));
        let mut usable: Vec<GaugeReading> = readings
            .iter()
            .filter(|r| r.water_level.is_finite())
            .filter(|r| r.timestamp <= now && r.timestamp >= cutoff)
            .cloned()
            .collect();
        usable.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.station_id.cmp(&b.station_id))
        });
        usable.dedup_by(|a, b| a.timestamp == b.timestamp && a.station_id == b.station_id);
        usable
    }

    /// Slope of the most recent samples, in feet per hour
    fn level_trend(&self, series: &[(DateTime<Utc>, f64)]) -> f64 {
        let take = self.config.trend_samples.max(2);
        let recent = &series[series.len().saturating_sub(take)..];
        let Some((origin, _)) = recent.first() else {
            return 0.0;
        };
        let points: Vec<(f64, f64)> = recent
            .iter()
            .map(|(ts, level)| ((*ts - *origin).num_seconds() as f64 / 3600.0, *level))
            .collect();
        linear_regression_slope(&points)
    }

    fn window_fill(&self, usable: &[GaugeReading]) -> f64 {
        let stations: HashSet<&str> = usable.iter().map(|r| r.station_id.as_str()).collect();
        let per_station = f64::from(self.config.window_hours) * 60.0
            / f64::from(self.config.expected_interval_minutes.max(1));
        let expected = per_station * stations.len() as f64;
        if expected <= 0.0 {
            return 0.0;
        }
        (usable.len() as f64 / expected).min(1.0)
    }
}

/// Mean level per timestamp across stations, ascending by time
fn aggregate_by_timestamp(readings: &[GaugeReading]) -> Vec<(DateTime<Utc>, f64)> {
    let mut grouped: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
    for reading in readings {
        let entry = grouped.entry(reading.timestamp).or_insert((0.0, 0));
        entry.0 += reading.water_level;
        entry.1 += 1;
    }
    grouped
        .into_iter()
        .map(|(ts, (sum, count))| (ts, sum / count as f64))
        .collect()
}

/// Position in the flood season, 1.0 at the spring peak and 0.0 six months later
pub fn seasonal_index(now: DateTime<Utc>) -> f64 {
    let day = f64::from(now.ordinal());
    let phase = 2.0 * std::f64::consts::PI * (day - SEASONAL_PEAK_DAY) / DAYS_PER_YEAR;
    (0.5 + 0.5 * phase.cos()).clamp(0.0, 1.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Least-squares slope of (x, y) points
pub fn linear_regression_slope(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_x2: f64 = points.iter().map(|(x, _)| x.powi(2)).sum();
    let denom = n * sum_x2 - sum_x.powi(2);
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}
