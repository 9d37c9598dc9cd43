//! In-process repository backed by maps, loadable from a JSON snapshot

use super::FloodRepository;
use crate::alerts::AlertRule;
use crate::models::{
    FloodZone, GaugeReading, HistoricalOutcome, PredictionKey, StoredPrediction, WeatherSignal,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

/// Serializable contents of an [`InMemoryRepository`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySnapshot {
    pub zones: Vec<FloodZone>,
    /// Readings keyed by zone id
    pub readings: HashMap<String, Vec<GaugeReading>>,
    pub weather: HashMap<String, WeatherSignal>,
    pub outcomes: HashMap<String, Vec<HistoricalOutcome>>,
    pub alert_rules: Vec<AlertRule>,
    pub predictions: Vec<StoredPrediction>,
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    zones: RwLock<HashMap<String, FloodZone>>,
    readings: RwLock<HashMap<String, Vec<GaugeReading>>>,
    weather: RwLock<HashMap<String, WeatherSignal>>,
    outcomes: RwLock<HashMap<String, Vec<HistoricalOutcome>>>,
    alert_rules: RwLock<Vec<AlertRule>>,
    predictions: RwLock<BTreeMap<PredictionKey, StoredPrediction>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: RepositorySnapshot) -> Self {
        Self {
            zones: RwLock::new(
                snapshot
                    .zones
                    .into_iter()
                    .map(|z| (z.id.clone(), z))
                    .collect(),
            ),
            readings: RwLock::new(snapshot.readings),
            weather: RwLock::new(snapshot.weather),
            outcomes: RwLock::new(snapshot.outcomes),
            alert_rules: RwLock::new(snapshot.alert_rules),
            predictions: RwLock::new(
                snapshot
                    .predictions
                    .into_iter()
                    .map(|p| (p.key(), p))
                    .collect(),
            ),
        }
    }

    /// Load a JSON snapshot from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: RepositorySnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub async fn insert_zone(&self, zone: FloodZone) {
        self.zones.write().await.insert(zone.id.clone(), zone);
    }

    pub async fn insert_readings(&self, zone_id: &str, readings: Vec<GaugeReading>) {
        self.readings
            .write()
            .await
            .entry(zone_id.to_string())
            .or_default()
            .extend(readings);
    }

    pub async fn set_weather(&self, zone_id: &str, signal: WeatherSignal) {
        self.weather.write().await.insert(zone_id.to_string(), signal);
    }

    pub async fn insert_outcomes(&self, zone_id: &str, outcomes: Vec<HistoricalOutcome>) {
        self.outcomes
            .write()
            .await
            .entry(zone_id.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub async fn insert_alert_rule(&self, rule: AlertRule) {
        self.alert_rules.write().await.push(rule);
    }

    /// Every stored prediction, ordered by key
    pub async fn all_predictions(&self) -> Vec<StoredPrediction> {
        self.predictions.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl FloodRepository for InMemoryRepository {
    async fn zone(&self, zone_id: &str) -> Result<Option<FloodZone>> {
        Ok(self.zones.read().await.get(zone_id).cloned())
    }

    async fn zones(&self) -> Result<Vec<FloodZone>> {
        let mut zones: Vec<FloodZone> = self.zones.read().await.values().cloned().collect();
        zones.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(zones)
    }

    async fn recent_readings(&self, zone_id: &str, window_hours: u32) -> Result<Vec<GaugeReading>> {
        let cutoff = Utc::now() - Duration::hours(i64::from(window_hours));
        let readings = self.readings.read().await;
        let mut recent: Vec<GaugeReading> = readings
            .get(zone_id)
            .map(|rs| rs.iter().filter(|r| r.timestamp >= cutoff).cloned().collect())
            .unwrap_or_default();
        recent.sort_by_key(|r| r.timestamp);
        Ok(recent)
    }

    async fn weather_signal(&self, zone_id: &str) -> Result<Option<WeatherSignal>> {
        Ok(self.weather.read().await.get(zone_id).cloned())
    }

    async fn historical_outcomes(&self, zone_id: &str) -> Result<Vec<HistoricalOutcome>> {
        Ok(self
            .outcomes
            .read()
            .await
            .get(zone_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_predictions(&self, records: &[StoredPrediction]) -> Result<()> {
        let now = Utc::now();
        let mut predictions = self.predictions.write().await;

        for record in records {
            if let Some(existing) = predictions.get(&record.key()) {
                if existing != record {
                    bail!(
                        "conflicting prediction for zone {} horizon {}h generated at {}",
                        record.flood_zone_id,
                        record.time_horizon,
                        record.generated_at
                    );
                }
            }
        }

        let before = predictions.len();
        predictions.retain(|(zone_id, _, _), stored| {
            !records.iter().any(|r| &r.flood_zone_id == zone_id) || stored.is_valid_at(now)
        });
        let purged = before - predictions.len();
        if purged > 0 {
            debug!(purged = purged, "Purged expired predictions");
        }

        for record in records {
            predictions.insert(record.key(), record.clone());
        }
        Ok(())
    }

    async fn latest_valid_predictions(
        &self,
        zone_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredPrediction>> {
        let predictions = self.predictions.read().await;
        let mut latest: BTreeMap<u32, &StoredPrediction> = BTreeMap::new();
        for record in predictions
            .values()
            .filter(|p| p.flood_zone_id == zone_id && p.is_valid_at(now))
        {
            match latest.get(&record.time_horizon) {
                Some(current) if current.generated_at >= record.generated_at => {}
                _ => {
                    latest.insert(record.time_horizon, record);
                }
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn alert_rules(&self, zone_id: &str) -> Result<Vec<AlertRule>> {
        Ok(self
            .alert_rules
            .read()
            .await
            .iter()
            .filter(|r| r.flood_zone_id == zone_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataQuality, FloodStages, RiskLevel, Severity};
    use std::io::Write;

    fn record(zone: &str, horizon: u32, generated_at: DateTime<Utc>, risk: f64) -> StoredPrediction {
        StoredPrediction {
            flood_zone_id: zone.to_string(),
            time_horizon: horizon,
            generated_at,
            valid_for: generated_at + Duration::hours(i64::from(horizon)),
            flood_risk: risk,
            severity: Severity::Low,
            confidence: 0.8,
            water_level: None,
            model_version: "ensemble-v0".to_string(),
            data_quality: DataQuality::High,
            ensemble_weights: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_identical_save_is_idempotent() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let records = vec![record("z1", 1, now, 0.1), record("z1", 3, now, 0.2)];
        repo.save_predictions(&records).await.unwrap();
        repo.save_predictions(&records).await.unwrap();
        assert_eq!(repo.all_predictions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_conflicting_save_rejected_atomically() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        repo.save_predictions(&[record("z1", 1, now, 0.1)]).await.unwrap();

        let later = now + Duration::seconds(1);
        let conflicting = vec![record("z1", 3, later, 0.3), record("z1", 1, now, 0.9)];
        assert!(repo.save_predictions(&conflicting).await.is_err());

        let stored = repo.all_predictions().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].flood_risk, 0.1);
    }

    #[tokio::test]
    async fn test_expired_records_purged_on_save() {
        let repo = InMemoryRepository::new();
        let old = Utc::now() - Duration::hours(5);
        repo.save_predictions(&[record("z1", 1, old, 0.1), record("z2", 1, old, 0.1)])
            .await
            .unwrap();
        repo.save_predictions(&[record("z1", 6, Utc::now(), 0.2)])
            .await
            .unwrap();

        let stored = repo.all_predictions().await;
        // z1's expired record is gone, z2 is untouched
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|p| p.flood_zone_id == "z2"));
        assert!(stored.iter().all(|p| p.flood_zone_id != "z1" || p.time_horizon == 6));
    }

    #[tokio::test]
    async fn test_latest_valid_per_horizon() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let earlier = now - Duration::minutes(30);
        repo.save_predictions(&[record("z1", 3, earlier, 0.1), record("z1", 6, earlier, 0.1)])
            .await
            .unwrap();
        repo.save_predictions(&[record("z1", 3, now, 0.4)]).await.unwrap();

        let latest = repo.latest_valid_predictions("z1", now).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].time_horizon, 3);
        assert_eq!(latest[0].flood_risk, 0.4);
        assert_eq!(latest[1].time_horizon, 6);

        let far_future = now + Duration::hours(12);
        assert!(repo
            .latest_valid_predictions("z1", far_future)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_recent_readings_window() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let reading = |hours_ago: i64| GaugeReading {
            station_id: "s1".to_string(),
            timestamp: now - Duration::hours(hours_ago),
            water_level: 5.0,
            discharge: None,
            temperature: None,
            gage_height: None,
            velocity: None,
        };
        repo.insert_readings("z1", vec![reading(1), reading(60), reading(2)])
            .await;
        let recent = repo.recent_readings("z1", 48).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp < recent[1].timestamp);
        assert!(repo.recent_readings("missing", 48).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_snapshot_from_file() {
        let zone = FloodZone {
            id: "z1".to_string(),
            name: "Upper Creek".to_string(),
            state: "OK".to_string(),
            county: Some("Tulsa".to_string()),
            latitude: 36.1,
            longitude: -95.9,
            population: None,
            risk_level: RiskLevel::Moderate,
            flood_stages: FloodStages::new(8.0, 12.0, 16.0, 20.0),
        };
        let snapshot = RepositorySnapshot {
            zones: vec![zone],
            ..Default::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&snapshot).unwrap()).unwrap();

        let repo = InMemoryRepository::load(file.path()).unwrap();
        let loaded = repo.zone("z1").await.unwrap().unwrap();
        assert_eq!(loaded.risk_level, RiskLevel::Moderate);
        assert!(repo.zone("z2").await.unwrap().is_none());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(InMemoryRepository::load("/nonexistent/snapshot.json").is_err());
    }
}
