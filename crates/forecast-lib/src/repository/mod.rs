//! Data access boundary of the engine
//!
//! The engine never talks to a database directly. Everything it reads or
//! writes goes through [`FloodRepository`].

mod memory;

pub use memory::{InMemoryRepository, RepositorySnapshot};

use crate::alerts::AlertRule;
use crate::models::{FloodZone, GaugeReading, HistoricalOutcome, StoredPrediction, WeatherSignal};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait FloodRepository: Send + Sync {
    /// Zone reference data, or None for an unknown zone
    async fn zone(&self, zone_id: &str) -> Result<Option<FloodZone>>;

    async fn zones(&self) -> Result<Vec<FloodZone>>;

    /// Readings of the zone's stations taken within the last `window_hours`
    async fn recent_readings(&self, zone_id: &str, window_hours: u32) -> Result<Vec<GaugeReading>>;

    async fn weather_signal(&self, zone_id: &str) -> Result<Option<WeatherSignal>>;

    async fn historical_outcomes(&self, zone_id: &str) -> Result<Vec<HistoricalOutcome>>;

    /// Persist one generation's records as a unit.
    ///
    /// Expired records of the same zone may be purged first. Writing a record
    /// whose key already exists with identical values is a no-op; a key that
    /// exists with different values fails the whole batch.
    async fn save_predictions(&self, records: &[StoredPrediction]) -> Result<()>;

    /// The most recently generated still-valid record per horizon, ascending
    async fn latest_valid_predictions(
        &self,
        zone_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredPrediction>>;

    async fn alert_rules(&self, _zone_id: &str) -> Result<Vec<AlertRule>> {
        Ok(Vec::new())
    }
}
