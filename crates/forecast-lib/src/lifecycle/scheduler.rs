//! Periodic forecast and retraining loop
//!
//! Every tick generates forecasts for all zones with bounded parallelism.
//! Results are reported on a channel so the service can update health and
//! logs without the scheduler knowing about either.

use super::manager::{FloodForecaster, ForecastSource, GenerationOutcome};
use crate::error::ForecastResult;
use crate::observability::ForecastMetrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default forecast interval (15 minutes)
pub const DEFAULT_FORECAST_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default retraining interval (daily)
pub const DEFAULT_RETRAIN_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub forecast_interval: Duration,
    /// None disables scheduled retraining
    pub retrain_interval: Option<Duration>,
    /// Zones generated concurrently within one cycle
    pub max_concurrent_zones: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            forecast_interval: DEFAULT_FORECAST_INTERVAL,
            retrain_interval: Some(DEFAULT_RETRAIN_INTERVAL),
            max_concurrent_zones: 4,
        }
    }
}

/// Result of one scheduled generation
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub zone_id: String,
    /// None when generation failed without a fallback
    pub source: Option<ForecastSource>,
    pub horizons: usize,
    pub alerts: usize,
    pub failure: Option<String>,
    pub duration_ms: u64,
}

impl GenerationReport {
    fn from_result(
        zone_id: String,
        result: &ForecastResult<GenerationOutcome>,
        elapsed: Duration,
    ) -> Self {
        let duration_ms = elapsed.as_millis() as u64;
        match result {
            Ok(outcome) => Self {
                zone_id,
                source: Some(outcome.source()),
                horizons: outcome.records().len(),
                alerts: outcome.alerts().len(),
                failure: outcome.fallback_reason().map(|e| e.to_string()),
                duration_ms,
            },
            Err(e) => Self {
                zone_id,
                source: None,
                horizons: 0,
                alerts: 0,
                failure: Some(e.to_string()),
                duration_ms,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub zones_last_cycle: usize,
    pub fresh: u64,
    pub fallbacks: u64,
    pub failures: u64,
    pub retrains_committed: u64,
}

pub struct ForecastScheduler {
    forecaster: Arc<FloodForecaster>,
    config: SchedulerConfig,
    report_tx: mpsc::Sender<GenerationReport>,
    stats: RwLock<SchedulerStats>,
    metrics: ForecastMetrics,
}

impl ForecastScheduler {
    pub fn new(
        forecaster: Arc<FloodForecaster>,
        config: SchedulerConfig,
    ) -> (Self, mpsc::Receiver<GenerationReport>) {
        let (tx, rx) = mpsc::channel(100);
        let scheduler = Self {
            forecaster,
            config,
            report_tx: tx,
            stats: RwLock::new(SchedulerStats::default()),
            metrics: ForecastMetrics::new(),
        };
        (scheduler, rx)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.forecast_interval.as_secs(),
            retrain_interval_secs = self.config.retrain_interval.map(|d| d.as_secs()),
            max_concurrent_zones = self.config.max_concurrent_zones,
            "Starting forecast scheduler"
        );

        let mut forecast_ticker = interval(self.config.forecast_interval);
        let retrain_enabled = self.config.retrain_interval.is_some();
        let mut retrain_ticker =
            interval(self.config.retrain_interval.unwrap_or(DEFAULT_RETRAIN_INTERVAL));
        // The first tick fires immediately; skip it so retraining waits a full period
        retrain_ticker.tick().await;

        loop {
            tokio::select! {
                _ = forecast_ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = retrain_ticker.tick(), if retrain_enabled => {
                    self.run_retrain_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down forecast scheduler");
                    break;
                }
            }
        }
    }

    /// Generate forecasts for every zone; returns the number of zones attempted
    pub async fn run_cycle(&self) -> usize {
        let zone_ids = match self.forecaster.zone_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list zones, skipping cycle");
                return 0;
            }
        };
        self.metrics.set_zones_scheduled(zone_ids.len() as i64);

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_zones.max(1)));
        let mut tasks = JoinSet::new();
        for zone_id in zone_ids.iter().cloned() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let forecaster = Arc::clone(&self.forecaster);
            tasks.spawn(async move {
                let _permit = permit;
                let start = Instant::now();
                let result = forecaster.generate(&zone_id).await;
                GenerationReport::from_result(zone_id, &result, start.elapsed())
            });
        }

        let mut stats = SchedulerStats::default();
        while let Some(joined) = tasks.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "Forecast task failed");
                    stats.failures += 1;
                    continue;
                }
            };
            match report.source {
                Some(ForecastSource::Fallback) => stats.fallbacks += 1,
                Some(_) => stats.fresh += 1,
                None => stats.failures += 1,
            }
            debug!(
                zone_id = %report.zone_id,
                source = ?report.source,
                duration_ms = report.duration_ms,
                "Zone forecast completed"
            );
            let _ = self.report_tx.send(report).await;
        }

        let mut totals = self.stats.write().await;
        totals.cycles += 1;
        totals.last_cycle_at = Some(Utc::now());
        totals.zones_last_cycle = zone_ids.len();
        totals.fresh += stats.fresh;
        totals.fallbacks += stats.fallbacks;
        totals.failures += stats.failures;
        zone_ids.len()
    }

    /// Retrain every zone in turn; returns the number of committed updates
    pub async fn run_retrain_cycle(&self) -> usize {
        let zone_ids = match self.forecaster.zone_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list zones, skipping retrain cycle");
                return 0;
            }
        };
        let mut committed = 0;
        for zone_id in &zone_ids {
            if self.forecaster.update_models(zone_id).await {
                committed += 1;
            }
        }
        info!(
            zones = zone_ids.len(),
            committed = committed,
            "Retrain cycle completed"
        );
        self.stats.write().await.retrains_committed += committed as u64;
        committed
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.stats.read().await.clone()
    }
}
