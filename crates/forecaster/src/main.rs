//! Flood Forecaster - periodic flood risk forecasting service
//!
//! Generates ensemble forecasts for every flood zone on a schedule,
//! retrains ensemble weights from historical outcomes and serves the
//! results over HTTP.

use anyhow::{Context, Result};
use flood_forecaster::{api, config::ForecasterConfig};
use forecast_lib::{
    health::{components, HealthRegistry},
    lifecycle::{FloodForecaster, ForecastScheduler},
    observability::StructuredLogger,
    predictor::ModelRegistry,
    repository::{FloodRepository, InMemoryRepository},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting flood-forecaster");

    let config = ForecasterConfig::load()?;
    info!(
        service = %config.service_name,
        api_port = config.api_port,
        horizons = ?config.engine.normalized_horizons(),
        "Forecaster configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ENGINE).await;
    health_registry.register(components::REPOSITORY).await;
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::RETRAINER).await;

    let repository: Arc<dyn FloodRepository> = match &config.data_file {
        Some(path) => {
            let repository = InMemoryRepository::load(path)
                .with_context(|| format!("Failed to load data file {}", path.display()))?;
            info!(path = %path.display(), "Loaded repository snapshot");
            Arc::new(repository)
        }
        None => {
            warn!("No data file configured, starting with an empty repository");
            health_registry
                .set_degraded(components::REPOSITORY, "No data file configured")
                .await;
            Arc::new(InMemoryRepository::new())
        }
    };

    let logger = StructuredLogger::new(&config.service_name);
    let forecaster = Arc::new(FloodForecaster::with_logger(
        repository,
        ModelRegistry::standard(),
        config.engine.clone(),
        logger.clone(),
    ));
    logger.log_startup(SERVICE_VERSION, &forecaster.registry().ids());

    let scheduler_config = config.scheduler_config();
    if scheduler_config.retrain_interval.is_none() {
        health_registry
            .set_degraded(components::RETRAINER, "Scheduled retraining disabled")
            .await;
    }

    let (scheduler, mut reports) = ForecastScheduler::new(Arc::clone(&forecaster), scheduler_config);
    let scheduler = Arc::new(scheduler);
    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(Arc::clone(&scheduler).run(shutdown_tx.subscribe()));

    // Fold generation reports into engine health
    let report_health = health_registry.clone();
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            report_health.observe_generation(&report).await;
        }
    });

    let app_state = Arc::new(api::AppState::new(
        Arc::clone(&forecaster),
        health_registry.clone(),
    ));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
            logger.log_shutdown("API server stopped");
        }
    }

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    let stats = scheduler.stats().await;
    info!(
        cycles = stats.cycles,
        fresh = stats.fresh,
        fallbacks = stats.fallbacks,
        failures = stats.failures,
        "Shutting down"
    );

    Ok(())
}
