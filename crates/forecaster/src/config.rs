//! Service configuration

use anyhow::Result;
use forecast_lib::config::EngineConfig;
use forecast_lib::lifecycle::SchedulerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional config file
pub const CONFIG_PATH_ENV: &str = "FORECASTER_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForecasterConfig {
    /// Service name attached to structured log events
    pub service_name: String,

    /// Port for the forecast API, health and metrics
    pub api_port: u16,

    /// JSON snapshot seeding the in-memory repository
    pub data_file: Option<PathBuf>,

    /// Forecast generation interval in seconds
    pub schedule_interval_secs: u64,

    /// Retraining interval in seconds; 0 disables scheduled retraining
    pub retrain_interval_secs: u64,

    pub max_concurrent_zones: usize,

    pub engine: EngineConfig,
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            service_name: "flood-forecaster".to_string(),
            api_port: 8080,
            data_file: None,
            schedule_interval_secs: 900,
            retrain_interval_secs: 86_400,
            max_concurrent_zones: 4,
            engine: EngineConfig::default(),
        }
    }
}

impl ForecasterConfig {
    /// Load from the file named by `FORECASTER_CONFIG` (if set), overridden
    /// by `FORECASTER_*` environment variables.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                ::config::Environment::with_prefix("FORECASTER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            forecast_interval: Duration::from_secs(self.schedule_interval_secs.max(1)),
            retrain_interval: (self.retrain_interval_secs > 0)
                .then(|| Duration::from_secs(self.retrain_interval_secs)),
            max_concurrent_zones: self.max_concurrent_zones.max(1),
        }
    }
}
