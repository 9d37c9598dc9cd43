//! Forecast lifecycle management
//!
//! - `manager`: generate, validate, persist and fall back per zone
//! - `retrain`: recompute ensemble weights from historical outcomes
//! - `weights`: committed per-zone weights
//! - `scheduler`: periodic generation and retraining

mod manager;
mod retrain;
mod scheduler;
mod weights;


pub use manager::{FloodForecaster, ForecastSource, GenerationOutcome};
pub use retrain::{inverse_error_weights, RetrainController, RetrainState};
pub use scheduler::{
    ForecastScheduler, GenerationReport, SchedulerConfig, SchedulerStats,
    DEFAULT_FORECAST_INTERVAL, DEFAULT_RETRAIN_INTERVAL,
};
pub use weights::WeightStore;
