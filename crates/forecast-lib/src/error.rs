//! Error types surfaced by the forecast engine

use thiserror::Error;

/// Failures a caller of the engine can observe
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    /// Too few usable readings, or the readings could not be fetched
    #[error("insufficient data for zone {zone_id}: {available} readings available, {required} required")]
    InsufficientData {
        zone_id: String,
        available: usize,
        required: usize,
    },

    /// Every model faulted or carried zero weight
    #[error("no contributing models for zone {zone_id}")]
    NoContributingModels { zone_id: String },

    #[error("forecast for zone {zone_id} failed quality validation")]
    ValidationRejected { zone_id: String },

    #[error("unknown flood zone: {0}")]
    UnknownZone(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ForecastError {
    /// Stable identifier used for metric labels and API error codes
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::InsufficientData { .. } => "insufficient_data",
            ForecastError::NoContributingModels { .. } => "no_contributing_models",
            ForecastError::ValidationRejected { .. } => "validation_rejected",
            ForecastError::UnknownZone(_) => "unknown_zone",
            ForecastError::Persistence(_) => "persistence",
        }
    }
}

pub type ForecastResult<T> = std::result::Result<T, ForecastError>;
