//! Flood forecast engine
//!
//! This crate provides the core functionality for:
//! - Feature derivation from gauge readings and weather signals
//! - A weighted ensemble of flood models
//! - Forecast validation, persistence and fallback
//! - Ensemble weight retraining from historical outcomes
//! - Alert condition detection, health checks and observability

pub mod alerts;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod repository;

pub use config::EngineConfig;
pub use error::{ForecastError, ForecastResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{FloodForecaster, ForecastScheduler, ForecastSource, GenerationOutcome};
pub use models::*;
pub use observability::{ForecastMetrics, StructuredLogger};
