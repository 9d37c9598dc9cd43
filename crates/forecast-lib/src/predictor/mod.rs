//! Flood prediction engine: features, models, ensemble and validation

mod ensemble;
mod features;
mod inference;
mod validator;

pub use ensemble::{enforce_confidence_decay, CombinedForecast, Coverage, EnsembleCombiner};
pub use features::{linear_regression_slope, seasonal_index, FeatureBuilder};
pub use inference::{
    StageThresholdModel, TrendExtrapolationModel, WeatherCorrelationModel, STAGE_THRESHOLD,
    TREND_EXTRAPOLATION, WEATHER_CORRELATION,
};
pub use validator::{QualityValidator, Rejection};

use crate::models::{FeatureVector, ModelContribution};
use anyhow::Result;
use std::sync::Arc;

/// A single predictive model in the ensemble
pub trait FloodModel: Send + Sync {
    /// Stable identifier used for weights and outcomes
    fn id(&self) -> &str;

    /// Predict flood risk for one horizon. Must not fail for a well-formed
    /// feature vector and must return risk and confidence in [0, 1].
    fn predict(&self, features: &FeatureVector, horizon: u32) -> Result<ModelContribution>;
}

/// Ordered set of models with unique ids
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: Vec<Arc<dyn FloodModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trend, stage and weather models
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TrendExtrapolationModel::new()));
        registry.register(Arc::new(StageThresholdModel::new()));
        registry.register(Arc::new(WeatherCorrelationModel::new()));
        registry
    }

    /// Add a model, replacing any model already registered under its id
    pub fn register(&mut self, model: Arc<dyn FloodModel>) {
        match self.models.iter().position(|m| m.id() == model.id()) {
            Some(idx) => self.models[idx] = model,
            None => self.models.push(model),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.models.iter().map(|m| m.id().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FloodModel>> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.ids())
            .finish()
    }
}
