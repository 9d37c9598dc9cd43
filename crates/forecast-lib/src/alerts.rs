//! Alert condition detection over accepted forecasts
//!
//! Rules are evaluated against each freshly accepted prediction. A rule
//! that fired is suppressed for a cooldown window so repeated generations
//! do not re-raise the same condition. Delivery is left to the caller.

use crate::models::{EnsemblePrediction, HorizonForecast, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Default cooldown between two triggers of the same rule (30 minutes)
const DEFAULT_COOLDOWN_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Predicted water level reaches `threshold` feet
    WaterLevel,
    /// Predicted severity reaches the rule severity and risk reaches `threshold`
    FloodPrediction,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::WaterLevel => write!(f, "WATER_LEVEL"),
            AlertType::FloodPrediction => write!(f, "FLOOD_PREDICTION"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub flood_zone_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub threshold: f64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// A rule condition met by a forecast horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTrigger {
    pub rule_id: String,
    pub flood_zone_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub time_horizon: u32,
    pub observed_value: f64,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
}

/// Evaluates alert rules with per-rule cooldown
pub struct AlertEvaluator {
    cooldown: Duration,
    /// rule id -> last trigger time
    last_triggered: RwLock<HashMap<String, Instant>>,
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertEvaluator {
    pub fn new() -> Self {
        Self {
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            last_triggered: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Triggers raised by `prediction`, at most one per rule.
    ///
    /// Each rule fires on the earliest horizon that meets it. Inactive rules,
    /// rules for other zones and rules still cooling down are skipped.
    pub fn evaluate(
        &self,
        prediction: &EnsemblePrediction,
        rules: &[AlertRule],
        now: DateTime<Utc>,
    ) -> Vec<AlertTrigger> {
        let mut triggers = Vec::new();
        for rule in rules
            .iter()
            .filter(|r| r.is_active && r.flood_zone_id == prediction.flood_zone_id)
        {
            if self.is_cooling_down(&rule.id) {
                continue;
            }
            let hit = prediction
                .per_horizon
                .iter()
                .find_map(|forecast| condition_value(rule, forecast).map(|v| (forecast, v)));
            if let Some((forecast, observed_value)) = hit {
                self.record(&rule.id);
                triggers.push(AlertTrigger {
                    rule_id: rule.id.clone(),
                    flood_zone_id: rule.flood_zone_id.clone(),
                    alert_type: rule.alert_type,
                    severity: forecast.severity.max(rule.severity),
                    time_horizon: forecast.time_horizon,
                    observed_value,
                    threshold: rule.threshold,
                    triggered_at: now,
                });
            }
        }
        triggers
    }

    fn is_cooling_down(&self, rule_id: &str) -> bool {
        let recent = self
            .last_triggered
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        recent
            .get(rule_id)
            .map(|last| last.elapsed() < self.cooldown)
            .unwrap_or(false)
    }

    fn record(&self, rule_id: &str) {
        let mut recent = self
            .last_triggered
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        recent.insert(rule_id.to_string(), Instant::now());
        recent.retain(|_, time| time.elapsed() < self.cooldown);
    }
}

/// The value that met the rule, or None when the horizon does not meet it
fn condition_value(rule: &AlertRule, forecast: &HorizonForecast) -> Option<f64> {
    match rule.alert_type {
        AlertType::WaterLevel => forecast
            .water_level
            .filter(|level| *level >= rule.threshold),
        AlertType::FloodPrediction => (forecast.severity >= rule.severity
            && forecast.flood_risk >= rule.threshold)
            .then_some(forecast.flood_risk),
    }
}
