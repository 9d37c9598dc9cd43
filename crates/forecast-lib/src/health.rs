//! Health check infrastructure for the forecaster
//!
//! Tracks component health for liveness and readiness checks. Scheduled
//! generation results feed the engine component, so a service that keeps
//! falling back to stored forecasts reports itself degraded.

use crate::lifecycle::{ForecastSource, GenerationReport};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Operating, but serving degraded results
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components; Healthy when there are none
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;
        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }
        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const ENGINE: &str = "engine";
    pub const REPOSITORY: &str = "repository";
    pub const SCHEDULER: &str = "scheduler";
    pub const RETRAINER: &str = "retrainer";
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    /// Zones whose latest generation fell back or failed, with the cause
    failing_zones: Arc<RwLock<BTreeMap<String, String>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            failing_zones: Arc::new(RwLock::new(BTreeMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Fold a scheduled generation result into the engine's health.
    ///
    /// The engine stays degraded while any zone's latest generation fell
    /// back or failed.
    pub async fn observe_generation(&self, report: &GenerationReport) {
        let problem = match (report.source, &report.failure) {
            (Some(ForecastSource::Fallback), Some(cause)) => Some(format!(
                "zone {} served stored forecast: {}",
                report.zone_id, cause
            )),
            (None, Some(error)) => Some(format!(
                "zone {} has no forecast: {}",
                report.zone_id, error
            )),
            _ => None,
        };

        let summary = {
            let mut failing = self.failing_zones.write().await;
            match problem {
                Some(message) => {
                    failing.insert(report.zone_id.clone(), message);
                }
                None => {
                    failing.remove(&report.zone_id);
                }
            }
            if failing.is_empty() {
                None
            } else {
                Some(failing.values().cloned().collect::<Vec<_>>().join("; "))
            }
        };

        match summary {
            Some(message) => self.set_degraded(components::ENGINE, message).await,
            None => self.set_healthy(components::ENGINE).await,
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Forecaster not yet initialized".to_string()),
            }
        } else if health.status == ComponentStatus::Unhealthy {
            ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(source: Option<ForecastSource>, failure: Option<&str>) -> GenerationReport {
        zone_report("zone-1", source, failure)
    }

    fn zone_report(
        zone_id: &str,
        source: Option<ForecastSource>,
        failure: Option<&str>,
    ) -> GenerationReport {
        GenerationReport {
            zone_id: zone_id.to_string(),
            source,
            horizons: 5,
            alerts: 0,
            failure: failure.map(str::to_string),
            duration_ms: 12,
        }
    }

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_health_registry_unhealthy_status() {
        let registry = HealthRegistry::new();
        registry.register(components::ENGINE).await;
        registry.register(components::REPOSITORY).await;
        registry
            .set_unhealthy(components::REPOSITORY, "Snapshot unreadable")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_fallback_generation_degrades_engine() {
        let registry = HealthRegistry::new();
        registry.register(components::ENGINE).await;

        registry
            .observe_generation(&report(
                Some(ForecastSource::Fallback),
                Some("insufficient data"),
            ))
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.components[components::ENGINE]
            .message
            .as_deref()
            .unwrap()
            .contains("zone-1"));

        registry
            .observe_generation(&report(Some(ForecastSource::Fresh), None))
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_failed_generation_degrades_engine() {
        let registry = HealthRegistry::new();
        registry
            .observe_generation(&report(None, Some("unknown flood zone: z9")))
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_healthy_zone_does_not_mask_failing_zone() {
        let registry = HealthRegistry::new();
        registry.register(components::ENGINE).await;

        registry
            .observe_generation(&zone_report("z1", None, Some("insufficient data")))
            .await;
        registry
            .observe_generation(&zone_report("z2", Some(ForecastSource::Fresh), None))
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        let message = health.components[components::ENGINE].message.clone().unwrap();
        assert!(message.contains("z1"));
        assert!(!message.contains("z2"));

        registry
            .observe_generation(&zone_report(
                "z2",
                Some(ForecastSource::Fallback),
                Some("persistence failed"),
            ))
            .await;
        registry
            .observe_generation(&zone_report("z1", Some(ForecastSource::Reused), None))
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.components[components::ENGINE]
            .message
            .as_deref()
            .unwrap()
            .contains("z2"));

        registry
            .observe_generation(&zone_report("z2", Some(ForecastSource::Fresh), None))
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_readiness() {
        let registry = HealthRegistry::new();
        assert!(!registry.readiness().await.ready);

        registry.register(components::ENGINE).await;
        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::ENGINE, "Failed").await;
        assert!(!registry.readiness().await.ready);
    }
}
