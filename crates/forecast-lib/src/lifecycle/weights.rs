//! Per-zone committed ensemble weights

use crate::models::EnsembleWeights;
use crate::predictor::ModelRegistry;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

/// Holds the committed weights of every zone.
///
/// Readers take a cloned `Arc` and keep a consistent set for the whole
/// cycle. A commit replaces the zone's whole set in one step, so no reader
/// ever sees a mix of old and new weights.
#[derive(Debug, Default)]
pub struct WeightStore {
    committed: DashMap<String, Arc<EnsembleWeights>>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed(&self, zone_id: &str) -> Option<Arc<EnsembleWeights>> {
        self.committed.get(zone_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Committed weights, or uniform weights over the registry at version 0
    pub fn current(&self, zone_id: &str, registry: &ModelRegistry) -> Arc<EnsembleWeights> {
        self.committed(zone_id)
            .unwrap_or_else(|| Arc::new(EnsembleWeights::uniform(registry.ids(), Utc::now())))
    }

    pub fn commit(&self, zone_id: &str, weights: EnsembleWeights) -> Arc<EnsembleWeights> {
        let weights = Arc::new(weights);
        self.committed
            .insert(zone_id.to_string(), Arc::clone(&weights));
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_uniform_until_committed() {
        let store = WeightStore::new();
        let registry = ModelRegistry::standard();

        let initial = store.current("z1", &registry);
        assert_eq!(initial.version, 0);
        assert_eq!(initial.weights.len(), 3);
        assert!(store.committed("z1").is_none());

        let raw: BTreeMap<String, f64> = registry.ids().into_iter().map(|id| (id, 2.0)).collect();
        let weights = EnsembleWeights::normalized(raw, 1, Utc::now()).unwrap();
        store.commit("z1", weights);
        assert_eq!(store.current("z1", &registry).version, 1);
        assert_eq!(store.current("z2", &registry).version, 0);
    }

    #[test]
    fn test_reader_keeps_snapshot_across_commit() {
        let store = WeightStore::new();
        let registry = ModelRegistry::standard();
        store.commit("z1", EnsembleWeights::uniform(registry.ids(), Utc::now()));
        let held = store.current("z1", &registry);

        let mut next = EnsembleWeights::uniform(registry.ids(), Utc::now());
        next.version = 7;
        store.commit("z1", next);

        assert_eq!(held.version, 0);
        assert!(held.is_normalized(1e-9));
        assert_eq!(store.current("z1", &registry).version, 7);
    }
}
