//! Per-container counter deltas accumulated during a run

use std::collections::{BTreeMap, BTreeSet};

use crate::types::StatsDelta;

/// Collects deltas per container so each gets one combined update
#[derive(Debug, Default)]
pub struct StatsLedger {
    deltas: BTreeMap<String, StatsDelta>,
    excluded: BTreeSet<String>,
}

impl StatsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers whose counters were already computed from a full walk
    /// in this run receive no per-file deltas
    pub fn exclude(&mut self, container_id: impl Into<String>) {
        let id = container_id.into();
        self.deltas.remove(&id);
        self.excluded.insert(id);
    }

    pub fn is_excluded(&self, container_id: &str) -> bool {
        self.excluded.contains(container_id)
    }

    pub fn record(&mut self, container_id: &str, delta: StatsDelta) {
        if delta.is_zero() || self.excluded.contains(container_id) {
            return;
        }
        *self.deltas.entry(container_id.to_string()).or_default() += delta;
    }

    /// Non-zero combined deltas, emptying the ledger
    pub fn drain(&mut self) -> Vec<(String, StatsDelta)> {
        std::mem::take(&mut self.deltas)
            .into_iter()
            .filter(|(_, d)| !d.is_zero())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combines_and_skips_excluded() {
        let mut ledger = StatsLedger::new();
        ledger.record("a", StatsDelta::new(1, 100));
        ledger.record("a", StatsDelta::new(1, 50));
        ledger.record("b", StatsDelta::new(-1, -10));
        ledger.record("b", StatsDelta::new(1, 10));
        ledger.exclude("c");
        ledger.record("c", StatsDelta::new(1, 1));

        assert_eq!(ledger.drain(), vec![("a".to_string(), StatsDelta::new(2, 150))]);
        assert!(ledger.drain().is_empty());
        assert!(ledger.is_excluded("c"));
    }
}
