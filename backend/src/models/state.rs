//! Physical network state carried between steps
//!
//! Only storages persist from one step to the next; flows are recomputed by
//! the solver every step. The orchestrator reads this summary to seed each
//! planning sub-run's initial conditions.

use crate::models::scenario::ScenarioIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage volumes per scenario, per storage node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    storages: BTreeMap<ScenarioIndex, BTreeMap<String, f64>>,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same initial storages for every scenario
    pub fn uniform<'a>(
        scenarios: &[ScenarioIndex],
        initial: impl IntoIterator<Item = (&'a str, f64)> + Clone,
    ) -> Self {
        let mut state = Self::new();
        for scenario in scenarios {
            for (node, volume) in initial.clone() {
                state.set_storage(scenario, node, volume);
            }
        }
        state
    }

    pub fn storage(&self, scenario: &ScenarioIndex, node: &str) -> Option<f64> {
        self.storages.get(scenario).and_then(|s| s.get(node)).copied()
    }

    pub fn storages(&self, scenario: &ScenarioIndex) -> Option<&BTreeMap<String, f64>> {
        self.storages.get(scenario)
    }

    pub fn set_storage(&mut self, scenario: &ScenarioIndex, node: &str, volume: f64) {
        self.storages
            .entry(scenario.clone())
            .or_default()
            .insert(node.to_string(), volume);
    }

    /// Replace one scenario's storages wholesale
    pub fn replace(&mut self, scenario: &ScenarioIndex, storages: BTreeMap<String, f64>) {
        self.storages.insert(scenario.clone(), storages);
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &ScenarioIndex> {
        self.storages.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }
}
