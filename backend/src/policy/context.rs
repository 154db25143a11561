// Policy evaluation context
//
// Everything a policy may read while computing one boundary value: the
// timestep, scenario member and mode, the shared table store, the values
// other policies already produced for the same step, and the most recently
// published planning targets.

use crate::core::time::Timestep;
use crate::models::{Mode, ScenarioIndex, Scenarios};
use crate::network::Attribute;
use crate::orchestrator::targets::PlanningTargets;
use crate::tables::{TableError, TableStore};
use std::collections::HashMap;
use thiserror::Error;

/// A single boundary-value computation failed
///
/// Recovered at the policy boundary: the failure is logged and recorded,
/// and the solver runs without this value for the step.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolicyError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error("value of '{0}' is unavailable this step")]
    UnavailableReference(String),

    #[error("scenario dimension '{0}' is not declared")]
    UnknownScenarioDimension(String),

    #[error("no value at position {position} of '{dimension}' ({len} declared)")]
    ScenarioOutOfRange {
        dimension: String,
        position: usize,
        len: usize,
    },

    #[error("division by zero in {0}")]
    DivisionByZero(String),

    #[error("result is not finite ({0})")]
    NonFinite(f64),

    #[error("no planning target for {node}/{attribute} in {month}")]
    MissingPlanningTarget {
        node: String,
        attribute: Attribute,
        month: String,
    },

    #[error("{0}")]
    Custom(String),
}

/// Per-step inputs shared by every policy evaluated for one scenario member
#[derive(Debug, Clone, Copy)]
pub struct EvalEnv<'a> {
    pub timestep: &'a Timestep,
    pub scenario: &'a ScenarioIndex,
    pub mode: Mode,
    pub tables: &'a TableStore,
    pub scenarios: &'a Scenarios,
    pub targets: Option<&'a PlanningTargets>,
}

/// View handed to a policy while it computes its value
pub struct EvalContext<'a> {
    env: &'a EvalEnv<'a>,
    names: &'a HashMap<String, usize>,
    values: &'a [Option<f64>],
}

impl<'a> EvalContext<'a> {
    pub(crate) fn new(env: &'a EvalEnv<'a>, names: &'a HashMap<String, usize>, values: &'a [Option<f64>]) -> Self {
        Self { env, names, values }
    }

    pub fn timestep(&self) -> &Timestep {
        self.env.timestep
    }

    pub fn scenario(&self) -> &ScenarioIndex {
        self.env.scenario
    }

    pub fn mode(&self) -> Mode {
        self.env.mode
    }

    pub fn tables(&self) -> &TableStore {
        self.env.tables
    }

    pub fn scenarios(&self) -> &Scenarios {
        self.env.scenarios
    }

    pub fn targets(&self) -> Option<&PlanningTargets> {
        self.env.targets
    }

    /// Value another policy produced for this step
    ///
    /// Fails when the producer failed this step or has not been evaluated,
    /// which only happens for references not declared at build time.
    pub fn value(&self, name: &str) -> Result<f64, PolicyError> {
        let index = self
            .names
            .get(name)
            .ok_or_else(|| PolicyError::UnavailableReference(name.to_string()))?;
        self.value_at(*index, name)
    }

    pub(crate) fn value_at(&self, index: usize, name: &str) -> Result<f64, PolicyError> {
        self.values
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| PolicyError::UnavailableReference(name.to_string()))
    }

    /// Position of the current scenario member along the named dimension
    pub fn scenario_position(&self, dimension: &str) -> Result<usize, PolicyError> {
        self.env
            .scenarios
            .position_of(dimension)
            .and_then(|pos| self.env.scenario.position(pos))
            .ok_or_else(|| PolicyError::UnknownScenarioDimension(dimension.to_string()))
    }
}
