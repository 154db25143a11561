//! Network model
//!
//! The network solver is an external collaborator: given the node layout,
//! a timestep, the boundary values produced by the policy registry and the
//! storages carried over from the previous step, it returns the solved
//! flows, storages and derived attributes for that step.
//!
//! [`BasinModel`] wraps a definition, its policy registry and a solver into
//! the per-resolution model the orchestrator drives. [`BalanceSolver`] is a
//! mass-balance reference solver used by tests and simple basins.

pub mod balance;
pub mod definition;
pub mod model;

pub use balance::BalanceSolver;
pub use definition::{ElevationCurve, ModelDefinition, NodeDef, NodeKind, TableDef, Timestepper};
pub use model::{BasinModel, ModelLoadError};

use crate::core::time::Timestep;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Solved quantity reported for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    Flow,
    Storage,
    Spill,
    Elevation,
}

impl Attribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Flow => "flow",
            Attribute::Storage => "storage",
            Attribute::Spill => "spill",
            Attribute::Elevation => "elevation",
        }
    }

    /// Capitalized form used in result table names
    pub fn title(&self) -> &'static str {
        match self {
            Attribute::Flow => "Flow",
            Attribute::Storage => "Storage",
            Attribute::Spill => "Spill",
            Attribute::Elevation => "Elevation",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy values for one (timestep, scenario), `None` where a policy failed
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryValues {
    index: Arc<HashMap<String, usize>>,
    values: Vec<Option<f64>>,
}

impl BoundaryValues {
    pub fn new(index: Arc<HashMap<String, usize>>, values: Vec<Option<f64>>) -> Self {
        Self { index, values }
    }

    /// Boundary values with no policies at all
    pub fn empty() -> Self {
        Self::new(Arc::new(HashMap::new()), Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.index.get(name).and_then(|&i| self.values.get(i).copied().flatten())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of policies without a value this step
    pub fn missing(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Network solve could not produce a feasible step
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error("node '{node}' is infeasible: {reason}")]
    Infeasible { node: String, reason: String },

    #[error("numerical failure: {0}")]
    Numerical(String),
}

/// Everything the solver needs for one step of one scenario member
#[derive(Debug, Clone, Copy)]
pub struct SolveRequest<'a> {
    pub nodes: &'a [NodeDef],
    pub timestep: &'a Timestep,
    pub boundary: &'a BoundaryValues,
    /// Storage volumes at the start of the step, by node name
    pub storages: &'a BTreeMap<String, f64>,
}

/// Solver output for one step of one scenario member
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolvedStep {
    pub values: BTreeMap<(String, Attribute), f64>,
    /// Storage volumes at the end of the step
    pub storages: BTreeMap<String, f64>,
}

impl SolvedStep {
    pub fn value(&self, node: &str, attribute: Attribute) -> Option<f64> {
        self.values.get(&(node.to_string(), attribute)).copied()
    }
}

/// Network solver seam
///
/// Implementations must be deterministic for identical requests; one solver
/// instance is shared by every scenario member and by batch runs.
pub trait NetworkSolver: Send + Sync {
    fn solve(&self, request: SolveRequest<'_>) -> Result<SolvedStep, SolverError>;
}
