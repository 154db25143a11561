//! Scenario dimensions and per-scenario memory
//!
//! A run evaluates every member of the Cartesian product of its scenario
//! dimensions. Each member is identified by a [`ScenarioIndex`], which holds
//! one position per dimension in declaration order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScenarioError {
    #[error("scenario dimension '{0}' must have at least one member")]
    EmptyDimension(String),

    #[error("duplicate scenario dimension '{0}'")]
    DuplicateDimension(String),
}

/// A named scenario dimension, e.g. "Price Year" with three members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioDimension {
    pub name: String,
    pub size: usize,
}

impl ScenarioDimension {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// One member of the scenario product
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScenarioIndex {
    /// Row-major position within the product
    global: usize,
    /// Position along each dimension
    indices: Vec<usize>,
}

impl ScenarioIndex {
    pub fn new(global: usize, indices: Vec<usize>) -> Self {
        Self { global, indices }
    }

    pub fn global(&self) -> usize {
        self.global
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Position along the dimension at `dimension` (declaration order)
    pub fn position(&self, dimension: usize) -> Option<usize> {
        self.indices.get(dimension).copied()
    }
}

impl fmt::Display for ScenarioIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.indices.iter().map(|i| i.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// The declared scenario dimensions of a model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenarios {
    dimensions: Vec<ScenarioDimension>,
}

impl Scenarios {
    pub fn new(dimensions: Vec<ScenarioDimension>) -> Result<Self, ScenarioError> {
        let mut seen = HashSet::new();
        for dim in &dimensions {
            if dim.size == 0 {
                return Err(ScenarioError::EmptyDimension(dim.name.clone()));
            }
            if !seen.insert(dim.name.as_str()) {
                return Err(ScenarioError::DuplicateDimension(dim.name.clone()));
            }
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> &[ScenarioDimension] {
        &self.dimensions
    }

    pub fn names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name.as_str()).collect()
    }

    /// Declaration position of the named dimension
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    pub fn size_of(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().find(|d| d.name == name).map(|d| d.size)
    }

    /// Number of members in the product (1 when no dimensions are declared)
    pub fn len(&self) -> usize {
        self.dimensions.iter().map(|d| d.size).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every member of the product; the last dimension varies fastest
    pub fn combinations(&self) -> Vec<ScenarioIndex> {
        let total = self.len();
        (0..total)
            .map(|global| {
                let mut rest = global;
                let mut indices = vec![0; self.dimensions.len()];
                for (slot, dim) in indices.iter_mut().zip(&self.dimensions).rev() {
                    *slot = rest % dim.size;
                    rest /= dim.size;
                }
                ScenarioIndex::new(global, indices)
            })
            .collect()
    }
}

/// Per-scenario mutable memory with an explicit initial value
///
/// Policies that carry state between steps (ramp limits, step changes) keep
/// it here so that one scenario's history never leaks into another's.
#[derive(Debug, Clone)]
pub struct ScenarioMemory<T: Clone> {
    initial: T,
    values: HashMap<ScenarioIndex, T>,
}

impl<T: Clone> ScenarioMemory<T> {
    pub fn new(initial: T) -> Self {
        Self {
            initial,
            values: HashMap::new(),
        }
    }

    /// Current value for `scenario`, or the initial value if never set
    pub fn get(&self, scenario: &ScenarioIndex) -> &T {
        self.values.get(scenario).unwrap_or(&self.initial)
    }

    pub fn set(&mut self, scenario: &ScenarioIndex, value: T) {
        self.values.insert(scenario.clone(), value);
    }

    pub fn initial(&self) -> &T {
        &self.initial
    }

    /// Forget every scenario's value
    pub fn reset(&mut self) {
        self.values.clear();
    }
}
