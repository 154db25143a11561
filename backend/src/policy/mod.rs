//! Policy Parameter Module
//!
//! Policies compute the boundary values a network solve needs for one
//! timestep and scenario member: demands, minimum flows, storage targets,
//! prices. Each policy is declared as data ([`PolicyDef`]) and compiled into
//! a [`PolicyRegistry`] when the model is loaded.
//!
//! # Evaluation
//!
//! For every (timestep, scenario) the registry evaluates each policy exactly
//! once, producers before consumers. A policy's value flows through:
//!
//! 1. its base rule (constant, table lookup, interpolation, reference, ...)
//! 2. quadratic index scaling
//! 3. the scenario-conditional step-change reduction
//! 4. the offset
//! 5. the ramp limit (scheduling mode only)
//! 6. unit conversion
//!
//! Failures are contained at the policy boundary: see
//! [`PolicyRegistry::evaluate`].
//!
//! # Example
//!
//! ```rust
//! use basin_simulator_core_rs::policy::{FunctionRegistry, PolicyDef, PolicyRegistry};
//! use basin_simulator_core_rs::models::Scenarios;
//! use std::collections::BTreeMap;
//!
//! let mut defs = BTreeMap::new();
//! defs.insert("min_flow".to_string(), PolicyDef::constant(4.0));
//!
//! let registry = PolicyRegistry::build(&defs, &FunctionRegistry::new(), &Scenarios::default()).unwrap();
//! assert_eq!(registry.order_names(), vec!["min_flow"]);
//! ```

pub mod context;
pub mod ramp;
pub mod registry;
pub(crate) mod rules;
pub mod types;
pub mod validation;

pub use context::{EvalContext, EvalEnv, PolicyError};
pub use ramp::{MonthlyRate, RampSpec};
pub use registry::{FunctionRegistry, PolicyFailure, PolicyFunction, PolicyRegistry, StepEvaluation};
pub use rules::PolicyState;
pub use types::{
    BaseRule, ColumnSelector, IndexSource, PlanningRule, PolicyDef, ScalingRule, ScenarioLevels,
    StepChangeSpec, WeightRule,
};
pub use validation::{evaluation_order, ConfigurationError};
