//! Basin Simulator Core - Rust Engine
//!
//! Coupled daily/monthly river-basin simulation: a daily scheduling model
//! stepped one day at a time, with a monthly planning model re-run at the
//! start of every month to publish look-ahead targets the daily policies
//! consume.
//!
//! # Architecture
//!
//! - **core**: Calendar handling and unit conversion
//! - **models**: Scenarios, modes, carried network state, run events
//! - **tables**: Read-only lookup tables shared by every policy
//! - **policy**: Declarative policies, their registry and evaluation
//! - **network**: Model definitions, the solver seam and the basin model
//! - **orchestrator**: The coupled run loop and parallel batches
//! - **results**: Recording and collation into output tables
//!
//! # Critical Invariants
//!
//! 1. Each policy is evaluated once per (timestep, scenario), producers first
//! 2. A failing policy never aborts a step; a failing solve aborts the run
//! 3. Planning targets are published whole or not at all
//! 4. Daily and planning models iterate the same scenario product

// Module declarations
pub mod core;
pub mod models;
pub mod network;
pub mod orchestrator;
pub mod policy;
pub mod results;
pub mod tables;

// Re-exports for convenience
pub use crate::core::time::{Resolution, SimulationClock, Timestep};
pub use crate::core::units::{convert, Unit, UnitError};
pub use models::{EventLog, Mode, NetworkState, RunEvent, ScenarioIndex, Scenarios};
pub use network::{BalanceSolver, BasinModel, ModelDefinition, ModelLoadError, NetworkSolver, SolverError};
pub use orchestrator::{Orchestrator, PlanningTargets, RunConfig, RunOutcome, SimulationError};
pub use policy::{ConfigurationError, FunctionRegistry, PolicyDef, PolicyError, PolicyRegistry};
pub use results::{collate, ResultFrame, ResultTable};
pub use tables::{Table, TableError, TableStore};

// FFI module (when feature enabled)
#[cfg(feature = "pyo3")]
pub mod ffi;

// PyO3 exports (when feature enabled)
#[cfg(feature = "pyo3")]
use pyo3::prelude::*;

#[cfg(feature = "pyo3")]
#[pymodule]
fn basin_simulator_core_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<ffi::run::PyBasinRun>()?;
    Ok(())
}
