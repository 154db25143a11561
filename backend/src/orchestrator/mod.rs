//! Orchestrator - coupled daily/monthly run loop
//!
//! See `engine.rs` for the loop itself, `targets.rs` for what a planning
//! pass hands to the daily model and `batch.rs` for running independent
//! configurations in parallel.

pub mod batch;
pub mod engine;
pub mod targets;

pub use batch::{climate_jobs, run_batch, BatchJob};
pub use engine::{DayReport, Orchestrator, PlanningConfig, RunConfig, RunOutcome, RunTiming, SimulationError};
pub use targets::{PlanningTargets, TargetKey};
