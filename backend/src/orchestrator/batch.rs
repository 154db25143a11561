//! Independent runs in parallel
//!
//! Runs for different climates or definitions share nothing mutable, so
//! they are spread over the rayon pool. Results come back in job order.

use crate::network::{ModelDefinition, NetworkSolver};
use crate::orchestrator::engine::{Orchestrator, RunConfig, RunOutcome, SimulationError};
use crate::policy::FunctionRegistry;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::info;

/// One run of a batch
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub definition: ModelDefinition,
    pub config: RunConfig,
}

/// One job per climate, all sharing `definition` and otherwise `config`
pub fn climate_jobs(definition: &ModelDefinition, config: &RunConfig, climates: &[String]) -> Vec<BatchJob> {
    climates
        .iter()
        .map(|climate| BatchJob {
            definition: definition.clone(),
            config: RunConfig {
                climate: climate.clone(),
                ..config.clone()
            },
        })
        .collect()
}

/// Run every job; a failed job does not stop the others
pub fn run_batch(
    jobs: Vec<BatchJob>,
    functions: &FunctionRegistry,
    solver: Arc<dyn NetworkSolver>,
) -> Vec<Result<RunOutcome, SimulationError>> {
    info!(jobs = jobs.len(), threads = rayon::current_num_threads(), "batch started");
    jobs.into_par_iter()
        .map(|job| Orchestrator::new(job.definition, job.config, functions, Arc::clone(&solver))?.run())
        .collect()
}
