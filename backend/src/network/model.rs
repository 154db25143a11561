//! Basin model
//!
//! A [`BasinModel`] is one loaded model at one resolution: the definition,
//! its compiled policy registry, the solver, the physical state carried
//! between steps, the recorder and the latest published planning targets.
//! The orchestrator drives two of them, a daily scheduling model and a
//! monthly planning model, through the same interface.

use crate::core::time::{Resolution, SimulationClock, TimeError, Timestep};
use crate::models::{EventLog, Mode, NetworkState, RunEvent, ScenarioError, ScenarioIndex, Scenarios};
use crate::network::definition::{ModelDefinition, NodeDef, NodeKind};
use crate::network::{NetworkSolver, SolveRequest, SolverError};
use crate::orchestrator::targets::PlanningTargets;
use crate::policy::{ConfigurationError, EvalEnv, FunctionRegistry, PolicyRegistry};
use crate::results::{Recorder, ResultFrame};
use crate::tables::{Table, TableStore};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Malformed or inconsistent model definition, detected before any step
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("invalid model definition: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model '{model}': duplicate node '{node}'")]
    DuplicateNode { model: String, node: String },

    #[error("model '{model}': node '{node}' slot '{slot}' references unknown parameter '{parameter}'")]
    UnknownParameter {
        model: String,
        node: String,
        slot: String,
        parameter: String,
    },

    #[error("model '{model}': table '{table}' declares neither data nor url")]
    MissingTableData { model: String, table: String },

    #[error("model '{model}': table '{table}' could not be read from '{path}': {reason}")]
    TableFile {
        model: String,
        table: String,
        path: String,
        reason: String,
    },

    #[error("model '{model}': {source}")]
    Scenario {
        model: String,
        #[source]
        source: ScenarioError,
    },

    #[error("model '{model}': {source}")]
    Configuration {
        model: String,
        #[source]
        source: ConfigurationError,
    },

    #[error("model '{model}': {source}")]
    Time {
        model: String,
        #[source]
        source: TimeError,
    },
}

/// Summary of one model step across all scenario members
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub index: usize,
    /// Policy values that were absent from the solve
    pub policy_failures: usize,
}

/// Build the table store for a definition, reading file-backed tables
pub fn load_tables(definition: &ModelDefinition) -> Result<TableStore, ModelLoadError> {
    let mut store = TableStore::new();
    for (name, table) in &definition.tables {
        let data = match (&table.data, &table.url) {
            (Some(data), _) => data.clone(),
            (None, Some(url)) => {
                let file_error = |reason: String| ModelLoadError::TableFile {
                    model: definition.name.clone(),
                    table: name.clone(),
                    path: url.clone(),
                    reason,
                };
                let text = fs::read_to_string(url).map_err(|e| file_error(e.to_string()))?;
                serde_json::from_str::<Table>(&text).map_err(|e| file_error(e.to_string()))?
            }
            (None, None) => {
                return Err(ModelLoadError::MissingTableData {
                    model: definition.name.clone(),
                    table: name.clone(),
                })
            }
        };
        store.insert(name.clone(), data);
    }
    Ok(store)
}

/// One loaded basin model at one resolution
pub struct BasinModel {
    definition: ModelDefinition,
    mode: Mode,
    clock: SimulationClock,
    scenarios: Scenarios,
    combinations: Vec<ScenarioIndex>,
    registry: PolicyRegistry,
    solver: Arc<dyn NetworkSolver>,
    tables: Arc<TableStore>,
    state: NetworkState,
    recorder: Recorder,
    targets: Option<Arc<PlanningTargets>>,
    events: EventLog,
}

impl BasinModel {
    /// Load a definition, reading its tables
    pub fn load(
        definition: ModelDefinition,
        functions: &FunctionRegistry,
        solver: Arc<dyn NetworkSolver>,
    ) -> Result<Self, ModelLoadError> {
        let tables = load_tables(&definition)?;
        Self::load_with_tables(definition, functions, solver, Arc::new(tables))
    }

    /// Load a definition against an already built table store
    pub fn load_with_tables(
        definition: ModelDefinition,
        functions: &FunctionRegistry,
        solver: Arc<dyn NetworkSolver>,
        tables: Arc<TableStore>,
    ) -> Result<Self, ModelLoadError> {
        let model = definition.name.clone();

        let mut seen = HashSet::new();
        for node in &definition.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(ModelLoadError::DuplicateNode {
                    model,
                    node: node.name.clone(),
                });
            }
            for (slot, parameter) in &node.parameters {
                if !definition.parameters.contains_key(parameter) {
                    return Err(ModelLoadError::UnknownParameter {
                        model,
                        node: node.name.clone(),
                        slot: slot.clone(),
                        parameter: parameter.clone(),
                    });
                }
            }
        }

        let scenarios = Scenarios::new(definition.scenarios.clone()).map_err(|source| ModelLoadError::Scenario {
            model: model.clone(),
            source,
        })?;
        let registry = PolicyRegistry::build(&definition.parameters, functions, &scenarios).map_err(|source| {
            ModelLoadError::Configuration {
                model: model.clone(),
                source,
            }
        })?;
        let ts = &definition.timestepper;
        let clock = SimulationClock::new(ts.start, ts.end, ts.resolution)
            .map_err(|source| ModelLoadError::Time { model: model.clone(), source })?;
        let mode = match ts.resolution {
            Resolution::Daily => Mode::Scheduling,
            Resolution::Monthly => Mode::Planning,
        };

        info!(
            model = %model,
            nodes = definition.nodes.len(),
            policies = registry.len(),
            scenarios = scenarios.len(),
            "model loaded"
        );

        let combinations = scenarios.combinations();
        let mut loaded = Self {
            definition,
            mode,
            clock,
            scenarios,
            combinations,
            registry,
            solver,
            tables,
            state: NetworkState::new(),
            recorder: Recorder::new(),
            targets: None,
            events: EventLog::new(),
        };
        loaded.state = loaded.initial_state(None);
        Ok(loaded)
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut SimulationClock {
        &mut self.clock
    }

    pub fn nodes(&self) -> &[NodeDef] {
        &self.definition.nodes
    }

    pub fn scenarios(&self) -> &Scenarios {
        &self.scenarios
    }

    /// Every scenario member, in row-major order
    pub fn combinations(&self) -> &[ScenarioIndex] {
        &self.combinations
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn tables(&self) -> &Arc<TableStore> {
        &self.tables
    }

    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Move the accumulated events out of the model
    pub fn take_events(&mut self) -> EventLog {
        std::mem::take(&mut self.events)
    }

    pub fn targets(&self) -> Option<&PlanningTargets> {
        self.targets.as_deref()
    }

    /// Replace the planning targets consulted by scheduling policies
    pub fn publish_targets(&mut self, targets: Arc<PlanningTargets>) {
        self.targets = Some(targets);
    }

    /// Steps per planning pass declared by the definition
    pub fn horizon_months(&self) -> Option<u32> {
        self.definition.timestepper.horizon_months
    }

    /// Prepare for a run from the definition's initial conditions
    pub fn setup(&mut self) {
        self.state = self.initial_state(None);
        self.recorder.clear();
        self.registry.reset_state();
        self.targets = None;
    }

    /// Restart at `start` from `initial` storages
    ///
    /// Storages missing from `initial` fall back to the definition's initial
    /// storage. Recorded values and policy memory from the previous pass are
    /// discarded; the model is not re-loaded. Step-change reductions in force
    /// elsewhere are restored with [`BasinModel::inherit_policy_memory`].
    pub fn reset(&mut self, start: NaiveDate, initial: &NetworkState) -> Result<(), TimeError> {
        let end = self.clock.end().max(start);
        self.clock.set_bounds(start, end)?;
        self.state = self.initial_state(Some(initial));
        self.recorder.clear();
        self.registry.reset_state();
        Ok(())
    }

    /// Carry `from`'s step-change reductions into this model's policies
    pub fn inherit_policy_memory(&mut self, from: &BasinModel) {
        self.registry.inherit_reductions(&from.registry);
    }

    /// Evaluate policies and solve one step for every scenario member
    pub fn step_at(&mut self, timestep: &Timestep) -> Result<StepReport, SolverError> {
        self.solve_step(timestep, None)
    }

    /// Run `steps` monthly steps from the month containing `start`
    pub fn run_horizon(&mut self, start: NaiveDate, steps: u32) -> Result<PlanningTargets, SolverError> {
        let horizon = SimulationClock::monthly_horizon(start, steps);
        let first = horizon.first().map(Timestep::date).unwrap_or(start);
        let mut targets = PlanningTargets::new(first);
        for timestep in &horizon {
            self.solve_step(timestep, Some(&mut targets))?;
        }
        debug!(
            model = %self.definition.name,
            start = %first,
            steps = horizon.len(),
            "planning horizon solved"
        );
        Ok(targets)
    }

    /// Snapshot of every recorded value
    pub fn to_frame(&self) -> ResultFrame {
        self.recorder.frame()
    }

    fn solve_step(&mut self, timestep: &Timestep, mut capture: Option<&mut PlanningTargets>) -> Result<StepReport, SolverError> {
        let mut policy_failures = 0;
        let empty = BTreeMap::new();

        for scenario in &self.combinations {
            let env = EvalEnv {
                timestep,
                scenario,
                mode: self.mode,
                tables: &self.tables,
                scenarios: &self.scenarios,
                targets: self.targets.as_deref(),
            };
            let evaluation = self.registry.evaluate(&env);
            policy_failures += evaluation.failures.len();
            for failure in evaluation.failures {
                self.events.log(RunEvent::PolicyFailed {
                    date: timestep.date(),
                    mode: self.mode,
                    scenario: scenario.clone(),
                    policy: failure.policy,
                    source: failure.source,
                    error: failure.error.to_string(),
                });
            }

            let storages = self.state.storages(scenario).unwrap_or(&empty);
            let solved = self.solver.solve(SolveRequest {
                nodes: &self.definition.nodes,
                timestep,
                boundary: &evaluation.values,
                storages,
            })?;

            self.recorder.record(timestep, scenario, &solved);
            if let Some(targets) = capture.as_deref_mut() {
                targets.push(scenario, timestep, &solved);
            }
            self.state.replace(scenario, solved.storages);
        }

        Ok(StepReport {
            index: timestep.index(),
            policy_failures,
        })
    }

    fn initial_state(&self, carried: Option<&NetworkState>) -> NetworkState {
        let mut state = NetworkState::new();
        for scenario in &self.combinations {
            for node in &self.definition.nodes {
                if let NodeKind::Storage { initial_storage, .. } = node.kind {
                    let volume = carried
                        .and_then(|c| c.storage(scenario, &node.name))
                        .unwrap_or(initial_storage);
                    state.set_storage(scenario, &node.name, volume);
                }
            }
        }
        state
    }
}

impl std::fmt::Debug for BasinModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasinModel")
            .field("name", &self.definition.name)
            .field("mode", &self.mode)
            .field("clock", &self.clock)
            .field("scenarios", &self.scenarios)
            .field("registry", &self.registry)
            .finish()
    }
}
