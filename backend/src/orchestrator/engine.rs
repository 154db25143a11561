//! Orchestrator Engine
//!
//! Drives a daily scheduling model and, optionally, a monthly planning
//! model in lockstep.
//!
//! # Loop
//!
//! ```text
//! For each day d of the daily horizon:
//! 1. If planning is enabled and d is the first day of a month:
//!    a. reset the planning model at d from the daily model's storages
//!    b. solve the full planning horizon (N months)
//!    c. publish the resulting targets to the daily model
//!       (a failed pass publishes nothing and aborts the run)
//! 2. Evaluate the daily policies and solve day d
//! ```
//!
//! The daily horizon ends N months before the definition's end so the last
//! planning pass has data to look ahead into.
//!
//! # Example
//!
//! ```rust,ignore
//! use basin_simulator_core_rs::orchestrator::{Orchestrator, RunConfig};
//! use basin_simulator_core_rs::network::{BalanceSolver, ModelDefinition};
//! use basin_simulator_core_rs::policy::FunctionRegistry;
//! use std::sync::Arc;
//!
//! let definition = ModelDefinition::from_json(&std::fs::read_to_string("stanislaus.json")?)?;
//! let config = RunConfig {
//!     climate: "Livneh".to_string(),
//!     price_years: vec![2009.0],
//!     include_planning: true,
//!     ..Default::default()
//! };
//!
//! let orchestrator = Orchestrator::new(definition, config, &FunctionRegistry::new(), Arc::new(BalanceSolver))?;
//! let outcome = orchestrator.run()?;
//! println!("{} rows, {} planning passes", outcome.frame.len(), outcome.planning_publications);
//! ```

use crate::core::time::{TimeError, Timestep};
use crate::models::{EventLog, Mode, RunEvent};
use crate::network::definition::{default_horizon, HISTORICAL_CLIMATE};
use crate::network::model::load_tables;
use crate::network::{BasinModel, ModelDefinition, ModelLoadError, NetworkSolver, SolverError};
use crate::orchestrator::targets::PlanningTargets;
use crate::policy::{ConfigurationError, FunctionRegistry};
use crate::results::{collate, write_tables, ResultFrame, ResultTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

// ============================================================================
// Configuration Types
// ============================================================================

/// Run configuration
///
/// Every field has a default, so a JSON document only needs to name what
/// differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Climate dataset; selects table files and the default horizon
    pub climate: String,

    /// Price years swept as the "Price Year" scenario dimension
    pub price_years: Vec<f64>,

    /// Horizon start (default by climate)
    pub start: Option<NaiveDate>,

    /// Horizon end (default by climate)
    pub end: Option<NaiveDate>,

    /// Remove gauges and observed-data parameters before loading
    pub simplify: bool,

    /// Couple a monthly planning model to the daily model
    pub include_planning: bool,

    pub planning: PlanningConfig,

    /// Replacement for the "../data" prefix of table URLs
    pub data_path: Option<String>,

    /// Name of this run in the output tree
    pub run_name: String,

    /// Write collated tables under `{output_dir}/{run_name}/{model}/{climate}`
    pub output_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            climate: HISTORICAL_CLIMATE.to_string(),
            price_years: vec![2009.0],
            start: None,
            end: None,
            simplify: true,
            include_planning: false,
            planning: PlanningConfig::default(),
            data_path: None,
            run_name: "default".to_string(),
            output_dir: None,
        }
    }
}

impl RunConfig {
    /// Configured horizon, defaulting by climate
    pub fn horizon(&self) -> (NaiveDate, NaiveDate) {
        let (start, end) = default_horizon(&self.climate);
        (self.start.unwrap_or(start), self.end.unwrap_or(end))
    }
}

/// Planning sub-run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Monthly steps per planning pass
    pub months: u32,

    /// Drop rim dams (`daily_only` nodes) from the planning model
    pub remove_rim_dams: bool,

    /// Keep every published target set in the run outcome
    pub record: bool,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            months: 12,
            remove_rim_dams: true,
            record: false,
        }
    }
}

// ============================================================================
// Errors and outcome
// ============================================================================

/// Run-level failure
///
/// Load and configuration errors surface before the first step; step and
/// planning failures carry the model and the date at which the run stopped.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Load(#[from] ModelLoadError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("model '{model}' failed at {date}: {source}")]
    StepFailed {
        model: String,
        date: NaiveDate,
        #[source]
        source: SolverError,
    },

    #[error("planning pass for {date} failed in model '{model}': {reason}")]
    PlanningFailed {
        model: String,
        date: NaiveDate,
        reason: String,
    },

    #[error("failed to fingerprint definition: {0}")]
    Fingerprint(#[from] serde_json::Error),

    #[error("failed to write results: {0}")]
    Output(#[from] std::io::Error),
}

impl SimulationError {
    /// Date at which the run stopped, for failures raised while stepping
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            SimulationError::StepFailed { date, .. } | SimulationError::PlanningFailed { date, .. } => Some(*date),
            _ => None,
        }
    }
}

/// Wall-clock timing of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunTiming {
    pub total_seconds: f64,
    /// Time spent in planning passes
    pub planning_seconds: f64,
}

impl RunTiming {
    /// Planning overhead as a percentage of the total
    pub fn planning_share(&self) -> f64 {
        if self.total_seconds > 0.0 {
            self.planning_seconds / self.total_seconds * 100.0
        } else {
            0.0
        }
    }
}

/// Result of one completed day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayReport {
    pub date: NaiveDate,
    /// A planning pass ran and was published before this day
    pub planned: bool,
    pub policy_failures: usize,
}

/// Everything a completed run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// SHA-256 of the normalized daily definition
    pub fingerprint: String,
    pub model: String,
    pub frame: ResultFrame,
    pub tables: Vec<ResultTable>,
    pub events: EventLog,
    pub planning_publications: usize,
    /// Every published target set, when `planning.record` is set
    pub planning_history: Vec<Arc<PlanningTargets>>,
    pub timing: RunTiming,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Description of the first policy failure in a planning pass, if any
fn first_policy_failure(events: &EventLog) -> Option<String> {
    events.events().iter().find_map(|event| match event {
        RunEvent::PolicyFailed {
            date, policy, error, ..
        } => Some(format!("policy '{}' failed for {}: {}", policy, date, error)),
        _ => None,
    })
}

/// Coupled daily/monthly run
pub struct Orchestrator {
    config: RunConfig,
    run_id: Uuid,
    fingerprint: String,
    daily: BasinModel,
    planning: Option<BasinModel>,
    timesteps: Vec<Timestep>,
    cursor: usize,
    events: EventLog,
    publications: usize,
    history: Vec<Arc<PlanningTargets>>,
    planning_time: Duration,
    started: Option<Instant>,
}

impl Orchestrator {
    /// Normalize `definition` for `config`, load the daily (and planning)
    /// models and validate them against each other
    pub fn new(
        mut definition: ModelDefinition,
        config: RunConfig,
        functions: &FunctionRegistry,
        solver: Arc<dyn NetworkSolver>,
    ) -> Result<Self, SimulationError> {
        Self::validate_config(&config)?;

        let (start, end) = config.horizon();
        definition.normalize(
            &config.climate,
            &config.price_years,
            config.data_path.as_deref(),
            start,
            end,
        )?;
        if config.simplify {
            definition.simplify();
        }

        let planning_definition = if config.include_planning {
            Some(definition.prepare_planning(config.planning.months, config.planning.remove_rim_dams)?)
        } else {
            None
        };

        let tables = Arc::new(load_tables(&definition)?);
        let daily = BasinModel::load_with_tables(definition, functions, Arc::clone(&solver), Arc::clone(&tables))?;
        let planning = planning_definition
            .map(|def| BasinModel::load_with_tables(def, functions, Arc::clone(&solver), Arc::clone(&tables)))
            .transpose()?;

        Self::from_models(config, daily, planning)
    }

    /// Couple already loaded models
    ///
    /// Fails when the planning model iterates a different scenario product
    /// than the daily model, or when the daily horizon is too short to carve
    /// off the planning look-ahead.
    pub fn from_models(
        config: RunConfig,
        mut daily: BasinModel,
        mut planning: Option<BasinModel>,
    ) -> Result<Self, SimulationError> {
        Self::validate_config(&config)?;

        daily.set_mode(Mode::Scheduling);
        if let Some(planning) = planning.as_mut() {
            planning.set_mode(Mode::Planning);
            if planning.scenarios() != daily.scenarios() {
                return Err(ConfigurationError::ScenarioMismatch {
                    daily: daily.scenarios().names().join(", "),
                    planning: planning.scenarios().names().join(", "),
                }
                .into());
            }
            let months = planning.horizon_months().unwrap_or(config.planning.months);
            daily
                .clock_mut()
                .carve_tail(months)
                .map_err(|e: TimeError| ConfigurationError::InvalidHorizon(e.to_string()))?;
        }

        let fingerprint = daily.definition().fingerprint()?;
        let timesteps = daily.clock().timesteps().collect();

        Ok(Self {
            config,
            run_id: Uuid::new_v4(),
            fingerprint,
            daily,
            planning,
            timesteps,
            cursor: 0,
            events: EventLog::new(),
            publications: 0,
            history: Vec::new(),
            planning_time: Duration::ZERO,
            started: None,
        })
    }

    fn validate_config(config: &RunConfig) -> Result<(), ConfigurationError> {
        if config.price_years.is_empty() {
            return Err(ConfigurationError::InvalidHorizon(
                "at least one price year is required".to_string(),
            ));
        }
        if config.include_planning && config.planning.months == 0 {
            return Err(ConfigurationError::InvalidHorizon(
                "planning horizon must be at least one month".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (config.start, config.end) {
            if end < start {
                return Err(ConfigurationError::InvalidHorizon(format!(
                    "end {} precedes start {}",
                    end, start
                )));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn daily(&self) -> &BasinModel {
        &self.daily
    }

    pub fn planning(&self) -> Option<&BasinModel> {
        self.planning.as_ref()
    }

    /// Number of daily steps in the run
    pub fn total_days(&self) -> usize {
        self.timesteps.len()
    }

    /// Days completed so far
    pub fn current_day(&self) -> usize {
        self.cursor
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub fn planning_publications(&self) -> usize {
        self.publications
    }

    // ========================================================================
    // Stepping
    // ========================================================================

    /// Advance one day; `None` once the horizon is exhausted
    pub fn tick(&mut self) -> Result<Option<DayReport>, SimulationError> {
        let Some(timestep) = self.timesteps.get(self.cursor).copied() else {
            return Ok(None);
        };
        if self.cursor == 0 {
            self.daily.setup();
            if let Some(planning) = self.planning.as_mut() {
                planning.setup();
            }
            self.started = Some(Instant::now());
        }

        let planned = if timestep.is_month_start() && self.planning.is_some() {
            self.plan(timestep.date())?;
            true
        } else {
            false
        };

        let report = self.daily.step_at(&timestep).map_err(|source| {
            error!(
                model = self.daily.name(),
                date = %timestep.date(),
                error = %source,
                "daily step failed"
            );
            SimulationError::StepFailed {
                model: self.daily.name().to_string(),
                date: timestep.date(),
                source,
            }
        })?;
        self.events.append(&mut self.daily.take_events());
        self.cursor += 1;

        Ok(Some(DayReport {
            date: timestep.date(),
            planned,
            policy_failures: report.policy_failures,
        }))
    }

    /// One planning pass for the month starting at `date`, all or nothing
    ///
    /// The planning model restarts from the daily storages and the daily
    /// step-change reductions. Any failure inside the pass is fatal,
    /// including a single policy that could not be evaluated: its targets
    /// would be planned without that boundary value.
    fn plan(&mut self, date: NaiveDate) -> Result<(), SimulationError> {
        let Some(planning) = self.planning.as_mut() else {
            return Ok(());
        };
        let started = Instant::now();
        let months = planning.horizon_months().unwrap_or(self.config.planning.months);

        let result = match planning.reset(date, self.daily.state()) {
            Ok(()) => {
                planning.inherit_policy_memory(&self.daily);
                planning.run_horizon(date, months).map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };
        let mut pass_events = planning.take_events();
        let result = result.and_then(|targets| match first_policy_failure(&pass_events) {
            Some(reason) => Err(reason),
            None => Ok(targets),
        });
        self.events.append(&mut pass_events);
        self.planning_time += started.elapsed();

        match result {
            Ok(targets) => {
                let targets = Arc::new(targets);
                self.events.log(RunEvent::PlanningPublished {
                    date,
                    horizon_months: months,
                    series: targets.series_count(),
                });
                debug!(date = %date, series = targets.series_count(), "planning targets published");
                if self.config.planning.record {
                    self.history.push(Arc::clone(&targets));
                }
                self.daily.publish_targets(targets);
                self.publications += 1;
                Ok(())
            }
            Err(reason) => {
                error!(model = planning.name(), date = %date, error = %reason, "planning pass failed");
                self.events.log(RunEvent::PlanningDiscarded {
                    date,
                    reason: reason.clone(),
                });
                Err(SimulationError::PlanningFailed {
                    model: planning.name().to_string(),
                    date,
                    reason,
                })
            }
        }
    }

    /// Run every remaining day and collate the results
    #[instrument(skip_all, fields(run_id = %self.run_id, model = self.daily.name()))]
    pub fn run(mut self) -> Result<RunOutcome, SimulationError> {
        info!(
            days = self.timesteps.len(),
            planning = self.planning.is_some(),
            scenarios = self.daily.combinations().len(),
            "run started"
        );

        while self.tick()?.is_some() {}

        self.finish()
    }

    fn finish(self) -> Result<RunOutcome, SimulationError> {
        let total = self.started.map(|s| s.elapsed()).unwrap_or_default();
        let timing = RunTiming {
            total_seconds: total.as_secs_f64(),
            planning_seconds: self.planning_time.as_secs_f64(),
        };
        info!(seconds = timing.total_seconds, "run finished");
        if self.planning.is_some() {
            info!(
                seconds = timing.planning_seconds,
                share_pct = timing.planning_share(),
                "monthly overhead"
            );
        }

        let mut frame = self.daily.to_frame();
        frame.truncate_after(self.daily.clock().end());

        let scenario_names: Vec<String> = self.daily.scenarios().names().into_iter().map(str::to_string).collect();
        let tables = collate(&frame, self.daily.nodes(), &scenario_names);

        if let Some(dir) = &self.config.output_dir {
            let dir = dir
                .join(&self.config.run_name)
                .join(self.daily.name())
                .join(&self.config.climate);
            let written = write_tables(&tables, &dir)?;
            info!(path = %dir.display(), tables = written.len(), "results written");
        }

        Ok(RunOutcome {
            run_id: self.run_id,
            fingerprint: self.fingerprint,
            model: self.daily.name().to_string(),
            frame,
            tables,
            events: self.events,
            planning_publications: self.publications,
            planning_history: self.history,
            timing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.planning.months, 12);
        assert!(config.simplify);
        assert!(config.planning.remove_rim_dams);
        assert_eq!(
            config.horizon(),
            (
                NaiveDate::from_ymd_opt(1980, 10, 1).unwrap(),
                NaiveDate::from_ymd_opt(2012, 9, 30).unwrap()
            )
        );
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: RunConfig =
            serde_json::from_str(r#"{"climate": "CanESM2_rcp85", "planning": {"months": 6}}"#).unwrap();
        assert_eq!(config.planning.months, 6);
        assert!(config.planning.remove_rim_dams);
        assert_eq!(config.horizon().0, NaiveDate::from_ymd_opt(2030, 10, 1).unwrap());
    }

    #[test]
    fn test_validate_config() {
        let mut config = RunConfig::default();
        config.price_years.clear();
        assert!(Orchestrator::validate_config(&config).is_err());

        let config = RunConfig {
            include_planning: true,
            planning: PlanningConfig {
                months: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(Orchestrator::validate_config(&config).is_err());
    }

    #[test]
    fn test_planning_share() {
        let timing = RunTiming {
            total_seconds: 10.0,
            planning_seconds: 2.5,
        };
        assert_eq!(timing.planning_share(), 25.0);
        assert_eq!(RunTiming::default().planning_share(), 0.0);
    }
}
