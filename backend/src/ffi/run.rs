//! PyO3 wrapper for a coupled basin run

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::network::{BalanceSolver, ModelDefinition};
use crate::orchestrator::{Orchestrator, RunConfig, RunOutcome};
use crate::policy::FunctionRegistry;
use std::sync::Arc;

/// Python wrapper for one basin run
///
/// # Example (from Python)
///
/// ```python
/// from basin_simulator_core_rs import BasinRun
///
/// run = BasinRun(open("stanislaus.json").read(), '{"include_planning": true}')
/// summary = run.run()
/// print(summary["rows"], summary["planning_publications"])
/// storage = run.table("Reservoir_Storage_mcm")
/// ```
#[pyclass(name = "BasinRun")]
pub struct PyBasinRun {
    definition: ModelDefinition,
    config: RunConfig,
    outcome: Option<RunOutcome>,
}

#[pymethods]
impl PyBasinRun {
    /// Parse a model definition and an optional run configuration
    ///
    /// Raises ValueError if either document is malformed.
    #[new]
    #[pyo3(signature = (definition_json, config_json=None))]
    fn new(definition_json: &str, config_json: Option<&str>) -> PyResult<Self> {
        let definition = ModelDefinition::from_json(definition_json)
            .map_err(|e| PyValueError::new_err(format!("Invalid model definition: {}", e)))?;
        let config = match config_json {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| PyValueError::new_err(format!("Invalid run configuration: {}", e)))?,
            None => RunConfig::default(),
        };
        Ok(Self {
            definition,
            config,
            outcome: None,
        })
    }

    /// Run the model to completion with the reference solver
    ///
    /// The GIL is released while the simulation runs. Returns a summary dict
    /// with `run_id`, `fingerprint`, `model`, `rows`, `planning_publications`,
    /// `policy_failures`, `total_seconds` and `planning_seconds`.
    fn run(&mut self, py: Python<'_>) -> PyResult<Py<PyDict>> {
        let definition = self.definition.clone();
        let config = self.config.clone();
        let outcome = py
            .allow_threads(move || {
                Orchestrator::new(definition, config, &FunctionRegistry::new(), Arc::new(BalanceSolver))?.run()
            })
            .map_err(|e| PyRuntimeError::new_err(format!("Run failed: {}", e)))?;

        let dict = PyDict::new_bound(py);
        dict.set_item("run_id", outcome.run_id.to_string())?;
        dict.set_item("fingerprint", &outcome.fingerprint)?;
        dict.set_item("model", &outcome.model)?;
        dict.set_item("rows", outcome.frame.len())?;
        dict.set_item("planning_publications", outcome.planning_publications)?;
        dict.set_item("policy_failures", outcome.events.policy_failures())?;
        dict.set_item("total_seconds", outcome.timing.total_seconds)?;
        dict.set_item("planning_seconds", outcome.timing.planning_seconds)?;

        self.outcome = Some(outcome);
        Ok(dict.unbind())
    }

    /// Names of the collated tables of the last run
    fn table_names(&self) -> Vec<String> {
        self.outcome
            .as_ref()
            .map(|o| o.tables.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    /// One collated table as `{"dates": [...], "columns": {"node (0, 1)": [...]}}`
    fn table(&self, py: Python<'_>, name: &str) -> PyResult<Py<PyDict>> {
        let outcome = self
            .outcome
            .as_ref()
            .ok_or_else(|| PyRuntimeError::new_err("No run has completed yet"))?;
        let table = outcome
            .tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| PyValueError::new_err(format!("Unknown table: {}", name)))?;

        let dict = PyDict::new_bound(py);
        let dates: Vec<String> = table.dates.iter().map(|d| d.to_string()).collect();
        dict.set_item("dates", dates)?;
        let columns = PyDict::new_bound(py);
        for (node, scenario, values) in &table.columns {
            columns.set_item(format!("{} {}", node, scenario), values.clone())?;
        }
        dict.set_item("columns", columns)?;
        dict.set_item("unit", &table.unit)?;
        Ok(dict.unbind())
    }

    /// Recovered policy failures of the last run as a list of JSON strings
    fn policy_failures(&self) -> PyResult<Vec<String>> {
        let Some(outcome) = self.outcome.as_ref() else {
            return Ok(Vec::new());
        };
        outcome
            .events
            .events_of_type("PolicyFailed")
            .into_iter()
            .map(|event| serde_json::to_string(event).map_err(|e| PyRuntimeError::new_err(e.to_string())))
            .collect()
    }
}
