//! Model definitions
//!
//! A basin model is described by one JSON document: its time horizon,
//! scenario dimensions, nodes, named policies and lookup tables. The same
//! document is normalized for a particular run (climate, price years,
//! horizon), optionally simplified, and derived into the monthly planning
//! variant.

use crate::core::time::{Resolution, TimeError};
use crate::models::ScenarioDimension;
use crate::policy::{BaseRule, ConfigurationError, PolicyDef};
use crate::tables::Table;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Scenario dimension and parameter added for the price-year sweep
pub const PRICE_YEAR: &str = "Price Year";

/// Name fragment marking observed-data tables and parameters
const OBSERVED: &str = "observed";

/// Historical climate dataset; the only one with the historical default horizon
pub const HISTORICAL_CLIMATE: &str = "Livneh";

/// Time horizon of a model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestepper {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default = "default_resolution")]
    pub resolution: Resolution,
    /// Steps of one planning pass (monthly definitions only)
    #[serde(default)]
    pub horizon_months: Option<u32>,
}

fn default_resolution() -> Resolution {
    Resolution::Daily
}

/// Linear storage-to-elevation relation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElevationCurve {
    pub base: f64,
    pub slope: f64,
}

impl ElevationCurve {
    pub fn elevation(&self, storage: f64) -> f64 {
        self.base + self.slope * storage
    }
}

/// Physical role of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Storage {
        capacity: f64,
        initial_storage: f64,
        #[serde(default)]
        elevation: Option<ElevationCurve>,
    },
    Link,
    Hydropower {
        head: f64,
    },
    Gauge,
}

impl NodeKind {
    /// Name used to group result tables
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Storage { .. } => "Reservoir",
            NodeKind::Link => "Link",
            NodeKind::Hydropower { .. } => "Hydropower",
            NodeKind::Gauge => "Gauge",
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, NodeKind::Storage { .. })
    }
}

/// One network node and the policies bound to its slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Slot name (e.g. "max_flow") → policy name
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Rim dam modelled only at daily resolution
    #[serde(default)]
    pub daily_only: bool,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parameters: BTreeMap::new(),
            daily_only: false,
        }
    }

    pub fn with_parameter(mut self, slot: impl Into<String>, policy: impl Into<String>) -> Self {
        self.parameters.insert(slot.into(), policy.into());
        self
    }

    pub fn daily_only(mut self) -> Self {
        self.daily_only = true;
        self
    }

    /// Policy bound to `slot`, if any
    pub fn slot(&self, slot: &str) -> Option<&str> {
        self.parameters.get(slot).map(String::as_str)
    }
}

/// Table either inlined or loaded from a JSON file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub data: Option<Table>,
}

impl TableDef {
    pub fn inline(table: Table) -> Self {
        Self {
            url: None,
            data: Some(table),
        }
    }

    pub fn file(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            data: None,
        }
    }
}

/// Complete basin model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    pub timestepper: Timestepper,
    #[serde(default)]
    pub scenarios: Vec<ScenarioDimension>,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub parameters: BTreeMap<String, PolicyDef>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableDef>,
}

/// Default horizon for a climate dataset: water years 1981-2012 for the
/// historical record, 2031-2060 for projections
pub fn default_horizon(climate: &str) -> (NaiveDate, NaiveDate) {
    let (start_year, end_year) = if climate == HISTORICAL_CLIMATE {
        (1980, 2012)
    } else {
        (2030, 2060)
    };
    (water_year_start(start_year), water_year_end(end_year))
}

fn water_year_start(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 10, 1).unwrap_or(NaiveDate::MIN)
}

fn water_year_end(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 9, 30).unwrap_or(NaiveDate::MAX)
}

impl ModelDefinition {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn node(&self, name: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Specialize the definition for one run
    ///
    /// Observed-data tables and parameters are dropped, table URLs are
    /// pointed at `data_path` and the `climate` dataset, the price-year
    /// scenario dimension and its parameter are appended, and the horizon
    /// is set.
    pub fn normalize(
        &mut self,
        climate: &str,
        price_years: &[f64],
        data_path: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), ConfigurationError> {
        if end < start {
            return Err(ConfigurationError::InvalidHorizon(
                TimeError::InvalidHorizon { start, end }.to_string(),
            ));
        }
        if price_years.is_empty() {
            return Err(ConfigurationError::InvalidHorizon(
                "at least one price year is required".to_string(),
            ));
        }

        self.tables.retain(|name, _| !is_observed(name));
        self.parameters.retain(|name, _| !is_observed(name));

        for table in self.tables.values_mut() {
            if let Some(url) = table.url.as_mut() {
                if let Some(data_path) = data_path {
                    *url = url.replace("../data", data_path);
                }
                if climate != HISTORICAL_CLIMATE {
                    *url = url.replace(HISTORICAL_CLIMATE, climate);
                }
            }
        }

        self.scenarios.retain(|d| d.name != PRICE_YEAR);
        self.scenarios.push(ScenarioDimension::new(PRICE_YEAR, price_years.len()));
        self.parameters.insert(
            PRICE_YEAR.to_string(),
            PolicyDef::new(BaseRule::ScenarioConstant {
                dimension: PRICE_YEAR.to_string(),
                values: price_years.to_vec(),
            }),
        );

        self.timestepper.start = start;
        self.timestepper.end = end;
        Ok(())
    }

    /// Remove gauges and observed-data parameters, and unbind any slot that
    /// referenced a removed parameter
    pub fn simplify(&mut self) {
        self.nodes.retain(|n| !matches!(n.kind, NodeKind::Gauge));
        self.parameters.retain(|name, _| !is_observed(name));
        self.unbind_missing_parameters();
    }

    /// Derive the monthly planning variant of this (daily) definition
    pub fn prepare_planning(&self, months: u32, remove_rim_dams: bool) -> Result<ModelDefinition, ConfigurationError> {
        if months == 0 {
            return Err(ConfigurationError::InvalidHorizon(
                "planning horizon must be at least one month".to_string(),
            ));
        }
        let mut planning = self.clone();
        planning.name = format!("{} (planning)", self.name);
        planning.timestepper.resolution = Resolution::Monthly;
        planning.timestepper.horizon_months = Some(months);
        if remove_rim_dams {
            planning.nodes.retain(|n| !n.daily_only);
        }
        Ok(planning)
    }

    /// SHA-256 of the canonical JSON form
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        let json = serde_json::to_string(&value)?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn unbind_missing_parameters(&mut self) {
        let known: BTreeSet<&str> = self.parameters.keys().map(String::as_str).collect();
        for node in &mut self.nodes {
            node.parameters.retain(|_, policy| known.contains(policy.as_str()));
        }
    }
}

fn is_observed(name: &str) -> bool {
    name.to_lowercase().contains(OBSERVED)
}
