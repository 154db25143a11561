//! Result recording and collation
//!
//! The [`Recorder`] captures every solved node attribute of every scenario
//! member at every step into a [`ResultFrame`]. After a run, [`collate`]
//! groups the frame's columns by node type and attribute into tables, one
//! per (type, attribute), and derives hydropower generation.

use crate::core::time::Timestep;
use crate::models::ScenarioIndex;
use crate::network::{Attribute, NodeDef, NodeKind, SolvedStep};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Node type used for columns whose node is not part of the model
pub const OTHER_TYPE: &str = "Other";

/// Turbine efficiency × ρg, scaled to MWh per day of flow in mcm/day per metre of head
const GENERATION_FACTOR: f64 = 0.9 * 9.81 * 1000.0 / 1e6 * 24.0;

/// One recorded series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ColumnKey {
    pub node: String,
    pub attribute: Attribute,
    pub scenario: ScenarioIndex,
}

/// Recorded values, one row per step
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultFrame {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<ColumnKey, Vec<f64>>,
}

impl ResultFrame {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &BTreeMap<ColumnKey, Vec<f64>> {
        &self.columns
    }

    pub fn column(&self, node: &str, attribute: Attribute, scenario: &ScenarioIndex) -> Option<&[f64]> {
        self.columns
            .get(&ColumnKey {
                node: node.to_string(),
                attribute,
                scenario: scenario.clone(),
            })
            .map(Vec::as_slice)
    }

    pub fn value(&self, node: &str, attribute: Attribute, scenario: &ScenarioIndex, date: NaiveDate) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        self.column(node, attribute, scenario)?.get(row).copied()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Drop every row dated after `end`
    pub fn truncate_after(&mut self, end: NaiveDate) {
        let keep = self.dates.partition_point(|d| *d <= end);
        self.dates.truncate(keep);
        for column in self.columns.values_mut() {
            column.truncate(keep);
        }
    }
}

/// Accumulates solved steps into a [`ResultFrame`]
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    frame: ResultFrame,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one scenario member's solved step
    ///
    /// Members of the same step share a row; recording the same member twice
    /// for one step keeps the latest values.
    pub fn record(&mut self, timestep: &Timestep, scenario: &ScenarioIndex, solved: &SolvedStep) {
        let date = timestep.date();
        if self.frame.dates.last() != Some(&date) {
            self.frame.dates.push(date);
        }
        let row = self.frame.dates.len() - 1;
        for ((node, attribute), value) in &solved.values {
            let column = self
                .frame
                .columns
                .entry(ColumnKey {
                    node: node.clone(),
                    attribute: *attribute,
                    scenario: scenario.clone(),
                })
                .or_default();
            column.resize(row, f64::NAN);
            column.push(*value);
        }
    }

    pub fn rows(&self) -> usize {
        self.frame.dates.len()
    }

    pub fn clear(&mut self) {
        self.frame = ResultFrame::default();
    }

    /// Snapshot of the recorded values; gaps are NaN
    pub fn frame(&self) -> ResultFrame {
        let mut frame = self.frame.clone();
        let rows = frame.dates.len();
        for column in frame.columns.values_mut() {
            column.resize(rows, f64::NAN);
        }
        frame
    }
}

/// One collated output table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    /// "{Type}_{Quantity}_{unit}"
    pub name: String,
    pub node_type: String,
    pub quantity: String,
    pub unit: String,
    /// Names of the scenario dimensions indexing the columns
    pub scenario_names: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<(String, ScenarioIndex, Vec<f64>)>,
}

impl ResultTable {
    /// Write as CSV with one header line per column level
    pub fn write_csv(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.csv", self.name));
        fs::write(&path, self.to_csv())?;
        Ok(path)
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str("node");
        for (node, _, _) in &self.columns {
            out.push(',');
            out.push_str(node);
        }
        out.push('\n');
        for (level, name) in self.scenario_names.iter().enumerate() {
            out.push_str(name);
            for (_, scenario, _) in &self.columns {
                out.push(',');
                if let Some(position) = scenario.position(level) {
                    out.push_str(&position.to_string());
                }
            }
            out.push('\n');
        }
        out.push_str("Date\n");
        for (row, date) in self.dates.iter().enumerate() {
            out.push_str(&date.to_string());
            for (_, _, values) in &self.columns {
                out.push(',');
                if let Some(v) = values.get(row).filter(|v| !v.is_nan()) {
                    out.push_str(&v.to_string());
                }
            }
            out.push('\n');
        }
        out
    }
}

fn unit_of(attribute: Attribute) -> &'static str {
    match attribute {
        Attribute::Elevation => "m",
        _ => "mcm",
    }
}

/// Group a frame's columns into per-(node type, attribute) tables
///
/// Columns whose node is not in `nodes` are grouped under [`OTHER_TYPE`].
/// Hydropower flow tables additionally yield a generation table in MWh.
pub fn collate(frame: &ResultFrame, nodes: &[NodeDef], scenario_names: &[String]) -> Vec<ResultTable> {
    let by_name: HashMap<&str, &NodeDef> = nodes.iter().map(|n| (n.name.as_str(), n)).collect();

    let mut groups: BTreeMap<(&str, Attribute), Vec<(&ColumnKey, &Vec<f64>)>> = BTreeMap::new();
    for (key, values) in frame.columns() {
        let node_type = by_name
            .get(key.node.as_str())
            .map(|n| n.kind.type_name())
            .unwrap_or(OTHER_TYPE);
        groups.entry((node_type, key.attribute)).or_default().push((key, values));
    }

    let mut tables = Vec::new();
    for ((node_type, attribute), columns) in groups {
        let unit = unit_of(attribute);
        let table = ResultTable {
            name: format!("{}_{}_{}", node_type, attribute.title(), unit),
            node_type: node_type.to_string(),
            quantity: attribute.title().to_string(),
            unit: unit.to_string(),
            scenario_names: scenario_names.to_vec(),
            dates: frame.dates().to_vec(),
            columns: columns
                .iter()
                .map(|(key, values)| (key.node.clone(), key.scenario.clone(), (*values).clone()))
                .collect(),
        };

        if attribute == Attribute::Flow {
            if let Some(generation) = generation_table(&table, &by_name) {
                tables.push(table);
                tables.push(generation);
                continue;
            }
        }
        tables.push(table);
    }
    tables
}

/// Hydropower generation in MWh from a flow table, if its nodes have a head
fn generation_table(flow: &ResultTable, nodes: &HashMap<&str, &NodeDef>) -> Option<ResultTable> {
    let mut columns = Vec::with_capacity(flow.columns.len());
    for (node, scenario, values) in &flow.columns {
        let NodeKind::Hydropower { head } = nodes.get(node.as_str())?.kind else {
            return None;
        };
        let generated = values.iter().map(|q| q * head * GENERATION_FACTOR).collect();
        columns.push((node.clone(), scenario.clone(), generated));
    }
    Some(ResultTable {
        name: format!("{}_Generation_MWh", flow.node_type),
        node_type: flow.node_type.clone(),
        quantity: "Generation".to_string(),
        unit: "MWh".to_string(),
        scenario_names: flow.scenario_names.clone(),
        dates: flow.dates.clone(),
        columns,
    })
}

/// Write every table into `dir`
pub fn write_tables(tables: &[ResultTable], dir: &Path) -> io::Result<Vec<PathBuf>> {
    tables.iter().map(|t| t.write_csv(dir)).collect()
}
