//! Table Store
//!
//! Read-only lookup tables shared by every policy evaluation: water-year
//! classifications, day-of-year schedules with one column per year type,
//! flood-control curves, observed or forecast series.
//!
//! The store is filled once while a model is loaded and never written during
//! a run, so it can be shared across parallel runs behind an `Arc` without
//! any locking.
//!
//! # Table kinds
//!
//! - **yearly**: water year → value
//! - **daily**: column × month-day key ("MM-DD") → value
//! - **series**: column × date → value
//!
//! Scheduling-mode policies use point lookups; planning-mode policies use
//! range lookups aggregated with [`Aggregation`].

use crate::core::time::DayKey;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors raised by table lookups
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("table '{0}' not found")]
    MissingTable(String),

    #[error("table '{table}' is a {found} table, expected {expected}")]
    WrongKind {
        table: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("table '{table}' has no column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("table '{table}' has no entry for water year {year}")]
    MissingYear { table: String, year: i32 },

    #[error("table '{table}' column '{column}' has no entry for {key}")]
    MissingDay { table: String, column: String, key: DayKey },

    #[error("table '{table}' column '{column}' has no entry for {date}")]
    MissingDate { table: String, column: String, date: NaiveDate },

    #[error("table '{table}' column '{column}' has no entries between {start} and {end}")]
    EmptyRange { table: String, column: String, start: String, end: String },

    #[error("table '{table}' classifies water year {year} as {code}, expected 1-5")]
    InvalidYearType { table: String, year: i32, code: f64 },
}

/// A single lookup table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Table {
    Yearly { values: BTreeMap<i32, f64> },
    Daily { columns: BTreeMap<String, BTreeMap<DayKey, f64>> },
    Series { columns: BTreeMap<String, BTreeMap<NaiveDate, f64>> },
}

impl Table {
    fn kind(&self) -> &'static str {
        match self {
            Table::Yearly { .. } => "yearly",
            Table::Daily { .. } => "daily",
            Table::Series { .. } => "series",
        }
    }
}

/// How a range lookup is reduced to one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Mean,
    Sum,
}

impl Aggregation {
    fn reduce(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().sum();
        Some(match self {
            Aggregation::Sum => sum,
            Aggregation::Mean => sum / values.len() as f64,
        })
    }
}

/// Water-year type, from driest to wettest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum YearType {
    Critical = 1,
    Dry = 2,
    BelowNormal = 3,
    AboveNormal = 4,
    Wet = 5,
}

impl YearType {
    pub const ALL: [YearType; 5] = [
        YearType::Critical,
        YearType::Dry,
        YearType::BelowNormal,
        YearType::AboveNormal,
        YearType::Wet,
    ];

    /// Map a classification code (1..=5) to a year type
    pub fn from_code(code: f64) -> Option<Self> {
        if code.fract() != 0.0 {
            return None;
        }
        match code as i64 {
            1 => Some(YearType::Critical),
            2 => Some(YearType::Dry),
            3 => Some(YearType::BelowNormal),
            4 => Some(YearType::AboveNormal),
            5 => Some(YearType::Wet),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Column name used by demand and requirement schedules
    pub fn column_name(&self) -> &'static str {
        match self {
            YearType::Critical => "Critical",
            YearType::Dry => "Dry",
            YearType::BelowNormal => "Below",
            YearType::AboveNormal => "Above",
            YearType::Wet => "Wet",
        }
    }
}

/// Named, read-only collection of tables
#[derive(Debug, Clone, Default)]
pub struct TableStore {
    tables: HashMap<String, Table>,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, table: Table) {
        self.tables.insert(name.into(), table);
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Table names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn table(&self, name: &str) -> Result<&Table, TableError> {
        self.tables
            .get(name)
            .ok_or_else(|| TableError::MissingTable(name.to_string()))
    }

    fn wrong_kind(name: &str, found: &Table, expected: &'static str) -> TableError {
        TableError::WrongKind {
            table: name.to_string(),
            expected,
            found: found.kind(),
        }
    }

    /// Value of a yearly table for a water year
    pub fn year_value(&self, name: &str, year: i32) -> Result<f64, TableError> {
        match self.table(name)? {
            Table::Yearly { values } => values.get(&year).copied().ok_or(TableError::MissingYear {
                table: name.to_string(),
                year,
            }),
            other => Err(Self::wrong_kind(name, other, "yearly")),
        }
    }

    /// Classify a water year from a yearly table of codes 1..=5
    ///
    /// Depends on the water year alone, so repeated calls agree.
    pub fn year_type(&self, name: &str, year: i32) -> Result<YearType, TableError> {
        let code = self.year_value(name, year)?;
        YearType::from_code(code).ok_or(TableError::InvalidYearType {
            table: name.to_string(),
            year,
            code,
        })
    }

    fn daily_column(&self, name: &str, column: &str) -> Result<&BTreeMap<DayKey, f64>, TableError> {
        match self.table(name)? {
            Table::Daily { columns } => columns.get(column).ok_or_else(|| TableError::MissingColumn {
                table: name.to_string(),
                column: column.to_string(),
            }),
            other => Err(Self::wrong_kind(name, other, "daily")),
        }
    }

    fn series_column(&self, name: &str, column: &str) -> Result<&BTreeMap<NaiveDate, f64>, TableError> {
        match self.table(name)? {
            Table::Series { columns } => columns.get(column).ok_or_else(|| TableError::MissingColumn {
                table: name.to_string(),
                column: column.to_string(),
            }),
            other => Err(Self::wrong_kind(name, other, "series")),
        }
    }

    /// Point lookup in a day-of-year schedule
    pub fn day_value(&self, name: &str, column: &str, key: DayKey) -> Result<f64, TableError> {
        self.daily_column(name, column)?
            .get(&key)
            .copied()
            .ok_or_else(|| TableError::MissingDay {
                table: name.to_string(),
                column: column.to_string(),
                key,
            })
    }

    /// Aggregate a day-of-year schedule over `[start, end]`
    ///
    /// Keys missing inside the range are skipped. When `end` precedes `start`
    /// the range wraps around the end of the calendar year.
    pub fn day_range(
        &self,
        name: &str,
        column: &str,
        start: DayKey,
        end: DayKey,
        aggregation: Aggregation,
    ) -> Result<f64, TableError> {
        let series = self.daily_column(name, column)?;
        let values: Vec<f64> = if start <= end {
            series.range(start..=end).map(|(_, v)| *v).collect()
        } else {
            series
                .range(start..)
                .chain(series.range(..=end))
                .map(|(_, v)| *v)
                .collect()
        };
        aggregation.reduce(&values).ok_or_else(|| TableError::EmptyRange {
            table: name.to_string(),
            column: column.to_string(),
            start: start.to_string(),
            end: end.to_string(),
        })
    }

    /// Point lookup in a dated series
    pub fn date_value(&self, name: &str, column: &str, date: NaiveDate) -> Result<f64, TableError> {
        self.series_column(name, column)?
            .get(&date)
            .copied()
            .ok_or_else(|| TableError::MissingDate {
                table: name.to_string(),
                column: column.to_string(),
                date,
            })
    }

    /// Aggregate a dated series over `[start, end]`
    pub fn date_range(
        &self,
        name: &str,
        column: &str,
        start: NaiveDate,
        end: NaiveDate,
        aggregation: Aggregation,
    ) -> Result<f64, TableError> {
        let values: Vec<f64> = self
            .series_column(name, column)?
            .range(start..=end)
            .map(|(_, v)| *v)
            .collect();
        aggregation.reduce(&values).ok_or_else(|| TableError::EmptyRange {
            table: name.to_string(),
            column: column.to_string(),
            start: start.to_string(),
            end: end.to_string(),
        })
    }
}
