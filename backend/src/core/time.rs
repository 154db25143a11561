//! Time management for the simulation
//!
//! The daily model advances one calendar day per step; the planning model
//! advances one calendar month per step. Both use [`Timestep`], so a policy
//! sees the same derived calendar fields (month, day, water year, days in
//! month) regardless of which model invoked it.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// First calendar month of a water year (October)
pub const WATER_YEAR_START_MONTH: u32 = 10;

/// Errors raised by calendar handling
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimeError {
    #[error("invalid month-day key '{0}' (expected MM-DD)")]
    InvalidDayKey(String),

    #[error("invalid horizon: end {end} precedes start {start}")]
    InvalidHorizon { start: NaiveDate, end: NaiveDate },

    #[error("date arithmetic overflowed at {0}")]
    Overflow(NaiveDate),
}

/// Step length of a model run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Daily,
    Monthly,
}

/// Number of days in the given calendar month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(31)
}

/// Water year of a date. October through December belong to the next
/// calendar year's water year.
pub fn water_year(date: NaiveDate) -> i32 {
    if date.month() >= WATER_YEAR_START_MONTH {
        date.year() + 1
    } else {
        date.year()
    }
}

/// Month-day key used by day-of-year schedules, written "MM-DD"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey {
    month: u32,
    day: u32,
}

impl DayKey {
    /// Create a key, validating against a leap year so that 02-29 is legal
    pub fn new(month: u32, day: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(2000, month) {
            return None;
        }
        Some(Self { month, day })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl FromStr for DayKey {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TimeError::InvalidDayKey(s.to_string());
        let (month, day) = s.trim().split_once('-').ok_or_else(invalid)?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let day: u32 = day.parse().map_err(|_| invalid())?;
        DayKey::new(month, day).ok_or_else(invalid)
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A single simulated step
///
/// Carries the calendar date plus the fields policies derive from it.
/// Monthly steps are dated on the first of the month.
///
/// # Example
/// ```
/// use basin_simulator_core_rs::core::time::{Resolution, Timestep};
/// use chrono::NaiveDate;
///
/// let date = NaiveDate::from_ymd_opt(2001, 11, 15).unwrap();
/// let ts = Timestep::new(0, date, Resolution::Daily);
/// assert_eq!(ts.water_year(), 2002);
/// assert_eq!(ts.days_in_month(), 30);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestep {
    index: usize,
    date: NaiveDate,
    resolution: Resolution,
}

impl Timestep {
    pub fn new(index: usize, date: NaiveDate, resolution: Resolution) -> Self {
        Self {
            index,
            date,
            resolution,
        }
    }

    /// Position of this step within its run
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    pub fn day(&self) -> u32 {
        self.date.day()
    }

    pub fn water_year(&self) -> i32 {
        water_year(self.date)
    }

    pub fn day_key(&self) -> DayKey {
        DayKey::from_date(self.date)
    }

    pub fn days_in_month(&self) -> u32 {
        days_in_month(self.date.year(), self.date.month())
    }

    /// Last calendar day of this step's month
    pub fn month_end(&self) -> NaiveDate {
        self.date
            .with_day(self.days_in_month())
            .unwrap_or(self.date)
    }

    /// Week of the calendar year, counted in seven-day blocks from January 1
    pub fn week(&self) -> u32 {
        (self.date.ordinal() - 1) / 7 + 1
    }

    /// Length of the step in days
    pub fn duration_days(&self) -> f64 {
        match self.resolution {
            Resolution::Daily => 1.0,
            Resolution::Monthly => self.days_in_month() as f64,
        }
    }

    pub fn is_month_start(&self) -> bool {
        self.date.day() == 1
    }
}

/// Ordered, finite sequence of steps spanning `[start, end]`
///
/// Owned by one model. The end date may be pulled in once before a run
/// starts, to carve off the look-ahead tail needed by the last month's
/// planning sub-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationClock {
    start: NaiveDate,
    end: NaiveDate,
    resolution: Resolution,
}

impl SimulationClock {
    pub fn new(start: NaiveDate, end: NaiveDate, resolution: Resolution) -> Result<Self, TimeError> {
        if end < start {
            return Err(TimeError::InvalidHorizon { start, end });
        }
        Ok(Self {
            start,
            end,
            resolution,
        })
    }

    pub fn daily(start: NaiveDate, end: NaiveDate) -> Result<Self, TimeError> {
        Self::new(start, end, Resolution::Daily)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Replace both bounds
    pub fn set_bounds(&mut self, start: NaiveDate, end: NaiveDate) -> Result<(), TimeError> {
        if end < start {
            return Err(TimeError::InvalidHorizon { start, end });
        }
        self.start = start;
        self.end = end;
        Ok(())
    }

    /// Pull the end date in by `months` calendar months and return the new end
    pub fn carve_tail(&mut self, months: u32) -> Result<NaiveDate, TimeError> {
        let new_end = self
            .end
            .checked_sub_months(Months::new(months))
            .ok_or(TimeError::Overflow(self.end))?;
        if new_end < self.start {
            return Err(TimeError::InvalidHorizon {
                start: self.start,
                end: new_end,
            });
        }
        self.end = new_end;
        Ok(new_end)
    }

    /// Iterate the steps of this clock in ascending order
    pub fn timesteps(&self) -> ClockIter {
        let first = match self.resolution {
            Resolution::Daily => self.start,
            Resolution::Monthly => self.start.with_day(1).unwrap_or(self.start),
        };
        ClockIter {
            next: Some(first),
            end: self.end,
            index: 0,
            resolution: self.resolution,
        }
    }

    /// Number of steps in the clock
    pub fn len(&self) -> usize {
        self.timesteps().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `steps` monthly timesteps starting at the month containing `start`
    pub fn monthly_horizon(start: NaiveDate, steps: u32) -> Vec<Timestep> {
        let first = start.with_day(1).unwrap_or(start);
        (0..steps)
            .filter_map(|i| first.checked_add_months(Months::new(i)))
            .enumerate()
            .map(|(i, date)| Timestep::new(i, date, Resolution::Monthly))
            .collect()
    }
}

/// Iterator over the steps of a [`SimulationClock`]
#[derive(Debug, Clone)]
pub struct ClockIter {
    next: Option<NaiveDate>,
    end: NaiveDate,
    index: usize,
    resolution: Resolution,
}

impl Iterator for ClockIter {
    type Item = Timestep;

    fn next(&mut self) -> Option<Timestep> {
        let date = self.next.filter(|d| *d <= self.end)?;
        let step = Timestep::new(self.index, date, self.resolution);
        self.index += 1;
        self.next = match self.resolution {
            Resolution::Daily => date.succ_opt(),
            Resolution::Monthly => date.checked_add_months(Months::new(1)),
        };
        Some(step)
    }
}
