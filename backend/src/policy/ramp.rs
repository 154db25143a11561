//! Ramp-rate limiting
//!
//! A ramp-limited policy may move at most `rate × |step length|` away from
//! its previous value per step, with separate rates for increases and
//! decreases that can differ by calendar month.
//!
//! Ramp limits are a daily operational concept. In planning mode a
//! ramp-limited policy returns its `planning_bound` instead, which is an
//! effectively unconstrained value.

use crate::core::time::Timestep;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_planning_bound() -> f64 {
    1e6
}

/// Rate that may differ by calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRate {
    pub default: f64,
    /// Month (1..=12) → rate overriding `default`
    #[serde(default)]
    pub months: BTreeMap<u32, f64>,
}

impl MonthlyRate {
    pub fn constant(rate: f64) -> Self {
        Self {
            default: rate,
            months: BTreeMap::new(),
        }
    }

    pub fn with_month(mut self, month: u32, rate: f64) -> Self {
        self.months.insert(month, rate);
        self
    }

    pub fn rate(&self, month: u32) -> f64 {
        self.months.get(&month).copied().unwrap_or(self.default)
    }

    fn validate(&self, label: &str) -> Result<(), String> {
        if !self.default.is_finite() || self.default < 0.0 {
            return Err(format!("{} rate must be a non-negative number, got {}", label, self.default));
        }
        for (month, rate) in &self.months {
            if !(1..=12).contains(month) {
                return Err(format!("{} rate declared for invalid month {}", label, month));
            }
            if !rate.is_finite() || *rate < 0.0 {
                return Err(format!("{} rate for month {} must be non-negative, got {}", label, month, rate));
            }
        }
        Ok(())
    }
}

/// Ramp limit attached to a policy
///
/// # Example
/// ```
/// use basin_simulator_core_rs::policy::ramp::{MonthlyRate, RampSpec};
///
/// // 0.35 per day in June, 0.25 otherwise, for both directions
/// let rate = MonthlyRate::constant(0.25).with_month(6, 0.35);
/// let ramp = RampSpec::symmetric(30.0 / 35.31, rate);
/// assert_eq!(ramp.up.rate(6), 0.35);
/// assert_eq!(ramp.down.rate(7), 0.25);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RampSpec {
    /// Previous value assumed on the first scheduling step
    pub initial_value: f64,
    /// Maximum increase per day
    pub up: MonthlyRate,
    /// Maximum decrease per day
    pub down: MonthlyRate,
    /// Value returned in planning mode
    #[serde(default = "default_planning_bound")]
    pub planning_bound: f64,
}

impl RampSpec {
    pub fn new(initial_value: f64, up: MonthlyRate, down: MonthlyRate) -> Self {
        Self {
            initial_value,
            up,
            down,
            planning_bound: default_planning_bound(),
        }
    }

    pub fn symmetric(initial_value: f64, rate: MonthlyRate) -> Self {
        Self::new(initial_value, rate.clone(), rate)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.initial_value.is_finite() {
            return Err(format!("ramp initial value must be finite, got {}", self.initial_value));
        }
        if !self.planning_bound.is_finite() {
            return Err(format!("ramp planning bound must be finite, got {}", self.planning_bound));
        }
        self.up.validate("up")?;
        self.down.validate("down")
    }

    /// Clamp `ideal` to within the allowed movement from `previous`
    pub fn limit(&self, ideal: f64, previous: f64, timestep: &Timestep) -> f64 {
        let span = timestep.duration_days().abs();
        let month = timestep.month();
        let upper = previous + self.up.rate(month) * span;
        let lower = previous - self.down.rate(month) * span;
        ideal.max(lower).min(upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::Resolution;
    use chrono::NaiveDate;

    fn day(m: u32, d: u32) -> Timestep {
        Timestep::new(0, NaiveDate::from_ymd_opt(2001, m, d).unwrap(), Resolution::Daily)
    }

    #[test]
    fn test_limit_uses_month_specific_up_rate() {
        let ramp = RampSpec::new(
            1.0,
            MonthlyRate::constant(0.25).with_month(6, 0.35),
            MonthlyRate::constant(0.1),
        );
        assert!((ramp.limit(10.0, 1.0, &day(6, 3)) - 1.35).abs() < 1e-12);
        assert!((ramp.limit(10.0, 1.0, &day(7, 3)) - 1.25).abs() < 1e-12);
        assert!((ramp.limit(0.0, 1.0, &day(6, 3)) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_value_inside_band_passes_through() {
        let ramp = RampSpec::symmetric(1.0, MonthlyRate::constant(0.5));
        assert_eq!(ramp.limit(1.2, 1.0, &day(1, 1)), 1.2);
    }

    #[test]
    fn test_negative_rate_rejected() {
        let ramp = RampSpec::symmetric(1.0, MonthlyRate::constant(-0.1));
        assert!(ramp.validate().is_err());
    }
}
