//! Unit conversion for flows and volumes
//!
//! All policy outputs that reach the solver pass through this module.
//! Conversions go through an SI base (m³ for volumes, m³/s for rates), so
//! every compatible pair round-trips.
//!
//! Volume-per-day units are rates: a flow expressed as "m^3 day^-1" and one
//! expressed as "m^3 s^-1" share a dimension and convert by a factor of 86 400.
//!
//! # Example
//! ```
//! use basin_simulator_core_rs::core::units::{convert, Unit};
//!
//! // 1 m³/s delivered for a day, reported in million m³ per day
//! let mcm = convert(1.0, Unit::CubicMetersPerSecond, Unit::CubicMetersPerDay, 1.0, 1e6).unwrap();
//! assert!((mcm - 0.0864).abs() < 1e-12);
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Seconds in one day
pub const SECONDS_IN_DAY: f64 = 86_400.0;

/// Cubic feet per second in one cubic meter per second, as used by the
/// basin schedules (cfs tables are divided by this to get m³/s)
pub const CFS_PER_CMS: f64 = 35.31;

/// Cubic meters in one acre-foot
pub const CUBIC_METERS_PER_ACRE_FOOT: f64 = 1_233.481_837_547_52;

/// Errors raised by unit parsing or conversion
#[derive(Debug, Error, Clone, PartialEq)]
pub enum UnitError {
    #[error("unknown unit '{0}'")]
    Unknown(String),

    #[error("cannot convert {from} to {to}: incompatible dimensions")]
    Incompatible { from: Unit, to: Unit },

    #[error("scale factor must be finite and non-zero, got {0}")]
    InvalidScale(f64),
}

/// Physical dimension of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Volume per unit time
    Flow,
    Volume,
}

/// Units understood by the converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    CubicMetersPerSecond,
    CubicMetersPerDay,
    CubicFeetPerSecond,
    AcreFeetPerDay,
    CubicMeters,
    AcreFeet,
}

impl Unit {
    pub const ALL: [Unit; 6] = [
        Unit::CubicMetersPerSecond,
        Unit::CubicMetersPerDay,
        Unit::CubicFeetPerSecond,
        Unit::AcreFeetPerDay,
        Unit::CubicMeters,
        Unit::AcreFeet,
    ];

    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::CubicMetersPerSecond
            | Unit::CubicMetersPerDay
            | Unit::CubicFeetPerSecond
            | Unit::AcreFeetPerDay => Dimension::Flow,
            Unit::CubicMeters | Unit::AcreFeet => Dimension::Volume,
        }
    }

    /// Multiplier from this unit to its SI base
    fn to_base(&self) -> f64 {
        match self {
            Unit::CubicMetersPerSecond => 1.0,
            Unit::CubicMetersPerDay => 1.0 / SECONDS_IN_DAY,
            Unit::CubicFeetPerSecond => 1.0 / CFS_PER_CMS,
            Unit::AcreFeetPerDay => CUBIC_METERS_PER_ACRE_FOOT / SECONDS_IN_DAY,
            Unit::CubicMeters => 1.0,
            Unit::AcreFeet => CUBIC_METERS_PER_ACRE_FOOT,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::CubicMetersPerSecond => "m^3 s^-1",
            Unit::CubicMetersPerDay => "m^3 day^-1",
            Unit::CubicFeetPerSecond => "ft^3 s^-1",
            Unit::AcreFeetPerDay => "AF day^-1",
            Unit::CubicMeters => "m^3",
            Unit::AcreFeet => "AF",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "m^3 s^-1" | "m3/s" | "cms" => Ok(Unit::CubicMetersPerSecond),
            "m^3 day^-1" | "m3/day" => Ok(Unit::CubicMetersPerDay),
            "ft^3 s^-1" | "cfs" => Ok(Unit::CubicFeetPerSecond),
            "AF day^-1" | "af/day" => Ok(Unit::AcreFeetPerDay),
            "m^3" | "m3" => Ok(Unit::CubicMeters),
            "AF" | "af" => Ok(Unit::AcreFeet),
            other => Err(UnitError::Unknown(other.to_string())),
        }
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.symbol())
    }
}

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Convert `value` from one unit to another
///
/// `value * scale_in` is read in `from`; the result in `to` is divided by
/// `scale_out` (e.g. `scale_out = 1e6` reports million cubic meters).
pub fn convert(value: f64, from: Unit, to: Unit, scale_in: f64, scale_out: f64) -> Result<f64, UnitError> {
    Ok(value * factor(from, to, scale_in, scale_out)?)
}

fn factor(from: Unit, to: Unit, scale_in: f64, scale_out: f64) -> Result<f64, UnitError> {
    if from.dimension() != to.dimension() {
        return Err(UnitError::Incompatible { from, to });
    }
    for scale in [scale_in, scale_out] {
        if !scale.is_finite() || scale == 0.0 {
            return Err(UnitError::InvalidScale(scale));
        }
    }
    Ok(scale_in * from.to_base() / to.to_base() / scale_out)
}

fn one() -> f64 {
    1.0
}

/// Declarative conversion attached to a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSpec {
    pub from: Unit,
    pub to: Unit,
    #[serde(default = "one")]
    pub scale_in: f64,
    #[serde(default = "one")]
    pub scale_out: f64,
}

impl ConversionSpec {
    /// Rate in m³/s to million m³ per day, the solver's flow unit
    pub fn cms_to_mcm_per_day() -> Self {
        Self {
            from: Unit::CubicMetersPerSecond,
            to: Unit::CubicMetersPerDay,
            scale_in: 1.0,
            scale_out: 1e6,
        }
    }

    /// Validate the units and scales and capture the linear factor
    pub fn compile(&self) -> Result<Conversion, UnitError> {
        Ok(Conversion {
            factor: factor(self.from, self.to, self.scale_in, self.scale_out)?,
        })
    }
}

/// Validated linear conversion; applying it cannot fail
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    factor: f64,
}

impl Conversion {
    pub fn identity() -> Self {
        Self { factor: 1.0 }
    }

    pub fn apply(&self, value: f64) -> f64 {
        value * self.factor
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cfs_to_cms_matches_schedule_convention() {
        let cms = convert(35.31, Unit::CubicFeetPerSecond, Unit::CubicMetersPerSecond, 1.0, 1.0).unwrap();
        assert!((cms - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_flow_to_volume_rejected() {
        let err = convert(1.0, Unit::CubicMetersPerSecond, Unit::CubicMeters, 1.0, 1.0).unwrap_err();
        assert!(matches!(err, UnitError::Incompatible { .. }));
    }

    #[test]
    fn test_zero_scale_rejected() {
        assert!(convert(1.0, Unit::AcreFeet, Unit::CubicMeters, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_unit_symbols_parse_back() {
        for unit in Unit::ALL {
            assert_eq!(unit.symbol().parse::<Unit>().unwrap(), unit);
        }
    }
}
