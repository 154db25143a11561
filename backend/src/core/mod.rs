//! Core simulation primitives: calendar time and unit conversion

pub mod time;
pub mod units;
