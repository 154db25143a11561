//! Model mode: which resolution a policy is being evaluated for

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a model is running the daily operational simulation or the
/// monthly look-ahead. Every time-varying policy branches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Daily resolution, tight operational constraints
    #[default]
    Scheduling,
    /// Monthly resolution, aggregate or relaxed constraints
    Planning,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Scheduling => f.write_str("scheduling"),
            Mode::Planning => f.write_str("planning"),
        }
    }
}
