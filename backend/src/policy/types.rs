// Declarative policy definitions
//
// One generic policy type covers the per-node rules of a basin model. Each
// policy is a small JSON description: where the base value comes from, how
// it is scaled, whether a ramp limit or a scenario-triggered step change
// applies, and which unit conversion reaches the solver. Genuinely bespoke
// computations go through a named custom function.

use crate::core::units::ConversionSpec;
use crate::network::Attribute;
use crate::policy::ramp::RampSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// POLICY DEFINITION
// ============================================================================

/// Complete definition of one named policy
///
/// Evaluation pipeline: base value → scaling factors → step-change
/// reduction → offset → ramp limit → unit conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDef {
    /// Originating definition (file, table or document) for diagnostics
    #[serde(default)]
    pub source: Option<String>,

    /// Where the unscaled value comes from
    pub base: BaseRule,

    /// Multipliers applied to the base value, in order
    #[serde(default)]
    pub scaling: Vec<ScalingRule>,

    /// Day-over-day change limit (scheduling mode only)
    #[serde(default)]
    pub ramp: Option<RampSpec>,

    /// One-time reduction triggered on a calendar day for one scenario member
    #[serde(default)]
    pub step_change: Option<StepChangeSpec>,

    /// Per-scenario magnitudes other policies may read as step changes
    #[serde(default)]
    pub levels: Option<ScenarioLevels>,

    /// Added after scaling, before the ramp limit
    #[serde(default)]
    pub offset: f64,

    /// Conversion to the solver's unit
    #[serde(default)]
    pub convert: Option<ConversionSpec>,
}

impl PolicyDef {
    pub fn new(base: BaseRule) -> Self {
        Self {
            source: None,
            base,
            scaling: Vec::new(),
            ramp: None,
            step_change: None,
            levels: None,
            offset: 0.0,
            convert: None,
        }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(BaseRule::Constant { value })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_scaling(mut self, rule: ScalingRule) -> Self {
        self.scaling.push(rule);
        self
    }

    pub fn with_ramp(mut self, ramp: RampSpec) -> Self {
        self.ramp = Some(ramp);
        self
    }

    pub fn with_step_change(mut self, step_change: StepChangeSpec) -> Self {
        self.step_change = Some(step_change);
        self
    }

    pub fn with_levels(mut self, levels: ScenarioLevels) -> Self {
        self.levels = Some(levels);
        self
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_conversion(mut self, conversion: ConversionSpec) -> Self {
        self.convert = Some(conversion);
        self
    }

    /// Names of policies whose value for the same step this policy reads
    pub fn same_step_references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        match &self.base {
            BaseRule::Interpolate { upper, lower, .. } => {
                refs.push(upper.as_str());
                refs.push(lower.as_str());
            }
            BaseRule::Reference { parameter, planning } => {
                refs.push(parameter.as_str());
                if let Some(planning) = planning {
                    refs.push(planning.as_str());
                }
            }
            BaseRule::Custom { depends_on, .. } => {
                refs.extend(depends_on.iter().map(String::as_str));
            }
            _ => {}
        }
        for rule in &self.scaling {
            let ScalingRule::QuadraticIndex { index, .. } = rule;
            if let IndexSource::Parameter { name, planning } = index {
                refs.push(name.as_str());
                if let Some(planning) = planning {
                    refs.push(planning.as_str());
                }
            }
        }
        refs
    }
}

// ============================================================================
// BASE RULES
// ============================================================================

/// Source of a policy's unscaled value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BaseRule {
    /// Fixed value
    Constant { value: f64 },

    /// One value per member of a scenario dimension
    ScenarioConstant { dimension: String, values: Vec<f64> },

    /// Day-of-year schedule; point lookup when scheduling, monthly rule when planning
    DailyTable {
        table: String,
        column: ColumnSelector,
        #[serde(default)]
        planning: PlanningRule,
    },

    /// Dated series; point lookup when scheduling, monthly rule when planning
    Series {
        table: String,
        column: String,
        #[serde(default)]
        planning: PlanningRule,
    },

    /// Yearly table keyed by water year
    YearTable { table: String },

    /// `weight * (upper - lower) + lower` from two same-step values
    Interpolate {
        upper: String,
        lower: String,
        weight: WeightRule,
    },

    /// Another policy's value; `planning` names a replacement used in planning mode
    Reference {
        parameter: String,
        #[serde(default)]
        planning: Option<String>,
    },

    /// Published planning target for the month of the current step
    PlanningTarget {
        node: String,
        attribute: Attribute,
        /// Spread the monthly value evenly over the days of the month
        #[serde(default)]
        per_day: bool,
        /// Used in planning mode and before the first publication
        fallback: f64,
    },

    /// Registered function for bespoke computations
    Custom {
        function: String,
        #[serde(default)]
        depends_on: Vec<String>,
    },
}

/// Which column of a daily schedule to read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnSelector {
    Fixed { name: String },

    /// Column named after the current water year's classification
    YearType {
        /// Yearly table of classification codes 1..=5
        table: String,
        /// Column names for codes 1..=5; defaults to Critical, Dry, Below, Above, Wet
        #[serde(default)]
        names: Option<Vec<String>>,
    },
}

/// How a scheduled value is expressed at monthly resolution
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanningRule {
    /// Mean over the days of the month
    #[default]
    Mean,
    /// Sum over the days of the month
    Sum,
    /// Effectively unconstrained bound
    Bound { value: f64 },
    /// Point lookup on the first day of the month
    Same,
}

/// Interpolation weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WeightRule {
    Constant { value: f64 },
    /// Keyed by week of the calendar year (1..=53)
    Weekly {
        weights: BTreeMap<u32, f64>,
        #[serde(default)]
        default: f64,
    },
    /// Keyed by calendar month (1..=12)
    Monthly {
        weights: BTreeMap<u32, f64>,
        #[serde(default)]
        default: f64,
    },
}

// ============================================================================
// SCALING AND STEP CHANGES
// ============================================================================

/// Multiplier applied to the base value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScalingRule {
    /// `a x² + b x + c` for an index value `x`
    QuadraticIndex {
        index: IndexSource,
        a: f64,
        b: f64,
        #[serde(default)]
        c: f64,
    },
}

/// Where an index value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexSource {
    /// Another policy's same-step value; `planning` replaces it in planning mode
    Parameter {
        name: String,
        #[serde(default)]
        planning: Option<String>,
    },
    /// Yearly table keyed by water year
    YearTable { table: String },
}

/// Magnitudes indexed by position along one scenario dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioLevels {
    pub dimension: String,
    pub values: Vec<f64>,
}

/// One-time reduction keyed to a scenario member and calendar day
///
/// On `month`/`day`, scenarios whose position along `dimension` equals
/// `active_index` take the magnitude from `source`'s levels and keep it for
/// the rest of the run. The value is multiplied by `1 - magnitude`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepChangeSpec {
    pub dimension: String,
    pub active_index: usize,
    pub month: u32,
    pub day: u32,
    pub source: String,
}
