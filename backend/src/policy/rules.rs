// Compiled policies
//
// A `PolicyDef` is compiled once when the registry is built: references are
// resolved to registry indices, scenario dimensions to positions, custom
// functions to their implementations and conversions to a linear factor.
// Evaluation then only fails on data problems, never on configuration ones.

use crate::core::time::DayKey;
use crate::core::units::Conversion;
use crate::models::{Mode, ScenarioIndex, ScenarioMemory, Scenarios};
use crate::network::Attribute;
use crate::policy::context::{EvalContext, PolicyError};
use crate::policy::ramp::RampSpec;
use crate::policy::registry::{FunctionRegistry, PolicyFunction};
use crate::policy::types::{
    BaseRule, ColumnSelector, IndexSource, PlanningRule, PolicyDef, ScalingRule, WeightRule,
};
use crate::policy::validation::ConfigurationError;
use crate::tables::{Aggregation, YearType};
use std::collections::{BTreeMap, HashMap};

/// Reference to another policy, resolved at build time
#[derive(Debug, Clone)]
pub(crate) struct ParamRef {
    index: usize,
    name: String,
}

impl ParamRef {
    fn value(&self, ctx: &EvalContext<'_>) -> Result<f64, PolicyError> {
        ctx.value_at(self.index, &self.name)
    }
}

/// Reference that may switch to another policy in planning mode
#[derive(Debug, Clone)]
struct ModalRef {
    scheduling: ParamRef,
    planning: Option<ParamRef>,
}

impl ModalRef {
    fn value(&self, ctx: &EvalContext<'_>) -> Result<f64, PolicyError> {
        match (ctx.mode(), &self.planning) {
            (Mode::Planning, Some(planning)) => planning.value(ctx),
            _ => self.scheduling.value(ctx),
        }
    }
}

enum Column {
    Fixed(String),
    /// Chosen by the classification of the step's water year (October
    /// through September, named by its ending year), not the calendar year
    YearType { table: String, names: [String; 5] },
}

impl Column {
    fn resolve(&self, ctx: &EvalContext<'_>) -> Result<String, PolicyError> {
        match self {
            Column::Fixed(name) => Ok(name.clone()),
            Column::YearType { table, names } => {
                let year_type = ctx.tables().year_type(table, ctx.timestep().water_year())?;
                Ok(names[year_type.code() as usize - 1].clone())
            }
        }
    }
}

enum Base {
    Constant(f64),
    ScenarioConstant {
        dimension: String,
        position: usize,
        values: Vec<f64>,
    },
    DailyTable {
        table: String,
        column: Column,
        planning: PlanningRule,
    },
    Series {
        table: String,
        column: String,
        planning: PlanningRule,
    },
    YearTable(String),
    Interpolate {
        upper: ParamRef,
        lower: ParamRef,
        weight: WeightRule,
    },
    Reference(ModalRef),
    PlanningTarget {
        node: String,
        attribute: Attribute,
        per_day: bool,
        fallback: f64,
    },
    Custom(PolicyFunction),
}

impl Base {
    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<f64, PolicyError> {
        let ts = ctx.timestep();
        match self {
            Base::Constant(value) => Ok(*value),
            Base::ScenarioConstant {
                dimension,
                position,
                values,
            } => {
                let at = ctx
                    .scenario()
                    .position(*position)
                    .ok_or_else(|| PolicyError::UnknownScenarioDimension(dimension.clone()))?;
                values.get(at).copied().ok_or(PolicyError::ScenarioOutOfRange {
                    dimension: dimension.clone(),
                    position: at,
                    len: values.len(),
                })
            }
            Base::DailyTable {
                table,
                column,
                planning,
            } => {
                let column = column.resolve(ctx)?;
                let tables = ctx.tables();
                let start = ts.day_key();
                let month_range = |aggregation| {
                    let end = DayKey::from_date(ts.month_end());
                    tables.day_range(table, &column, start, end, aggregation)
                };
                match (ctx.mode(), planning) {
                    (Mode::Scheduling, _) | (Mode::Planning, PlanningRule::Same) => {
                        Ok(tables.day_value(table, &column, start)?)
                    }
                    (Mode::Planning, PlanningRule::Mean) => Ok(month_range(Aggregation::Mean)?),
                    (Mode::Planning, PlanningRule::Sum) => Ok(month_range(Aggregation::Sum)?),
                    (Mode::Planning, PlanningRule::Bound { value }) => Ok(*value),
                }
            }
            Base::Series {
                table,
                column,
                planning,
            } => {
                let tables = ctx.tables();
                let start = ts.date();
                match (ctx.mode(), planning) {
                    (Mode::Scheduling, _) | (Mode::Planning, PlanningRule::Same) => {
                        Ok(tables.date_value(table, column, start)?)
                    }
                    (Mode::Planning, PlanningRule::Mean) => {
                        Ok(tables.date_range(table, column, start, ts.month_end(), Aggregation::Mean)?)
                    }
                    (Mode::Planning, PlanningRule::Sum) => {
                        Ok(tables.date_range(table, column, start, ts.month_end(), Aggregation::Sum)?)
                    }
                    (Mode::Planning, PlanningRule::Bound { value }) => Ok(*value),
                }
            }
            Base::YearTable(table) => Ok(ctx.tables().year_value(table, ts.water_year())?),
            Base::Interpolate { upper, lower, weight } => {
                let upper = upper.value(ctx)?;
                let lower = lower.value(ctx)?;
                let w = match weight {
                    WeightRule::Constant { value } => *value,
                    WeightRule::Weekly { weights, default } => weights.get(&ts.week()).copied().unwrap_or(*default),
                    WeightRule::Monthly { weights, default } => weights.get(&ts.month()).copied().unwrap_or(*default),
                };
                Ok(w * (upper - lower) + lower)
            }
            Base::Reference(reference) => reference.value(ctx),
            Base::PlanningTarget {
                node,
                attribute,
                per_day,
                fallback,
            } => {
                let targets = match (ctx.mode(), ctx.targets()) {
                    (Mode::Scheduling, Some(targets)) => targets,
                    _ => return Ok(*fallback),
                };
                let monthly = targets
                    .value(ctx.scenario(), node, *attribute, ts.date())
                    .ok_or_else(|| PolicyError::MissingPlanningTarget {
                        node: node.clone(),
                        attribute: *attribute,
                        month: ts.date().format("%Y-%m").to_string(),
                    })?;
                if *per_day {
                    Ok(monthly / ts.days_in_month() as f64)
                } else {
                    Ok(monthly)
                }
            }
            Base::Custom(function) => (function.as_ref())(ctx),
        }
    }
}

enum IndexValue {
    Parameter(ModalRef),
    YearTable(String),
}

struct QuadraticScaling {
    index: IndexValue,
    a: f64,
    b: f64,
    c: f64,
}

impl QuadraticScaling {
    fn factor(&self, ctx: &EvalContext<'_>) -> Result<f64, PolicyError> {
        let x = match &self.index {
            IndexValue::Parameter(reference) => reference.value(ctx)?,
            IndexValue::YearTable(table) => ctx.tables().year_value(table, ctx.timestep().water_year())?,
        };
        Ok(self.a * x * x + self.b * x + self.c)
    }
}

struct StepChange {
    dimension: String,
    dimension_position: usize,
    active_index: usize,
    month: u32,
    day: u32,
    levels_dimension: String,
    levels_position: usize,
    levels: Vec<f64>,
}

impl StepChange {
    /// Current reduction for this scenario, recording a new one on the trigger day
    fn reduction(&self, ctx: &EvalContext<'_>, memory: &mut ScenarioMemory<f64>) -> Result<f64, PolicyError> {
        let ts = ctx.timestep();
        let scenario = ctx.scenario();
        if ts.month() == self.month && ts.day() == self.day {
            let member = scenario
                .position(self.dimension_position)
                .ok_or_else(|| PolicyError::UnknownScenarioDimension(self.dimension.clone()))?;
            if member == self.active_index {
                let at = scenario
                    .position(self.levels_position)
                    .ok_or_else(|| PolicyError::UnknownScenarioDimension(self.levels_dimension.clone()))?;
                let magnitude = self.levels.get(at).copied().ok_or(PolicyError::ScenarioOutOfRange {
                    dimension: self.levels_dimension.clone(),
                    position: at,
                    len: self.levels.len(),
                })?;
                memory.set(scenario, magnitude);
            }
        }
        Ok(*memory.get(scenario))
    }
}

/// Mutable per-scenario memory of one policy
///
/// Only moves forward in simulated time; nothing is rolled back when a
/// later step fails.
#[derive(Debug, Clone)]
pub struct PolicyState {
    last_value: ScenarioMemory<f64>,
    reduction: ScenarioMemory<f64>,
}

impl PolicyState {
    fn new(ramp_initial: f64) -> Self {
        Self {
            last_value: ScenarioMemory::new(ramp_initial),
            reduction: ScenarioMemory::new(0.0),
        }
    }

    /// Last ramp-limited value, before unit conversion
    pub fn last_value(&self, scenario: &ScenarioIndex) -> f64 {
        *self.last_value.get(scenario)
    }

    /// Step-change reduction currently in force
    pub fn reduction(&self, scenario: &ScenarioIndex) -> f64 {
        *self.reduction.get(scenario)
    }

    pub(crate) fn reset(&mut self) {
        self.last_value.reset();
        self.reduction.reset();
    }

    pub(crate) fn inherit_reductions(&mut self, from: &PolicyState) {
        self.reduction = from.reduction.clone();
    }
}

/// A policy ready for evaluation
pub(crate) struct CompiledPolicy {
    name: String,
    source: Option<String>,
    base: Base,
    scaling: Vec<QuadraticScaling>,
    ramp: Option<RampSpec>,
    step_change: Option<StepChange>,
    offset: f64,
    conversion: Conversion,
    dependencies: Vec<usize>,
}

impl CompiledPolicy {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub(crate) fn dependencies(&self) -> &[usize] {
        &self.dependencies
    }

    pub(crate) fn initial_state(&self) -> PolicyState {
        PolicyState::new(self.ramp.as_ref().map(|r| r.initial_value).unwrap_or(0.0))
    }

    pub(crate) fn evaluate(&self, ctx: &EvalContext<'_>, state: &mut PolicyState) -> Result<f64, PolicyError> {
        if let (Mode::Planning, Some(ramp)) = (ctx.mode(), &self.ramp) {
            return self.finish(ramp.planning_bound);
        }

        let mut value = self.base.evaluate(ctx)?;
        for scaling in &self.scaling {
            value *= scaling.factor(ctx)?;
        }
        if let Some(step) = &self.step_change {
            value *= 1.0 - step.reduction(ctx, &mut state.reduction)?;
        }
        value += self.offset;
        if !value.is_finite() {
            return Err(PolicyError::NonFinite(value));
        }

        if let Some(ramp) = &self.ramp {
            let scenario = ctx.scenario();
            value = ramp.limit(value, *state.last_value.get(scenario), ctx.timestep());
            state.last_value.set(scenario, value);
        }
        self.finish(value)
    }

    fn finish(&self, value: f64) -> Result<f64, PolicyError> {
        let out = self.conversion.apply(value);
        if out.is_finite() {
            Ok(out)
        } else {
            Err(PolicyError::NonFinite(out))
        }
    }
}

// ============================================================================
// Compilation
// ============================================================================

/// Build-time lookups shared by every policy being compiled
pub(crate) struct Compiler<'a> {
    pub index: &'a HashMap<String, usize>,
    pub defs: &'a BTreeMap<String, PolicyDef>,
    pub functions: &'a FunctionRegistry,
    pub scenarios: &'a Scenarios,
}

impl Compiler<'_> {
    pub(crate) fn compile(&self, name: &str, def: &PolicyDef) -> Result<CompiledPolicy, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidPolicy {
            policy: name.to_string(),
            reason,
        };

        let base = self.compile_base(name, &def.base)?;

        let mut scaling = Vec::new();
        for rule in &def.scaling {
            let ScalingRule::QuadraticIndex { index, a, b, c } = rule;
            let index = match index {
                IndexSource::Parameter { name: param, planning } => {
                    IndexValue::Parameter(self.modal_ref(name, param, planning.as_deref())?)
                }
                IndexSource::YearTable { table } => IndexValue::YearTable(table.clone()),
            };
            scaling.push(QuadraticScaling {
                index,
                a: *a,
                b: *b,
                c: *c,
            });
        }

        if let Some(ramp) = &def.ramp {
            ramp.validate().map_err(invalid)?;
        }

        let step_change = match &def.step_change {
            Some(spec) => {
                if !(1..=12).contains(&spec.month) || spec.day == 0 || spec.day > 31 {
                    return Err(invalid(format!("invalid trigger day {}-{}", spec.month, spec.day)));
                }
                let source = self.defs.get(&spec.source).ok_or_else(|| ConfigurationError::UnknownReference {
                    policy: name.to_string(),
                    reference: spec.source.clone(),
                })?;
                let levels = source
                    .levels
                    .as_ref()
                    .ok_or_else(|| invalid(format!("step-change source '{}' declares no levels", spec.source)))?;
                Some(StepChange {
                    dimension: spec.dimension.clone(),
                    dimension_position: self.dimension(name, &spec.dimension)?,
                    active_index: spec.active_index,
                    month: spec.month,
                    day: spec.day,
                    levels_dimension: levels.dimension.clone(),
                    levels_position: self.dimension(&spec.source, &levels.dimension)?,
                    levels: levels.values.clone(),
                })
            }
            None => None,
        };

        let conversion = match &def.convert {
            Some(spec) => spec.compile().map_err(|e| invalid(e.to_string()))?,
            None => Conversion::identity(),
        };

        if !def.offset.is_finite() {
            return Err(invalid(format!("offset must be finite, got {}", def.offset)));
        }

        let mut dependencies = Vec::new();
        for reference in def.same_step_references() {
            dependencies.push(self.resolve(name, reference)?.index);
        }

        Ok(CompiledPolicy {
            name: name.to_string(),
            source: def.source.clone(),
            base,
            scaling,
            ramp: def.ramp.clone(),
            step_change,
            offset: def.offset,
            conversion,
            dependencies,
        })
    }

    fn compile_base(&self, name: &str, rule: &BaseRule) -> Result<Base, ConfigurationError> {
        Ok(match rule {
            BaseRule::Constant { value } => Base::Constant(*value),
            BaseRule::ScenarioConstant { dimension, values } => {
                let position = self.dimension(name, dimension)?;
                let size = self.scenarios.size_of(dimension).unwrap_or(0);
                if values.len() != size {
                    return Err(ConfigurationError::InvalidPolicy {
                        policy: name.to_string(),
                        reason: format!("{} values declared for '{}' of size {}", values.len(), dimension, size),
                    });
                }
                Base::ScenarioConstant {
                    dimension: dimension.clone(),
                    position,
                    values: values.clone(),
                }
            }
            BaseRule::DailyTable {
                table,
                column,
                planning,
            } => Base::DailyTable {
                table: table.clone(),
                column: self.column(name, column)?,
                planning: *planning,
            },
            BaseRule::Series {
                table,
                column,
                planning,
            } => Base::Series {
                table: table.clone(),
                column: column.clone(),
                planning: *planning,
            },
            BaseRule::YearTable { table } => Base::YearTable(table.clone()),
            BaseRule::Interpolate { upper, lower, weight } => Base::Interpolate {
                upper: self.resolve(name, upper)?,
                lower: self.resolve(name, lower)?,
                weight: weight.clone(),
            },
            BaseRule::Reference { parameter, planning } => {
                Base::Reference(self.modal_ref(name, parameter, planning.as_deref())?)
            }
            BaseRule::PlanningTarget {
                node,
                attribute,
                per_day,
                fallback,
            } => Base::PlanningTarget {
                node: node.clone(),
                attribute: *attribute,
                per_day: *per_day,
                fallback: *fallback,
            },
            BaseRule::Custom { function, .. } => {
                let f = self
                    .functions
                    .get(function)
                    .ok_or_else(|| ConfigurationError::UnknownFunction {
                        policy: name.to_string(),
                        function: function.clone(),
                    })?;
                Base::Custom(f)
            }
        })
    }

    fn column(&self, name: &str, selector: &ColumnSelector) -> Result<Column, ConfigurationError> {
        match selector {
            ColumnSelector::Fixed { name } => Ok(Column::Fixed(name.clone())),
            ColumnSelector::YearType { table, names } => {
                let names = match names {
                    Some(names) => names.clone().try_into().map_err(|given: Vec<String>| {
                        ConfigurationError::InvalidPolicy {
                            policy: name.to_string(),
                            reason: format!("year-type selector needs 5 column names, got {}", given.len()),
                        }
                    })?,
                    None => YearType::ALL.map(|t| t.column_name().to_string()),
                };
                Ok(Column::YearType {
                    table: table.clone(),
                    names,
                })
            }
        }
    }

    fn resolve(&self, policy: &str, reference: &str) -> Result<ParamRef, ConfigurationError> {
        let index = self
            .index
            .get(reference)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownReference {
                policy: policy.to_string(),
                reference: reference.to_string(),
            })?;
        Ok(ParamRef {
            index,
            name: reference.to_string(),
        })
    }

    fn modal_ref(&self, policy: &str, scheduling: &str, planning: Option<&str>) -> Result<ModalRef, ConfigurationError> {
        Ok(ModalRef {
            scheduling: self.resolve(policy, scheduling)?,
            planning: planning.map(|p| self.resolve(policy, p)).transpose()?,
        })
    }

    fn dimension(&self, policy: &str, dimension: &str) -> Result<usize, ConfigurationError> {
        self.scenarios
            .position_of(dimension)
            .ok_or_else(|| ConfigurationError::UnknownScenarioDimension {
                policy: policy.to_string(),
                dimension: dimension.to_string(),
            })
    }
}
