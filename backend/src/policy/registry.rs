// Policy registry
//
// Owns every compiled policy of one model, their per-scenario state and the
// evaluation order. References between policies are resolved when the
// registry is built, so cycles and unknown names are configuration errors
// raised before the first step.

use crate::models::Scenarios;
use crate::network::BoundaryValues;
use crate::policy::context::{EvalContext, EvalEnv, PolicyError};
use crate::policy::rules::{CompiledPolicy, Compiler, PolicyState};
use crate::policy::types::PolicyDef;
use crate::policy::validation::{evaluation_order, ConfigurationError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Implementation behind a `custom` base rule
pub type PolicyFunction = Arc<dyn Fn(&EvalContext<'_>) -> Result<f64, PolicyError> + Send + Sync>;

/// Named custom functions available to policy definitions
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, PolicyFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&EvalContext<'_>) -> Result<f64, PolicyError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<PolicyFunction> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

/// A policy that could not produce its value for one step
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyFailure {
    pub policy: String,
    pub source: Option<String>,
    pub error: PolicyError,
}

/// Outcome of evaluating every policy for one (timestep, scenario)
#[derive(Debug, Clone)]
pub struct StepEvaluation {
    pub values: BoundaryValues,
    pub failures: Vec<PolicyFailure>,
}

/// Compiled policies of one model plus their evaluation state
pub struct PolicyRegistry {
    policies: Vec<CompiledPolicy>,
    states: Vec<PolicyState>,
    index: Arc<HashMap<String, usize>>,
    order: Vec<usize>,
}

impl PolicyRegistry {
    /// Compile `defs`, resolving references and ordering dependencies
    pub fn build(
        defs: &BTreeMap<String, PolicyDef>,
        functions: &FunctionRegistry,
        scenarios: &Scenarios,
    ) -> Result<Self, ConfigurationError> {
        let index: HashMap<String, usize> = defs.keys().enumerate().map(|(i, name)| (name.clone(), i)).collect();

        let compiler = Compiler {
            index: &index,
            defs,
            functions,
            scenarios,
        };
        let policies = defs
            .iter()
            .map(|(name, def)| compiler.compile(name, def))
            .collect::<Result<Vec<_>, _>>()?;

        let names: Vec<String> = defs.keys().cloned().collect();
        let dependencies: Vec<Vec<usize>> = policies.iter().map(|p| p.dependencies().to_vec()).collect();
        let order = evaluation_order(&names, &dependencies)?;

        let states = policies.iter().map(CompiledPolicy::initial_state).collect();

        Ok(Self {
            policies,
            states,
            index: Arc::new(index),
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Policy names in registry (name-sorted) order
    pub fn names(&self) -> Vec<&str> {
        self.policies.iter().map(CompiledPolicy::name).collect()
    }

    /// Policy names in evaluation order
    pub fn order_names(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.policies[i].name()).collect()
    }

    pub fn state(&self, name: &str) -> Option<&PolicyState> {
        self.index.get(name).map(|&i| &self.states[i])
    }

    /// Restore every policy's memory to its initial value
    pub fn reset_state(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
    }

    /// Take over the step-change reductions in force in `other`
    ///
    /// Reductions hold for the rest of a run, so a planning pass starts from
    /// the daily model's. Policies missing from either registry are skipped.
    pub fn inherit_reductions(&mut self, other: &PolicyRegistry) {
        for (name, &i) in self.index.iter() {
            if let Some(from) = other.state(name) {
                self.states[i].inherit_reductions(from);
            }
        }
    }

    /// Evaluate every policy once for the step described by `env`
    ///
    /// Failures stay local: the failing policy's value is absent, the error
    /// is logged and returned, and evaluation continues with the next policy.
    pub fn evaluate(&mut self, env: &EvalEnv<'_>) -> StepEvaluation {
        let mut values: Vec<Option<f64>> = vec![None; self.policies.len()];
        let mut failures = Vec::new();

        for &i in &self.order {
            let policy = &self.policies[i];
            let result = {
                let ctx = EvalContext::new(env, &self.index, &values);
                policy.evaluate(&ctx, &mut self.states[i])
            };
            match result {
                Ok(value) => values[i] = Some(value),
                Err(error) => {
                    warn!(
                        policy = policy.name(),
                        source = policy.source().unwrap_or("-"),
                        date = %env.timestep.date(),
                        scenario = %env.scenario,
                        mode = %env.mode,
                        error = %error,
                        "policy evaluation failed"
                    );
                    failures.push(PolicyFailure {
                        policy: policy.name().to_string(),
                        source: policy.source().map(str::to_string),
                        error,
                    });
                }
            }
        }

        StepEvaluation {
            values: BoundaryValues::new(Arc::clone(&self.index), values),
            failures,
        }
    }
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("policies", &self.names())
            .field("order", &self.order_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::{Resolution, Timestep};
    use crate::models::{Mode, ScenarioDimension, ScenarioIndex};
    use crate::policy::types::{BaseRule, WeightRule};
    use crate::tables::TableStore;
    use chrono::NaiveDate;

    fn defs(pairs: Vec<(&str, PolicyDef)>) -> BTreeMap<String, PolicyDef> {
        pairs.into_iter().map(|(n, d)| (n.to_string(), d)).collect()
    }

    fn reference(name: &str) -> PolicyDef {
        PolicyDef::new(BaseRule::Reference {
            parameter: name.to_string(),
            planning: None,
        })
    }

    fn run(registry: &mut PolicyRegistry) -> StepEvaluation {
        let ts = Timestep::new(0, NaiveDate::from_ymd_opt(2001, 3, 4).unwrap(), Resolution::Daily);
        let scenarios = Scenarios::default();
        let scenario = ScenarioIndex::new(0, vec![]);
        let tables = TableStore::new();
        let env = EvalEnv {
            timestep: &ts,
            scenario: &scenario,
            mode: Mode::Scheduling,
            tables: &tables,
            scenarios: &scenarios,
            targets: None,
        };
        registry.evaluate(&env)
    }

    #[test]
    fn test_producers_evaluate_before_consumers() {
        let defs = defs(vec![
            (
                "a_storage_demand",
                PolicyDef::new(BaseRule::Interpolate {
                    upper: "z_upper".into(),
                    lower: "z_lower".into(),
                    weight: WeightRule::Constant { value: 0.25 },
                }),
            ),
            ("z_upper", PolicyDef::constant(10.0)),
            ("z_lower", PolicyDef::constant(2.0)),
        ]);
        let mut registry = PolicyRegistry::build(&defs, &FunctionRegistry::new(), &Scenarios::default()).unwrap();

        assert_eq!(registry.order_names(), vec!["z_lower", "z_upper", "a_storage_demand"]);
        let step = run(&mut registry);
        assert!(step.failures.is_empty());
        assert_eq!(step.values.get("a_storage_demand"), Some(4.0));
    }

    #[test]
    fn test_cycle_rejected_before_run() {
        let defs = defs(vec![("a", reference("b")), ("b", reference("a"))]);
        let err = PolicyRegistry::build(&defs, &FunctionRegistry::new(), &Scenarios::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::DependencyCycle(_)));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let defs = defs(vec![("a", reference("missing"))]);
        let err = PolicyRegistry::build(&defs, &FunctionRegistry::new(), &Scenarios::default()).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownReference {
                policy: "a".into(),
                reference: "missing".into()
            }
        );
    }

    #[test]
    fn test_unknown_function_rejected() {
        let defs = defs(vec![(
            "a",
            PolicyDef::new(BaseRule::Custom {
                function: "nope".into(),
                depends_on: vec![],
            }),
        )]);
        let err = PolicyRegistry::build(&defs, &FunctionRegistry::new(), &Scenarios::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownFunction { .. }));
    }

    #[test]
    fn test_failure_is_isolated_and_propagates_to_consumers_only() {
        let mut functions = FunctionRegistry::new();
        functions.register("divide", |_ctx: &EvalContext<'_>| Err(PolicyError::DivisionByZero("divide".into())));
        let defs = defs(vec![
            (
                "broken",
                PolicyDef::new(BaseRule::Custom {
                    function: "divide".into(),
                    depends_on: vec![],
                })
                .with_source("demands.json"),
            ),
            ("consumer", reference("broken")),
            ("healthy", PolicyDef::constant(7.0)),
        ]);
        let mut registry = PolicyRegistry::build(&defs, &functions, &Scenarios::default()).unwrap();
        let step = run(&mut registry);

        assert_eq!(step.values.get("healthy"), Some(7.0));
        assert_eq!(step.values.get("broken"), None);
        assert_eq!(step.values.get("consumer"), None);
        assert_eq!(step.failures.len(), 2);
        assert_eq!(step.failures[0].policy, "broken");
        assert_eq!(step.failures[0].source.as_deref(), Some("demands.json"));
        assert_eq!(
            step.failures[1].error,
            PolicyError::UnavailableReference("broken".into())
        );
    }

    #[test]
    fn test_custom_function_reads_declared_dependency() {
        let mut functions = FunctionRegistry::new();
        functions.register("double", |ctx: &EvalContext<'_>| Ok(ctx.value("base")? * 2.0));
        let defs = defs(vec![
            (
                "a_double",
                PolicyDef::new(BaseRule::Custom {
                    function: "double".into(),
                    depends_on: vec!["base".into()],
                }),
            ),
            ("base", PolicyDef::constant(1.5)),
        ]);
        let mut registry = PolicyRegistry::build(&defs, &functions, &Scenarios::default()).unwrap();
        assert_eq!(run(&mut registry).values.get("a_double"), Some(3.0));
    }

    #[test]
    fn test_scenario_constant_size_must_match_dimension() {
        let scenarios = Scenarios::new(vec![ScenarioDimension::new("Price Year", 2)]).unwrap();
        let defs = defs(vec![(
            "price",
            PolicyDef::new(BaseRule::ScenarioConstant {
                dimension: "Price Year".into(),
                values: vec![1.0, 2.0, 3.0],
            }),
        )]);
        let err = PolicyRegistry::build(&defs, &FunctionRegistry::new(), &scenarios).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidPolicy { .. }));
    }
}
