//! End-to-end runs of the coupled daily/monthly orchestrator
//!
//! Every run uses the reference mass-balance solver and inline tables so the
//! expected row counts and planning passes can be derived by hand.

use basin_simulator_core_rs::core::time::{DayKey, Resolution};
use basin_simulator_core_rs::models::{RunEvent, ScenarioDimension, ScenarioIndex};
use basin_simulator_core_rs::network::{
    Attribute, BalanceSolver, BasinModel, ElevationCurve, ModelDefinition, NodeDef, NodeKind, TableDef, Timestepper,
};
use basin_simulator_core_rs::orchestrator::{Orchestrator, PlanningConfig, RunConfig, RunOutcome, SimulationError};
use basin_simulator_core_rs::policy::{
    BaseRule, ColumnSelector, ConfigurationError, FunctionRegistry, PlanningRule, PolicyDef, ScenarioLevels,
    StepChangeSpec,
};
use basin_simulator_core_rs::tables::Table;
use basin_simulator_core_rs::SolverError;
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::tempdir;

// ============================================================================
// Fixtures
// ============================================================================

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Day-of-year schedule over a non-leap year, so 02-29 is absent
fn schedule(column: &str, value: impl Fn(NaiveDate) -> f64) -> Table {
    let mut values = BTreeMap::new();
    let mut d = date(2001, 1, 1);
    while d.year() == 2001 {
        values.insert(DayKey::from_date(d), value(d));
        d = d.succ_opt().unwrap();
    }
    let mut columns = BTreeMap::new();
    columns.insert(column.to_string(), values);
    Table::Daily { columns }
}

fn daily_lookup(table: &str, column: &str) -> PolicyDef {
    PolicyDef::new(BaseRule::DailyTable {
        table: table.into(),
        column: ColumnSelector::Fixed { name: column.into() },
        planning: PlanningRule::Mean,
    })
}

/// Small Stanislaus-like network: one reservoir, a rim dam, a powerhouse,
/// a downstream link and a gauge
fn stanislaus() -> ModelDefinition {
    let mut parameters = BTreeMap::new();
    parameters.insert("nm_inflow".to_string(), PolicyDef::constant(1.5));
    parameters.insert("nm_release".to_string(), PolicyDef::constant(1.0));
    parameters.insert("donnells_inflow".to_string(), PolicyDef::constant(0.2));
    parameters.insert("tulloch_min".to_string(), PolicyDef::constant(0.5));
    parameters.insert(
        "tulloch_max".to_string(),
        daily_lookup("tulloch_schedule", "max").with_source("tulloch_schedule.json"),
    );
    parameters.insert("observed_goodwin_flow".to_string(), PolicyDef::constant(9.9));

    let mut tables = BTreeMap::new();
    tables.insert(
        "tulloch_schedule".to_string(),
        TableDef::inline(schedule("max", |d| 2.0 + d.month() as f64 / 10.0)),
    );

    ModelDefinition {
        name: "stanislaus".to_string(),
        timestepper: Timestepper {
            start: date(2000, 10, 1),
            end: date(2003, 9, 30),
            resolution: Resolution::Daily,
            horizon_months: None,
        },
        scenarios: vec![],
        nodes: vec![
            NodeDef::new(
                "New Melones",
                NodeKind::Storage {
                    capacity: 2400.0,
                    initial_storage: 2000.0,
                    elevation: Some(ElevationCurve { base: 150.0, slope: 0.05 }),
                },
            )
            .with_parameter("inflow", "nm_inflow")
            .with_parameter("release", "nm_release"),
            NodeDef::new(
                "Donnells",
                NodeKind::Storage {
                    capacity: 80.0,
                    initial_storage: 40.0,
                    elevation: None,
                },
            )
            .with_parameter("inflow", "donnells_inflow")
            .daily_only(),
            NodeDef::new("Tulloch PH", NodeKind::Hydropower { head: 50.0 })
                .with_parameter("min_flow", "tulloch_min")
                .with_parameter("max_flow", "tulloch_max"),
            NodeDef::new("Goodwin", NodeKind::Link),
            NodeDef::new("Gauge below Goodwin", NodeKind::Gauge).with_parameter("flow", "observed_goodwin_flow"),
        ],
        parameters,
        tables,
    }
}

/// Same network with Goodwin releasing what the planning model released
/// from New Melones
fn stanislaus_following_plan() -> ModelDefinition {
    let mut definition = stanislaus();
    definition.parameters.insert(
        "goodwin_target".to_string(),
        PolicyDef::new(BaseRule::PlanningTarget {
            node: "New Melones".into(),
            attribute: Attribute::Flow,
            per_day: true,
            fallback: 0.0,
        }),
    );
    for node in &mut definition.nodes {
        if node.name == "Goodwin" {
            node.parameters.insert("flow".to_string(), "goodwin_target".to_string());
        }
    }
    definition
}

fn config(start: NaiveDate, end: NaiveDate, include_planning: bool) -> RunConfig {
    RunConfig {
        start: Some(start),
        end: Some(end),
        include_planning,
        ..Default::default()
    }
}

fn orchestrator(definition: ModelDefinition, config: RunConfig) -> Orchestrator {
    Orchestrator::new(definition, config, &FunctionRegistry::new(), Arc::new(BalanceSolver)).unwrap()
}

fn run(definition: ModelDefinition, config: RunConfig) -> RunOutcome {
    orchestrator(definition, config).run().unwrap()
}

fn price_year_member() -> ScenarioIndex {
    ScenarioIndex::new(0, vec![0])
}

// ============================================================================
// Coupled runs
// ============================================================================

#[test]
fn test_planning_carves_horizon_and_publishes_monthly() {
    let outcome = run(stanislaus(), config(date(2000, 10, 1), date(2003, 9, 30), true));

    // Three water years minus the 12-month look-ahead
    assert_eq!(outcome.frame.len(), 730);
    assert_eq!(outcome.frame.dates().first(), Some(&date(2000, 10, 1)));
    assert_eq!(outcome.frame.dates().last(), Some(&date(2002, 9, 30)));

    // One pass per month start in the daily horizon
    assert_eq!(outcome.planning_publications, 24);
    assert_eq!(outcome.events.events_of_type("PlanningPublished").len(), 24);
    assert!(outcome.events.events_of_type("PlanningDiscarded").is_empty());
    assert_eq!(outcome.model, "stanislaus");
    assert_eq!(outcome.fingerprint.len(), 64);
}

#[test]
fn test_tick_reports_planning_on_month_starts() {
    let mut orchestrator = orchestrator(stanislaus(), config(date(2000, 10, 1), date(2002, 9, 30), true));
    assert_eq!(orchestrator.total_days(), 365);

    let mut planned_days = Vec::new();
    while let Some(report) = orchestrator.tick().unwrap() {
        if report.planned {
            planned_days.push(report.date);
        }
    }
    assert_eq!(orchestrator.current_day(), 365);
    assert_eq!(planned_days.len(), 12);
    assert!(planned_days.iter().all(|d| d.day() == 1));
    assert_eq!(planned_days[0], date(2000, 10, 1));
}

#[test]
fn test_planning_does_not_alter_daily_history_without_consumers() {
    let coupled = run(stanislaus(), config(date(2000, 10, 1), date(2003, 9, 30), true));
    let daily_only = run(stanislaus(), config(date(2000, 10, 1), date(2002, 9, 30), false));

    assert_eq!(coupled.frame.dates(), daily_only.frame.dates());
    assert_eq!(
        coupled.frame.columns().keys().collect::<Vec<_>>(),
        daily_only.frame.columns().keys().collect::<Vec<_>>()
    );
    for (key, values) in coupled.frame.columns() {
        let other = &daily_only.frame.columns()[key];
        for (a, b) in values.iter().zip(other) {
            assert!(a == b || (a.is_nan() && b.is_nan()), "{:?} differs", key);
        }
    }
}

#[test]
fn test_daily_policy_follows_published_targets() {
    let mut config = config(date(2000, 10, 1), date(2002, 9, 30), true);
    config.planning.record = true;
    let outcome = run(stanislaus_following_plan(), config);

    let member = price_year_member();
    for day in [date(2000, 10, 1), date(2001, 2, 14), date(2001, 9, 30)] {
        let flow = outcome.frame.value("Goodwin", Attribute::Flow, &member, day).unwrap();
        assert!((flow - 1.0).abs() < 1e-9, "Goodwin flow on {} was {}", day, flow);
    }

    assert_eq!(outcome.planning_history.len(), 12);
    assert_eq!(outcome.planning_history[0].start(), date(2000, 10, 1));
    assert_eq!(outcome.planning_history[11].start(), date(2001, 9, 1));
    // The rim dam is not part of the planning model
    assert!(outcome.planning_history[0]
        .series(&member, "New Melones", Attribute::Storage)
        .is_some());
    assert!(outcome.planning_history[0]
        .series(&member, "Donnells", Attribute::Storage)
        .is_none());
}

#[test]
fn test_without_planning_targets_fall_back() {
    let outcome = run(stanislaus_following_plan(), config(date(2000, 10, 1), date(2000, 12, 31), false));
    let flow = outcome
        .frame
        .value("Goodwin", Attribute::Flow, &price_year_member(), date(2000, 11, 5))
        .unwrap();
    assert_eq!(flow, 0.0);
    assert_eq!(outcome.planning_publications, 0);
}

/// Canal diverting a constant demand that drops by 40% from Jan 1 in the
/// second member of the "Scenario" dimension
fn canal_with_step_change() -> ModelDefinition {
    let mut definition = stanislaus();
    definition.scenarios.push(ScenarioDimension::new("Scenario", 2));
    definition.parameters.insert(
        "curtailment".to_string(),
        PolicyDef::constant(0.0).with_levels(ScenarioLevels {
            dimension: "Scenario".into(),
            values: vec![0.0, 0.4],
        }),
    );
    definition.parameters.insert(
        "canal_demand".to_string(),
        PolicyDef::constant(10.0).with_step_change(StepChangeSpec {
            dimension: "Scenario".into(),
            active_index: 1,
            month: 1,
            day: 1,
            source: "curtailment".into(),
        }),
    );
    definition
        .nodes
        .push(NodeDef::new("Canal", NodeKind::Link).with_parameter("flow", "canal_demand"));
    definition
}

#[test]
fn test_planning_passes_keep_step_change_in_force() {
    let mut config = config(date(2001, 10, 1), date(2003, 9, 30), true);
    config.planning.record = true;
    let outcome = run(canal_with_step_change(), config);

    // Scenario × Price Year, the last dimension varying fastest
    let curtailed = ScenarioIndex::new(1, vec![1, 0]);
    let unchanged = ScenarioIndex::new(0, vec![0, 0]);

    let daily = outcome.frame.value("Canal", Attribute::Flow, &curtailed, date(2002, 4, 15)).unwrap();
    assert!((daily - 6.0).abs() < 1e-9);

    // The April pass starts after the trigger day and must plan with it
    let april = outcome
        .planning_history
        .iter()
        .find(|t| t.start() == date(2002, 4, 1))
        .unwrap();
    let planned = april.value(&curtailed, "Canal", Attribute::Flow, date(2002, 4, 1)).unwrap() / 30.0;
    assert!((planned - daily).abs() < 1e-9, "planned {} vs daily {}", planned, daily);
    let planned = april.value(&unchanged, "Canal", Attribute::Flow, date(2002, 4, 1)).unwrap() / 30.0;
    assert!((planned - 10.0).abs() < 1e-9);

    // A pass started before Jan 1 triggers the reduction inside its own horizon
    let october = &outcome.planning_history[0];
    assert_eq!(october.start(), date(2001, 10, 1));
    let december = october.value(&curtailed, "Canal", Attribute::Flow, date(2001, 12, 1)).unwrap() / 31.0;
    let january = october.value(&curtailed, "Canal", Attribute::Flow, date(2002, 1, 1)).unwrap() / 31.0;
    assert!((december - 10.0).abs() < 1e-9);
    assert!((january - 6.0).abs() < 1e-9);
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_missing_leap_day_is_recovered() {
    let outcome = run(stanislaus(), config(date(2003, 10, 1), date(2004, 9, 30), false));

    // Every day is produced, including the one with a missing table entry
    assert_eq!(outcome.frame.len(), 366);
    let failures = outcome.events.events_for_policy("tulloch_max");
    assert_eq!(failures.len(), 1);
    match failures[0] {
        RunEvent::PolicyFailed { date: day, source, error, .. } => {
            assert_eq!(*day, date(2004, 2, 29));
            assert_eq!(source.as_deref(), Some("tulloch_schedule.json"));
            assert!(error.contains("02-29"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // The solver ran without the bound that day
    let flow = outcome
        .frame
        .value("Tulloch PH", Attribute::Flow, &price_year_member(), date(2004, 2, 29))
        .unwrap();
    assert_eq!(flow, 0.5);
}

#[test]
fn test_infeasible_day_stops_run_with_date() {
    let mut definition = stanislaus();
    definition.tables.insert(
        "nm_floor".to_string(),
        TableDef::inline(schedule("min", |d| if d.month() == 1 && d.day() == 15 { 3000.0 } else { 0.0 })),
    );
    definition.parameters.insert("nm_min".to_string(), daily_lookup("nm_floor", "min"));
    definition.nodes[0].parameters.insert("min_volume".to_string(), "nm_min".to_string());

    let err = orchestrator(definition, config(date(2000, 10, 1), date(2001, 9, 30), false))
        .run()
        .unwrap_err();
    assert_eq!(err.date(), Some(date(2001, 1, 15)));
    match err {
        SimulationError::StepFailed { model, source, .. } => {
            assert_eq!(model, "stanislaus");
            assert!(matches!(source, SolverError::Infeasible { ref node, .. } if node == "New Melones"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_failed_planning_pass_publishes_nothing() {
    let mut definition = stanislaus();
    definition.parameters.insert("no_floor".to_string(), PolicyDef::constant(0.0));
    definition.parameters.insert("planning_floor".to_string(), PolicyDef::constant(5000.0));
    definition.parameters.insert(
        "nm_min".to_string(),
        PolicyDef::new(BaseRule::Reference {
            parameter: "no_floor".into(),
            planning: Some("planning_floor".into()),
        }),
    );
    definition.nodes[0].parameters.insert("min_volume".to_string(), "nm_min".to_string());

    let mut orchestrator = orchestrator(definition, config(date(2000, 10, 1), date(2002, 9, 30), true));
    let err = orchestrator.tick().unwrap_err();
    assert!(matches!(err, SimulationError::PlanningFailed { .. }));
    assert_eq!(err.date(), Some(date(2000, 10, 1)));

    assert_eq!(orchestrator.planning_publications(), 0);
    assert_eq!(orchestrator.current_day(), 0);
    assert!(orchestrator.daily().targets().is_none());
    assert!(orchestrator.daily().to_frame().is_empty());
    assert_eq!(orchestrator.event_log().events_of_type("PlanningDiscarded").len(), 1);
}

#[test]
fn test_policy_failure_inside_planning_pass_is_fatal() {
    let mut definition = stanislaus();
    definition.parameters.insert("no_floor".to_string(), PolicyDef::constant(0.0));
    definition.parameters.insert(
        "forecast_floor".to_string(),
        PolicyDef::new(BaseRule::YearTable {
            table: "forecast_floor".into(),
        }),
    );
    definition.parameters.insert(
        "nm_min".to_string(),
        PolicyDef::new(BaseRule::Reference {
            parameter: "no_floor".into(),
            planning: Some("forecast_floor".into()),
        }),
    );
    definition.nodes[0].parameters.insert("min_volume".to_string(), "nm_min".to_string());

    let mut orchestrator = orchestrator(definition, config(date(2000, 10, 1), date(2002, 9, 30), true));
    let err = orchestrator.tick().unwrap_err();
    match err {
        SimulationError::PlanningFailed { date: day, reason, .. } => {
            assert_eq!(day, date(2000, 10, 1));
            assert!(reason.contains("forecast_floor"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(orchestrator.planning_publications(), 0);
    assert!(orchestrator.daily().targets().is_none());
    assert_eq!(orchestrator.event_log().events_of_type("PlanningDiscarded").len(), 1);
}

// ============================================================================
// Setup validation
// ============================================================================

#[test]
fn test_scenario_mismatch_rejected() {
    let daily_definition = stanislaus();
    let mut planning_definition = daily_definition.prepare_planning(12, true).unwrap();
    planning_definition.scenarios.push(ScenarioDimension::new("Climate", 2));

    let functions = FunctionRegistry::new();
    let daily = BasinModel::load(daily_definition, &functions, Arc::new(BalanceSolver)).unwrap();
    let planning = BasinModel::load(planning_definition, &functions, Arc::new(BalanceSolver)).unwrap();

    let result = Orchestrator::from_models(config(date(2000, 10, 1), date(2003, 9, 30), true), daily, Some(planning));
    let err = result.err().expect("mismatched scenarios must be rejected");
    assert!(matches!(
        err,
        SimulationError::Configuration(ConfigurationError::ScenarioMismatch { .. })
    ));
}

#[test]
fn test_horizon_shorter_than_planning_rejected() {
    let config = RunConfig {
        planning: PlanningConfig {
            months: 12,
            ..Default::default()
        },
        ..config(date(2000, 10, 1), date(2001, 6, 30), true)
    };
    let result = Orchestrator::new(stanislaus(), config, &FunctionRegistry::new(), Arc::new(BalanceSolver));
    assert!(matches!(
        result.err(),
        Some(SimulationError::Configuration(ConfigurationError::InvalidHorizon(_)))
    ));
}

#[test]
fn test_unknown_reference_fails_load() {
    let mut definition = stanislaus();
    definition.parameters.insert(
        "bad".to_string(),
        PolicyDef::new(BaseRule::Reference {
            parameter: "missing".into(),
            planning: None,
        }),
    );
    let result = Orchestrator::new(definition, RunConfig::default(), &FunctionRegistry::new(), Arc::new(BalanceSolver));
    assert!(matches!(result.err(), Some(SimulationError::Load(_))));
}

// ============================================================================
// Collation
// ============================================================================

#[test]
fn test_outcome_tables_grouped_by_type_and_attribute() {
    let outcome = run(stanislaus(), config(date(2000, 10, 1), date(2000, 10, 31), false));
    let names: Vec<&str> = outcome.tables.iter().map(|t| t.name.as_str()).collect();

    assert!(names.contains(&"Reservoir_Storage_mcm"));
    assert!(names.contains(&"Reservoir_Elevation_m"));
    assert!(names.contains(&"Hydropower_Flow_mcm"));
    assert!(names.contains(&"Hydropower_Generation_MWh"));
    assert!(names.contains(&"Link_Flow_mcm"));
    // Gauges are removed when simplifying
    assert!(!names.iter().any(|n| n.starts_with("Gauge")));

    let storage = outcome.tables.iter().find(|t| t.name == "Reservoir_Storage_mcm").unwrap();
    assert_eq!(storage.dates.len(), 31);
    assert_eq!(storage.scenario_names, vec!["Price Year".to_string()]);
    let (_, _, new_melones) = storage.columns.iter().find(|(node, _, _)| node == "New Melones").unwrap();
    // 0.5 mcm/day net gain
    assert!((new_melones[0] - 2000.5).abs() < 1e-9);
    assert!((new_melones[30] - 2015.5).abs() < 1e-9);

    let generation = outcome.tables.iter().find(|t| t.name == "Hydropower_Generation_MWh").unwrap();
    let expected = 0.5 * 50.0 * 0.9 * 9.81 * 1000.0 / 1e6 * 24.0;
    assert!((generation.columns[0].2[0] - expected).abs() < 1e-9);
}

#[test]
fn test_results_written_under_run_directory() {
    let dir = tempdir().unwrap();
    let config = RunConfig {
        output_dir: Some(dir.path().to_path_buf()),
        run_name: "baseline".to_string(),
        ..config(date(2000, 10, 1), date(2000, 10, 10), false)
    };
    let outcome = run(stanislaus(), config);

    let target = dir.path().join("baseline").join("stanislaus").join("Livneh");
    let csv = std::fs::read_to_string(target.join("Reservoir_Storage_mcm.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert!(lines[0].starts_with("node,"));
    assert!(lines[1].starts_with("Price Year,"));
    assert_eq!(lines[2], "Date");
    assert_eq!(lines.len(), 3 + outcome.frame.len());
}
