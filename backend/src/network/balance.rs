//! Mass-balance reference solver
//!
//! Solves every node independently: storages release what is requested
//! within the water available above their minimum volume and spill above
//! their maximum volume; links, hydropower plants and gauges pass their
//! target flow clamped to their bounds. Flows are volumes per day; a
//! monthly step integrates them over the days of the month.

use crate::network::definition::{NodeDef, NodeKind};
use crate::network::{Attribute, SolveRequest, SolvedStep, SolverError, NetworkSolver};

/// Reference [`NetworkSolver`] without routing between nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceSolver;

impl BalanceSolver {
    pub fn new() -> Self {
        Self
    }
}

fn slot_value(node: &NodeDef, slot: &str, request: &SolveRequest<'_>, default: f64) -> f64 {
    node.slot(slot)
        .and_then(|policy| request.boundary.get(policy))
        .unwrap_or(default)
}

fn infeasible(node: &NodeDef, reason: String) -> SolverError {
    SolverError::Infeasible {
        node: node.name.clone(),
        reason,
    }
}

fn check_finite(node: &NodeDef, attribute: Attribute, value: f64) -> Result<f64, SolverError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SolverError::Numerical(format!(
            "{} of '{}' is {}",
            attribute, node.name, value
        )))
    }
}

impl NetworkSolver for BalanceSolver {
    fn solve(&self, request: SolveRequest<'_>) -> Result<SolvedStep, SolverError> {
        let days = request.timestep.duration_days();
        let mut solved = SolvedStep::default();

        for node in request.nodes {
            match &node.kind {
                NodeKind::Storage {
                    capacity,
                    initial_storage,
                    elevation,
                } => {
                    let min_volume = slot_value(node, "min_volume", &request, 0.0);
                    let max_volume = slot_value(node, "max_volume", &request, *capacity);
                    if min_volume > max_volume {
                        return Err(infeasible(
                            node,
                            format!("min volume {} exceeds max volume {}", min_volume, max_volume),
                        ));
                    }

                    let start = request.storages.get(&node.name).copied().unwrap_or(*initial_storage);
                    let inflow = slot_value(node, "inflow", &request, 0.0) * days;
                    let requested = slot_value(node, "release", &request, 0.0).max(0.0) * days;

                    let available = (start + inflow - min_volume).max(0.0);
                    let release = requested.min(available);
                    let mut end = start + inflow - release;
                    let spill = (end - max_volume).max(0.0);
                    end -= spill;

                    let end = check_finite(node, Attribute::Storage, end)?;
                    solved.values.insert((node.name.clone(), Attribute::Flow), release / days);
                    solved.values.insert((node.name.clone(), Attribute::Storage), end);
                    solved.values.insert((node.name.clone(), Attribute::Spill), spill / days);
                    if let Some(curve) = elevation {
                        solved
                            .values
                            .insert((node.name.clone(), Attribute::Elevation), curve.elevation(end));
                    }
                    solved.storages.insert(node.name.clone(), end);
                }
                NodeKind::Link | NodeKind::Hydropower { .. } | NodeKind::Gauge => {
                    let min_flow = slot_value(node, "min_flow", &request, 0.0);
                    let max_flow = slot_value(node, "max_flow", &request, f64::INFINITY);
                    if min_flow > max_flow {
                        return Err(infeasible(
                            node,
                            format!("min flow {} exceeds max flow {}", min_flow, max_flow),
                        ));
                    }
                    let target = slot_value(node, "flow", &request, min_flow);
                    let flow = check_finite(node, Attribute::Flow, target.max(min_flow).min(max_flow))?;
                    solved.values.insert((node.name.clone(), Attribute::Flow), flow);
                }
            }
        }

        Ok(solved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::{Resolution, Timestep};
    use crate::network::definition::ElevationCurve;
    use crate::network::BoundaryValues;
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    fn boundary(pairs: &[(&str, Option<f64>)]) -> BoundaryValues {
        let index: HashMap<String, usize> = pairs.iter().enumerate().map(|(i, (n, _))| (n.to_string(), i)).collect();
        BoundaryValues::new(Arc::new(index), pairs.iter().map(|(_, v)| *v).collect())
    }

    fn reservoir() -> NodeDef {
        NodeDef::new(
            "New Melones",
            NodeKind::Storage {
                capacity: 100.0,
                initial_storage: 50.0,
                elevation: Some(ElevationCurve { base: 200.0, slope: 0.5 }),
            },
        )
        .with_parameter("inflow", "inflow")
        .with_parameter("release", "release")
    }

    fn solve(nodes: &[NodeDef], boundary: &BoundaryValues, storages: &BTreeMap<String, f64>, resolution: Resolution) -> Result<SolvedStep, SolverError> {
        let ts = Timestep::new(0, NaiveDate::from_ymd_opt(2001, 4, 1).unwrap(), resolution);
        BalanceSolver.solve(SolveRequest {
            nodes,
            timestep: &ts,
            boundary,
            storages,
        })
    }

    #[test]
    fn test_storage_balance() {
        let nodes = vec![reservoir()];
        let b = boundary(&[("inflow", Some(10.0)), ("release", Some(4.0))]);
        let step = solve(&nodes, &b, &BTreeMap::new(), Resolution::Daily).unwrap();
        assert_eq!(step.value("New Melones", Attribute::Storage), Some(56.0));
        assert_eq!(step.value("New Melones", Attribute::Flow), Some(4.0));
        assert_eq!(step.value("New Melones", Attribute::Elevation), Some(228.0));
        assert_eq!(step.storages["New Melones"], 56.0);
    }

    #[test]
    fn test_storage_spills_and_limits_release() {
        let nodes = vec![reservoir()];
        let mut storages = BTreeMap::new();
        storages.insert("New Melones".to_string(), 98.0);
        let b = boundary(&[("inflow", Some(5.0)), ("release", Some(1.0))]);
        let step = solve(&nodes, &b, &storages, Resolution::Daily).unwrap();
        assert_eq!(step.value("New Melones", Attribute::Storage), Some(100.0));
        assert_eq!(step.value("New Melones", Attribute::Spill), Some(2.0));

        storages.insert("New Melones".to_string(), 1.0);
        let b = boundary(&[("inflow", Some(0.0)), ("release", Some(5.0))]);
        let step = solve(&nodes, &b, &storages, Resolution::Daily).unwrap();
        assert_eq!(step.value("New Melones", Attribute::Flow), Some(1.0));
        assert_eq!(step.value("New Melones", Attribute::Storage), Some(0.0));
    }

    #[test]
    fn test_monthly_step_integrates_over_days() {
        let nodes = vec![reservoir()];
        let b = boundary(&[("inflow", Some(1.0)), ("release", Some(0.0))]);
        let step = solve(&nodes, &b, &BTreeMap::new(), Resolution::Monthly).unwrap();
        // April has 30 days
        assert_eq!(step.value("New Melones", Attribute::Storage), Some(80.0));
    }

    #[test]
    fn test_failed_policy_falls_back_to_default() {
        let nodes = vec![NodeDef::new("Canal", NodeKind::Link)
            .with_parameter("flow", "demand")
            .with_parameter("max_flow", "capacity")];
        let b = boundary(&[("demand", None), ("capacity", Some(3.0))]);
        let step = solve(&nodes, &b, &BTreeMap::new(), Resolution::Daily).unwrap();
        assert_eq!(step.value("Canal", Attribute::Flow), Some(0.0));
    }

    #[test]
    fn test_crossed_bounds_are_infeasible() {
        let nodes = vec![NodeDef::new("IFR", NodeKind::Link)
            .with_parameter("min_flow", "min")
            .with_parameter("max_flow", "max")];
        let b = boundary(&[("min", Some(5.0)), ("max", Some(3.0))]);
        let err = solve(&nodes, &b, &BTreeMap::new(), Resolution::Daily).unwrap_err();
        assert!(matches!(err, SolverError::Infeasible { ref node, .. } if node == "IFR"));
    }
}
