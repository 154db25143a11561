// Configuration validation
//
// Checks that run before any step executes: every reference resolves, no
// same-step dependency cycle exists, declared scenario dimensions exist, and
// the daily and planning models agree on their scenario universe.

use std::collections::BTreeSet;
use thiserror::Error;

/// Inconsistent configuration detected before stepping begins
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("policy '{policy}' references unknown policy '{reference}'")]
    UnknownReference { policy: String, reference: String },

    #[error("policy '{policy}' uses unregistered function '{function}'")]
    UnknownFunction { policy: String, function: String },

    #[error("dependency cycle among policies: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("policy '{policy}' uses undeclared scenario dimension '{dimension}'")]
    UnknownScenarioDimension { policy: String, dimension: String },

    #[error("policy '{policy}': {reason}")]
    InvalidPolicy { policy: String, reason: String },

    #[error("planning scenarios [{planning}] differ from daily scenarios [{daily}]")]
    ScenarioMismatch { daily: String, planning: String },

    #[error("invalid horizon: {0}")]
    InvalidHorizon(String),
}

/// Order policies so every producer precedes its same-step consumers
///
/// `dependencies[i]` lists the policies `i` reads. Ties are broken by index,
/// so the order is deterministic for a given definition.
pub fn evaluation_order(names: &[String], dependencies: &[Vec<usize>]) -> Result<Vec<usize>, ConfigurationError> {
    let n = names.len();
    let mut remaining: Vec<usize> = vec![0; n];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (consumer, deps) in dependencies.iter().enumerate() {
        let unique: BTreeSet<usize> = deps.iter().copied().collect();
        remaining[consumer] = unique.len();
        for producer in unique {
            consumers[producer].push(consumer);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|i| remaining[*i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &consumer in &consumers[next] {
            remaining[consumer] -= 1;
            if remaining[consumer] == 0 {
                ready.insert(consumer);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err(ConfigurationError::DependencyCycle(find_cycle(names, dependencies, &remaining)))
    }
}

/// Walk unresolved dependencies from the first stuck policy until a policy repeats
fn find_cycle(names: &[String], dependencies: &[Vec<usize>], remaining: &[usize]) -> Vec<String> {
    let stuck = |i: usize| remaining[i] > 0;
    let Some(start) = (0..names.len()).find(|i| stuck(*i)) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(next) = dependencies[current].iter().copied().filter(|d| stuck(*d)).min() else {
            break;
        };
        if let Some(pos) = path.iter().position(|p| *p == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|i| names[*i].clone()).collect();
            cycle.push(names[next].clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }
    path.iter().map(|i| names[*i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_producers_come_first() {
        // a reads c, b reads a
        let order = evaluation_order(&names(&["a", "b", "c"]), &[vec![2], vec![0], vec![]]).unwrap();
        assert_eq!(order, vec![2, 0, 1]);
    }

    #[test]
    fn test_independent_policies_keep_name_order() {
        let order = evaluation_order(&names(&["a", "b", "c"]), &[vec![], vec![], vec![]]).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_cycle_is_reported_with_members() {
        // a -> b -> c -> a, d independent
        let err = evaluation_order(&names(&["a", "b", "c", "d"]), &[vec![1], vec![2], vec![0], vec![]]).unwrap_err();
        match err {
            ConfigurationError::DependencyCycle(cycle) => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"b".to_string()));
                assert!(!cycle.contains(&"d".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let err = evaluation_order(&names(&["a"]), &[vec![0]]).unwrap_err();
        assert_eq!(err, ConfigurationError::DependencyCycle(names(&["a", "a"])));
    }
}
