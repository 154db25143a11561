//! Planning targets
//!
//! The output of one planning sub-run: for every scenario member, the
//! monthly trajectory of each solved node attribute over the planning
//! horizon. Flow-like attributes are stored as monthly volumes so
//! scheduling policies can spread them over the days of the month.
//!
//! A newer publication supersedes the previous one wholesale; targets are
//! never merged.

use crate::core::time::Timestep;
use crate::models::ScenarioIndex;
use crate::network::{Attribute, SolvedStep};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

/// Node attribute a target series refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetKey {
    pub node: String,
    pub attribute: Attribute,
}

impl TargetKey {
    pub fn new(node: impl Into<String>, attribute: Attribute) -> Self {
        Self {
            node: node.into(),
            attribute,
        }
    }
}

/// Monthly targets produced by one planning pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanningTargets {
    /// First day of the first planned month
    start: NaiveDate,
    series: BTreeMap<ScenarioIndex, BTreeMap<TargetKey, Vec<(NaiveDate, f64)>>>,
}

impl PlanningTargets {
    pub fn new(start: NaiveDate) -> Self {
        Self {
            start,
            series: BTreeMap::new(),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Append one solved planning step for `scenario`
    pub fn push(&mut self, scenario: &ScenarioIndex, timestep: &Timestep, solved: &SolvedStep) {
        let by_key = self.series.entry(scenario.clone()).or_default();
        for ((node, attribute), value) in &solved.values {
            let value = match attribute {
                Attribute::Flow | Attribute::Spill => value * timestep.duration_days(),
                Attribute::Storage | Attribute::Elevation => *value,
            };
            by_key
                .entry(TargetKey::new(node.clone(), *attribute))
                .or_default()
                .push((timestep.date(), value));
        }
    }

    /// Target for the calendar month containing `date`
    pub fn value(&self, scenario: &ScenarioIndex, node: &str, attribute: Attribute, date: NaiveDate) -> Option<f64> {
        self.series(scenario, node, attribute)?
            .iter()
            .find(|(month, _)| month.year() == date.year() && month.month() == date.month())
            .map(|(_, value)| *value)
    }

    /// Full monthly trajectory of one node attribute
    pub fn series(&self, scenario: &ScenarioIndex, node: &str, attribute: Attribute) -> Option<&[(NaiveDate, f64)]> {
        self.series
            .get(scenario)?
            .get(&TargetKey::new(node, attribute))
            .map(Vec::as_slice)
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &ScenarioIndex> {
        self.series.keys()
    }

    /// Number of (scenario, node, attribute) series
    pub fn series_count(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::Resolution;

    #[test]
    fn test_flow_targets_are_monthly_volumes() {
        let scenario = ScenarioIndex::new(0, vec![0]);
        let mut targets = PlanningTargets::new(NaiveDate::from_ymd_opt(2001, 2, 1).unwrap());
        let mut solved = SolvedStep::default();
        solved.values.insert(("Tulloch".into(), Attribute::Flow), 2.0);
        solved.values.insert(("Tulloch".into(), Attribute::Storage), 40.0);

        for (i, month) in [2, 3].into_iter().enumerate() {
            let ts = Timestep::new(i, NaiveDate::from_ymd_opt(2001, month, 1).unwrap(), Resolution::Monthly);
            targets.push(&scenario, &ts, &solved);
        }

        let mid_feb = NaiveDate::from_ymd_opt(2001, 2, 14).unwrap();
        let mid_mar = NaiveDate::from_ymd_opt(2001, 3, 14).unwrap();
        assert_eq!(targets.value(&scenario, "Tulloch", Attribute::Flow, mid_feb), Some(56.0));
        assert_eq!(targets.value(&scenario, "Tulloch", Attribute::Flow, mid_mar), Some(62.0));
        assert_eq!(targets.value(&scenario, "Tulloch", Attribute::Storage, mid_mar), Some(40.0));
        assert_eq!(targets.value(&scenario, "Tulloch", Attribute::Flow, NaiveDate::from_ymd_opt(2001, 4, 1).unwrap()), None);
        assert_eq!(targets.series_count(), 2);
    }
}
