//! Run event log
//!
//! Captures what happened during a run that is not a solved value:
//! recovered policy failures, planning publications and discarded plans.
//! The orchestrator returns this log with the run outcome so callers can
//! audit every boundary value that was absent from a step.

use crate::models::mode::Mode;
use crate::models::scenario::ScenarioIndex;
use chrono::NaiveDate;
use serde::Serialize;

/// Something notable that happened during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RunEvent {
    /// A policy failed and its boundary value was left out of the step
    PolicyFailed {
        date: NaiveDate,
        mode: Mode,
        scenario: ScenarioIndex,
        policy: String,
        /// Originating definition (file or table) of the policy, if declared
        source: Option<String>,
        error: String,
    },

    /// A planning sub-run completed and its targets replaced the previous ones
    PlanningPublished {
        date: NaiveDate,
        horizon_months: u32,
        series: usize,
    },

    /// A planning sub-run failed; nothing from it was published
    PlanningDiscarded { date: NaiveDate, reason: String },
}

impl RunEvent {
    pub fn date(&self) -> NaiveDate {
        match self {
            RunEvent::PolicyFailed { date, .. }
            | RunEvent::PlanningPublished { date, .. }
            | RunEvent::PlanningDiscarded { date, .. } => *date,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::PolicyFailed { .. } => "PolicyFailed",
            RunEvent::PlanningPublished { .. } => "PlanningPublished",
            RunEvent::PlanningDiscarded { .. } => "PlanningDiscarded",
        }
    }

    pub fn policy(&self) -> Option<&str> {
        match self {
            RunEvent::PolicyFailed { policy, .. } => Some(policy),
            _ => None,
        }
    }
}

/// Ordered log of run events
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<RunEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn log(&mut self, event: RunEvent) {
        self.events.push(event);
    }

    /// Move every event out of `other` into this log
    pub fn append(&mut self, other: &mut EventLog) {
        self.events.append(&mut other.events);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    pub fn events_on(&self, date: NaiveDate) -> Vec<&RunEvent> {
        self.events.iter().filter(|e| e.date() == date).collect()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<&RunEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn events_for_policy(&self, policy: &str) -> Vec<&RunEvent> {
        self.events
            .iter()
            .filter(|e| e.policy() == Some(policy))
            .collect()
    }

    pub fn policy_failures(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, RunEvent::PolicyFailed { .. }))
            .count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(date: NaiveDate, policy: &str) -> RunEvent {
        RunEvent::PolicyFailed {
            date,
            mode: Mode::Scheduling,
            scenario: ScenarioIndex::new(0, vec![]),
            policy: policy.to_string(),
            source: None,
            error: "missing".to_string(),
        }
    }

    #[test]
    fn test_event_log_queries() {
        let day1 = NaiveDate::from_ymd_opt(2001, 10, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2001, 10, 2).unwrap();
        let mut log = EventLog::new();
        log.log(failure(day1, "A"));
        log.log(RunEvent::PlanningPublished {
            date: day1,
            horizon_months: 12,
            series: 4,
        });
        log.log(failure(day2, "B"));

        assert_eq!(log.len(), 3);
        assert_eq!(log.events_on(day1).len(), 2);
        assert_eq!(log.events_of_type("PlanningPublished").len(), 1);
        assert_eq!(log.events_for_policy("B").len(), 1);
        assert_eq!(log.policy_failures(), 2);

        log.clear();
        assert!(log.is_empty());
    }
}
