//! S4 — SLA coverage.
//!
//! Summarizes every SLA and flags configurations that are legal but
//! probably unintended: SLAs on terminal states, disabled SLAs, and
//! escalations whose display order disagrees with when they can fire.

use blueprint_interchange::{Blueprint, EscalationTrigger, Sla};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SlaSummary {
    pub sla_id: i64,
    pub name: String,
    pub state: String,
    pub duration_hours: u32,
    pub business_hours_only: bool,
    pub exclude_weekends: bool,
    pub is_active: bool,
    /// Escalation triggers in firing order, e.g. `approaching:75`.
    pub escalations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MisorderedEscalation {
    pub sla_id: i64,
    pub escalation_id: i64,
    /// The escalation it is listed after but would fire before.
    pub after_escalation_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct S4Result {
    pub slas: Vec<SlaSummary>,
    pub terminal_slas: Vec<i64>,
    pub inactive_slas: Vec<i64>,
    pub misordered_escalations: Vec<MisorderedEscalation>,
    /// Non-terminal states with no active SLA.
    pub uncovered_states: Vec<String>,
}

fn threshold(trigger: &EscalationTrigger) -> u8 {
    match trigger {
        EscalationTrigger::Approaching { percent } => *percent,
        EscalationTrigger::Breached => 100,
    }
}

fn misordered(sla: &Sla) -> Vec<MisorderedEscalation> {
    let ordered = sla.ordered_escalations();
    let mut found = Vec::new();
    for (i, later) in ordered.iter().enumerate() {
        let earlier = ordered[..i]
            .iter()
            .find(|e| threshold(&e.trigger) > threshold(&later.trigger));
        if let Some(earlier) = earlier {
            found.push(MisorderedEscalation {
                sla_id: sla.id,
                escalation_id: later.id,
                after_escalation_id: earlier.id,
            });
        }
    }
    found
}

pub fn analyze_sla_coverage(blueprint: &Blueprint) -> S4Result {
    let mut result = S4Result {
        slas: Vec::new(),
        terminal_slas: Vec::new(),
        inactive_slas: Vec::new(),
        misordered_escalations: Vec::new(),
        uncovered_states: Vec::new(),
    };

    for sla in &blueprint.slas {
        let state = blueprint.state(sla.state_id);
        result.slas.push(SlaSummary {
            sla_id: sla.id,
            name: sla.name.clone(),
            state: state.map(|s| s.name.clone()).unwrap_or_default(),
            duration_hours: sla.duration_hours,
            business_hours_only: sla.business_hours_only,
            exclude_weekends: sla.exclude_weekends,
            is_active: sla.is_active,
            escalations: sla
                .ordered_escalations()
                .iter()
                .map(|e| match e.trigger {
                    EscalationTrigger::Approaching { percent } => format!("approaching:{}", percent),
                    EscalationTrigger::Breached => "breached".to_string(),
                })
                .collect(),
        });
        if state.is_some_and(|s| s.is_terminal) {
            result.terminal_slas.push(sla.id);
        }
        if !sla.is_active {
            result.inactive_slas.push(sla.id);
        }
        result.misordered_escalations.extend(misordered(sla));
    }

    result.uncovered_states = blueprint
        .states
        .iter()
        .filter(|s| !s.is_terminal && blueprint.active_sla_for_state(s.id).is_none())
        .map(|s| s.name.clone())
        .collect();

    result
}
