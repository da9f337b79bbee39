//! Structural checks on a decoded blueprint.
//!
//! Run by [`from_config`](crate::from_config) after decoding and again by
//! the engine when a typed blueprint is registered directly.

use crate::deserialize::ConfigError;
use crate::types::*;
use std::collections::HashSet;

/// Check graph-level rules that a single item cannot check on its own.
pub fn validate_blueprint(bp: &Blueprint) -> Result<(), ConfigError> {
    let mut state_ids = HashSet::new();
    for state in &bp.states {
        if !state_ids.insert(state.id) {
            return Err(ConfigError::InvalidBlueprint(format!(
                "duplicate state id {}",
                state.id
            )));
        }
    }

    let initial: Vec<&State> = bp.states.iter().filter(|s| s.is_initial).collect();
    if initial.len() > 1 {
        return Err(ConfigError::InvalidBlueprint(format!(
            "more than one initial state: {}",
            initial
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let mut transition_ids = HashSet::new();
    for t in &bp.transitions {
        if !transition_ids.insert(t.id) {
            return Err(ConfigError::InvalidBlueprint(format!(
                "duplicate transition id {}",
                t.id
            )));
        }
        if let Some(from) = t.from_state_id {
            if !state_ids.contains(&from) {
                return Err(ConfigError::InvalidBlueprint(format!(
                    "transition {} starts from unknown state {}",
                    t.id, from
                )));
            }
        }
        if !state_ids.contains(&t.to_state_id) {
            return Err(ConfigError::InvalidBlueprint(format!(
                "transition {} targets unknown state {}",
                t.id, t.to_state_id
            )));
        }
        for req in &t.requirements {
            validate_requirement(req)?;
        }
        if let Some(approval) = &t.approval {
            validate_approval(approval)?;
        }
    }

    let mut sla_states = HashSet::new();
    for sla in &bp.slas {
        if !state_ids.contains(&sla.state_id) {
            return Err(ConfigError::InvalidBlueprint(format!(
                "SLA {} is bound to unknown state {}",
                sla.id, sla.state_id
            )));
        }
        if !sla_states.insert(sla.state_id) {
            return Err(ConfigError::InvalidBlueprint(format!(
                "state {} has more than one SLA",
                sla.state_id
            )));
        }
        validate_sla(sla)?;
    }

    Ok(())
}

/// Duration within `1..=MAX_SLA_DURATION_HOURS` and well-formed escalations.
pub fn validate_sla(sla: &Sla) -> Result<(), ConfigError> {
    if !(1..=MAX_SLA_DURATION_HOURS).contains(&sla.duration_hours) {
        return Err(ConfigError::Invalid {
            kind: "sla".to_string(),
            id: sla.id.to_string(),
            message: format!(
                "duration_hours {} is outside 1..={}",
                sla.duration_hours, MAX_SLA_DURATION_HOURS
            ),
        });
    }
    for escalation in &sla.escalations {
        validate_escalation(escalation)?;
    }
    Ok(())
}

fn validate_approval(approval: &Approval) -> Result<(), ConfigError> {
    let windows = [
        ("auto_reject_days", approval.auto_reject_days, MAX_AUTO_REJECT_DAYS),
        (
            "reminder_hours",
            approval.reminder.map(|r| r.every_hours),
            MAX_FOLLOW_UP_HOURS,
        ),
        (
            "escalation_hours",
            approval.escalation.as_ref().map(|e| e.after_hours),
            MAX_FOLLOW_UP_HOURS,
        ),
    ];
    for (key, value, max) in windows {
        if let Some(value) = value.filter(|v| !(1..=max).contains(v)) {
            return Err(ConfigError::Invalid {
                kind: "approval".to_string(),
                id: approval.id.to_string(),
                message: format!("{} {} is outside 1..={}", key, value, max),
            });
        }
    }
    Ok(())
}

fn validate_requirement(req: &Requirement) -> Result<(), ConfigError> {
    let problem = match &req.kind {
        RequirementKind::MandatoryField { field } if field.is_empty() => {
            Some("mandatory_field needs a 'field'")
        }
        RequirementKind::Checklist { items } if items.is_empty() => {
            Some("checklist needs at least one item")
        }
        _ => None,
    };
    match problem {
        Some(message) => Err(ConfigError::Invalid {
            kind: "requirement".to_string(),
            id: req.id.to_string(),
            message: message.to_string(),
        }),
        None => Ok(()),
    }
}

/// An `approaching` trigger must name a percentage between 1 and 100.
pub fn validate_escalation(escalation: &SlaEscalation) -> Result<(), ConfigError> {
    if let EscalationTrigger::Approaching { percent } = escalation.trigger {
        if !(1..=100).contains(&percent) {
            return Err(ConfigError::Invalid {
                kind: "escalation".to_string(),
                id: escalation.id.to_string(),
                message: format!("approaching trigger value {} is outside 1..=100", percent),
            });
        }
    }
    if escalation.action_type.is_empty() {
        return Err(ConfigError::Invalid {
            kind: "escalation".to_string(),
            id: escalation.id.to_string(),
            message: "missing action_type".to_string(),
        });
    }
    Ok(())
}
