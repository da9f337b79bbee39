//! Decoding of stored blueprint configuration JSON into typed structs.
//!
//! The main entry point is [`from_config`], which takes a
//! `&serde_json::Value` and produces a validated [`Blueprint`].

use crate::types::*;
use crate::validate::validate_blueprint;
use serde_json::Value;

/// Errors while decoding or validating blueprint configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The blueprint is missing a required top-level field.
    #[error("blueprint config missing required field: '{field}'")]
    MissingField { field: String },
    /// A nested item (state, transition, condition, ...) is malformed.
    #[error("{kind} {id}: {message}")]
    Invalid {
        kind: String,
        id: String,
        message: String,
    },
    /// The blueprint as a whole violates a structural rule.
    #[error("invalid blueprint: {0}")]
    InvalidBlueprint(String),
}

impl ConfigError {
    fn invalid(kind: &str, id: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            kind: kind.to_string(),
            id: id.to_string(),
            message: message.into(),
        }
    }
}

/// Decode a blueprint configuration object and validate its structure.
pub fn from_config(config: &Value) -> Result<Blueprint, ConfigError> {
    let id = config
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| missing("id"))?;
    let name = config
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("name"))?
        .to_string();

    let states = config
        .get("states")
        .and_then(Value::as_array)
        .ok_or_else(|| missing("states"))?
        .iter()
        .map(parse_state)
        .collect::<Result<Vec<_>, _>>()?;

    let transitions = array(config, "transitions")
        .iter()
        .map(parse_transition)
        .collect::<Result<Vec<_>, _>>()?;

    let slas = array(config, "slas")
        .iter()
        .map(parse_sla)
        .collect::<Result<Vec<_>, _>>()?;

    let blueprint = Blueprint {
        id,
        name,
        module_id: config.get("module_id").and_then(Value::as_i64).unwrap_or(0),
        field_id: config.get("field_id").and_then(Value::as_i64).unwrap_or(0),
        field_name: opt_str(config, "field_name"),
        description: opt_str(config, "description"),
        is_active: bool_or(config, "is_active", true),
        states,
        transitions,
        slas,
    };

    validate_blueprint(&blueprint)?;
    Ok(blueprint)
}

// ── Parsing helpers ─────────────────────────────────────────────────

fn missing(field: &str) -> ConfigError {
    ConfigError::MissingField {
        field: field.to_string(),
    }
}

fn array<'a>(obj: &'a Value, field: &str) -> &'a [Value] {
    obj.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn opt_str(obj: &Value, field: &str) -> Option<String> {
    obj.get(field).and_then(Value::as_str).map(str::to_string)
}

fn bool_or(obj: &Value, field: &str, default: bool) -> bool {
    obj.get(field).and_then(Value::as_bool).unwrap_or(default)
}

fn order(obj: &Value) -> i32 {
    obj.get("display_order")
        .and_then(Value::as_i64)
        .and_then(|n| i32::try_from(n).ok())
        .unwrap_or(0)
}

/// Display form of an item's id for error messages.
fn id_label(obj: &Value) -> String {
    obj.get("id")
        .and_then(Value::as_i64)
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn required_id(obj: &Value, kind: &str) -> Result<i64, ConfigError> {
    obj.get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ConfigError::invalid(kind, "?", "missing 'id' field"))
}

/// Item ids are optional for nested rows; position-derived ids keep them
/// distinct inside their parent.
fn id_or_index(obj: &Value, index: usize) -> i64 {
    obj.get("id")
        .and_then(Value::as_i64)
        .unwrap_or(index as i64 + 1)
}

fn parse_state(obj: &Value) -> Result<State, ConfigError> {
    let id = required_id(obj, "state")?;
    let name = opt_str(obj, "name")
        .ok_or_else(|| ConfigError::invalid("state", &id.to_string(), "missing 'name' field"))?;

    let position = match (
        obj.get("position_x").and_then(Value::as_i64),
        obj.get("position_y").and_then(Value::as_i64),
    ) {
        (Some(x), Some(y)) => Some(CanvasPosition {
            x: x as i32,
            y: y as i32,
        }),
        _ => None,
    };

    Ok(State {
        id,
        name,
        field_option_value: opt_str(obj, "field_option_value"),
        color: opt_str(obj, "color"),
        is_initial: bool_or(obj, "is_initial", false),
        is_terminal: bool_or(obj, "is_terminal", false),
        position,
    })
}

fn parse_transition(obj: &Value) -> Result<Transition, ConfigError> {
    let id = required_id(obj, "transition")?;
    let label = id.to_string();

    let to_state_id = obj
        .get("to_state_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ConfigError::invalid("transition", &label, "missing 'to_state_id'"))?;
    let name = opt_str(obj, "name")
        .ok_or_else(|| ConfigError::invalid("transition", &label, "missing 'name' field"))?;

    let conditions = array(obj, "conditions")
        .iter()
        .map(|c| parse_condition(c, id))
        .collect::<Result<Vec<_>, _>>()?;
    let requirements = array(obj, "requirements")
        .iter()
        .enumerate()
        .map(|(i, r)| parse_requirement(r, i))
        .collect::<Result<Vec<_>, _>>()?;
    let actions = array(obj, "actions")
        .iter()
        .enumerate()
        .map(|(i, a)| parse_action(a, i))
        .collect::<Result<Vec<_>, _>>()?;
    let approval = match obj.get("approval") {
        None | Some(Value::Null) => None,
        Some(a) => Some(parse_approval(a)?),
    };

    Ok(Transition {
        id,
        from_state_id: obj.get("from_state_id").and_then(Value::as_i64),
        to_state_id,
        name,
        description: opt_str(obj, "description"),
        button_label: opt_str(obj, "button_label"),
        display_order: order(obj),
        is_active: bool_or(obj, "is_active", true),
        conditions,
        requirements,
        actions,
        approval,
    })
}

fn parse_condition(obj: &Value, transition_id: i64) -> Result<Condition, ConfigError> {
    let owner = transition_id.to_string();
    let field = opt_str(obj, "field").ok_or_else(|| {
        ConfigError::invalid("transition", &owner, "condition missing 'field'")
    })?;
    let op_name = obj.get("operator").and_then(Value::as_str).unwrap_or("");
    let operator = Operator::parse(op_name).ok_or_else(|| {
        ConfigError::invalid(
            "transition",
            &owner,
            format!("unknown condition operator '{}'", op_name),
        )
    })?;
    let logical_group = match obj.get("logical_group").and_then(Value::as_str) {
        None => LogicalGroup::And,
        Some(g) => LogicalGroup::parse(g).ok_or_else(|| {
            ConfigError::invalid(
                "transition",
                &owner,
                format!("unknown logical group '{}'", g),
            )
        })?,
    };
    let value = match obj.get("value") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.clone()),
    };
    if value.is_none() && !operator.is_unary() {
        return Err(ConfigError::invalid(
            "transition",
            &owner,
            format!("condition on '{}' with operator '{}' needs a value", field, operator),
        ));
    }

    Ok(Condition {
        field,
        operator,
        value,
        logical_group,
        display_order: order(obj),
    })
}

fn parse_requirement(obj: &Value, index: usize) -> Result<Requirement, ConfigError> {
    let id = id_or_index(obj, index);
    let label = id.to_string();
    let type_name = obj.get("type").and_then(Value::as_str).unwrap_or("");
    let config = obj.get("config").cloned().unwrap_or(Value::Null);

    let kind = match type_name {
        "mandatory_field" => {
            let field = opt_str(obj, "field")
                .or_else(|| opt_str(&config, "field"))
                .ok_or_else(|| {
                    ConfigError::invalid("requirement", &label, "mandatory_field needs a 'field'")
                })?;
            RequirementKind::MandatoryField { field }
        }
        "attachment" => RequirementKind::Attachment,
        "note" => RequirementKind::Note,
        "checklist" => {
            let items = array(&config, "items")
                .iter()
                .enumerate()
                .filter_map(|(i, item)| parse_checklist_item(item, i))
                .collect::<Vec<_>>();
            if items.is_empty() {
                return Err(ConfigError::invalid(
                    "requirement",
                    &label,
                    "checklist needs at least one item in 'config.items'",
                ));
            }
            RequirementKind::Checklist { items }
        }
        other => {
            return Err(ConfigError::invalid(
                "requirement",
                &label,
                format!("unknown requirement type '{}'", other),
            ))
        }
    };

    Ok(Requirement {
        id,
        kind,
        label: opt_str(obj, "label"),
        description: opt_str(obj, "description"),
        is_required: bool_or(obj, "is_required", true),
        display_order: order(obj),
    })
}

/// Checklist items may be plain strings or `{id, label}` objects.
fn parse_checklist_item(item: &Value, index: usize) -> Option<ChecklistItem> {
    match item {
        Value::String(s) => Some(ChecklistItem {
            id: s.clone(),
            label: s.clone(),
        }),
        Value::Object(_) => {
            let label = opt_str(item, "label");
            let id = opt_str(item, "id")
                .or_else(|| item.get("id").and_then(Value::as_i64).map(|n| n.to_string()))
                .or_else(|| label.clone())
                .unwrap_or_else(|| format!("item-{}", index + 1));
            Some(ChecklistItem {
                label: label.unwrap_or_else(|| id.clone()),
                id,
            })
        }
        _ => None,
    }
}

fn parse_action(obj: &Value, index: usize) -> Result<Action, ConfigError> {
    let id = id_or_index(obj, index);
    let action_type = opt_str(obj, "type")
        .or_else(|| opt_str(obj, "action_type"))
        .ok_or_else(|| ConfigError::invalid("action", &id.to_string(), "missing 'type' field"))?;

    Ok(Action {
        id,
        action_type,
        config: obj.get("config").cloned().unwrap_or(Value::Null),
        display_order: order(obj),
        is_active: bool_or(obj, "is_active", true),
    })
}

fn parse_approval(obj: &Value) -> Result<Approval, ConfigError> {
    let id = obj.get("id").and_then(Value::as_i64).unwrap_or(0);
    let label = id.to_string();
    let config = obj.get("config").cloned().unwrap_or(Value::Null);
    let type_name = obj.get("approval_type").and_then(Value::as_str).unwrap_or("");

    let approvers = match type_name {
        "specific_users" => {
            let user_ids: Vec<UserId> = array(&config, "user_ids")
                .iter()
                .filter_map(Value::as_i64)
                .collect();
            if user_ids.is_empty() {
                return Err(ConfigError::invalid(
                    "approval",
                    &label,
                    "specific_users needs 'config.user_ids'",
                ));
            }
            ApproverSpec::SpecificUsers { user_ids }
        }
        "role_based" => {
            let roles: Vec<String> = array(&config, "roles")
                .iter()
                .filter_map(|r| {
                    r.as_str()
                        .map(str::to_string)
                        .or_else(|| r.as_i64().map(|n| n.to_string()))
                })
                .collect();
            if roles.is_empty() {
                return Err(ConfigError::invalid(
                    "approval",
                    &label,
                    "role_based needs 'config.roles'",
                ));
            }
            ApproverSpec::RoleBased { roles }
        }
        "manager" => ApproverSpec::Manager {
            owner_field: opt_str(&config, "owner_field").unwrap_or_else(|| "owner_id".to_string()),
        },
        "field_value" => {
            let field = opt_str(&config, "field").ok_or_else(|| {
                ConfigError::invalid("approval", &label, "field_value needs 'config.field'")
            })?;
            ApproverSpec::FieldValue { field }
        }
        other => {
            return Err(ConfigError::invalid(
                "approval",
                &label,
                format!("unknown approval type '{}'", other),
            ))
        }
    };

    let auto_reject_days = bounded_hours_or_days(
        obj,
        "auto_reject_days",
        MAX_AUTO_REJECT_DAYS,
        &label,
    )?;

    let reminder = match bounded_hours_or_days(obj, "reminder_hours", MAX_FOLLOW_UP_HOURS, &label)? {
        None => None,
        Some(every_hours) => Some(ApprovalReminder {
            every_hours,
            max_reminders: match obj.get("max_reminders") {
                None | Some(Value::Null) => 3,
                Some(v) => v
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| {
                        ConfigError::invalid(
                            "approval",
                            &label,
                            "max_reminders must be a non-negative integer",
                        )
                    })?,
            },
        }),
    };

    let escalation = match bounded_hours_or_days(obj, "escalation_hours", MAX_FOLLOW_UP_HOURS, &label)? {
        None => None,
        Some(after_hours) => Some(ApprovalEscalation {
            after_hours,
            target: parse_escalation_target(obj, &label)?,
        }),
    };

    Ok(Approval {
        id,
        approvers,
        require_all: bool_or(obj, "require_all", false),
        auto_reject_days,
        reminder,
        escalation,
        notify_on_pending: bool_or(obj, "notify_on_pending", true),
        notify_on_complete: bool_or(obj, "notify_on_complete", true),
    })
}

/// An optional positive integer no larger than `max`. Absent and null both
/// mean "not configured".
fn bounded_hours_or_days(
    obj: &Value,
    key: &str,
    max: u32,
    label: &str,
) -> Result<Option<u32>, ConfigError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| (1..=max).contains(n))
            .map(Some)
            .ok_or_else(|| {
                ConfigError::invalid(
                    "approval",
                    label,
                    format!("{} must be an integer between 1 and {}", key, max),
                )
            }),
    }
}

fn parse_escalation_target(obj: &Value, label: &str) -> Result<EscalationTarget, ConfigError> {
    let config = obj.get("escalation_config").cloned().unwrap_or(Value::Null);
    match obj.get("escalation_type").and_then(Value::as_str).unwrap_or("manager") {
        "manager" => Ok(EscalationTarget::Manager),
        "specific_user" => config
            .get("user_id")
            .and_then(Value::as_i64)
            .map(|user_id| EscalationTarget::SpecificUser { user_id })
            .ok_or_else(|| {
                ConfigError::invalid(
                    "approval",
                    label,
                    "specific_user escalation needs 'escalation_config.user_id'",
                )
            }),
        "role" => {
            let roles: Vec<String> = array(&config, "roles")
                .iter()
                .filter_map(|r| {
                    r.as_str()
                        .map(str::to_string)
                        .or_else(|| r.as_i64().map(|n| n.to_string()))
                })
                .collect();
            if roles.is_empty() {
                return Err(ConfigError::invalid(
                    "approval",
                    label,
                    "role escalation needs 'escalation_config.roles'",
                ));
            }
            Ok(EscalationTarget::Role { roles })
        }
        other => Err(ConfigError::invalid(
            "approval",
            label,
            format!("unknown escalation type '{}'", other),
        )),
    }
}

/// Decode one SLA object, including its escalations.
pub fn parse_sla(obj: &Value) -> Result<Sla, ConfigError> {
    let id = required_id(obj, "sla")?;
    let label = id.to_string();
    let state_id = obj
        .get("state_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ConfigError::invalid("sla", &label, "missing 'state_id'"))?;
    let duration_hours = obj
        .get("duration_hours")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| (1..=MAX_SLA_DURATION_HOURS).contains(n))
        .ok_or_else(|| {
            ConfigError::invalid(
                "sla",
                &label,
                format!(
                    "duration_hours must be an integer between 1 and {}",
                    MAX_SLA_DURATION_HOURS
                ),
            )
        })?;

    let escalations = array(obj, "escalations")
        .iter()
        .map(parse_escalation)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Sla {
        id,
        state_id,
        name: opt_str(obj, "name").unwrap_or_else(|| format!("SLA {}", id)),
        duration_hours,
        business_hours_only: bool_or(obj, "business_hours_only", false),
        exclude_weekends: bool_or(obj, "exclude_weekends", false),
        is_active: bool_or(obj, "is_active", true),
        escalations,
    })
}

/// Decode one escalation object. An `approaching` trigger must carry a
/// `trigger_value` between 1 and 100.
pub fn parse_escalation(obj: &Value) -> Result<SlaEscalation, ConfigError> {
    let id = required_id(obj, "escalation")?;
    let label = id_label(obj);
    let trigger_type = obj.get("trigger_type").and_then(Value::as_str).unwrap_or("");

    let trigger = match trigger_type {
        "approaching" => {
            let percent = obj
                .get("trigger_value")
                .and_then(Value::as_u64)
                .filter(|n| (1..=100).contains(n))
                .ok_or_else(|| {
                    ConfigError::invalid(
                        "escalation",
                        &label,
                        "approaching trigger needs a trigger_value between 1 and 100",
                    )
                })?;
            EscalationTrigger::Approaching {
                percent: percent as u8,
            }
        }
        "breached" => EscalationTrigger::Breached,
        other => {
            return Err(ConfigError::invalid(
                "escalation",
                &label,
                format!("unknown trigger type '{}'", other),
            ))
        }
    };

    let action_type = opt_str(obj, "action_type").ok_or_else(|| {
        ConfigError::invalid("escalation", &label, "missing 'action_type' field")
    })?;

    Ok(SlaEscalation {
        id,
        trigger,
        action_type,
        config: obj.get("config").cloned().unwrap_or(Value::Null),
        display_order: order(obj),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_config() -> Value {
        json!({
            "id": 1,
            "name": "Deal pipeline",
            "module_id": 3,
            "field_id": 12,
            "field_name": "stage",
            "states": [
                {"id": 1, "name": "Draft", "field_option_value": "draft", "is_initial": true,
                 "position_x": 10, "position_y": 20},
                {"id": 2, "name": "Review", "field_option_value": "review"},
                {"id": 3, "name": "Published", "is_terminal": true}
            ],
            "transitions": [
                {
                    "id": 10, "from_state_id": 1, "to_state_id": 2, "name": "Submit",
                    "button_label": "Send for review",
                    "conditions": [
                        {"field": "amount", "operator": "gt", "value": "100", "logical_group": "AND"},
                        {"field": "region", "operator": "in", "value": ["EU", "US"], "logical_group": "OR"}
                    ],
                    "requirements": [
                        {"id": 1, "type": "note", "label": "Why?"},
                        {"id": 2, "type": "checklist", "config": {"items": ["kyc", {"id": "credit", "label": "Credit check"}]}},
                        {"id": 3, "type": "mandatory_field", "field": "close_date", "is_required": false}
                    ],
                    "actions": [
                        {"id": 1, "type": "notify_user", "config": {"user_ids": [5]}}
                    ],
                    "approval": {
                        "id": 4, "approval_type": "specific_users",
                        "config": {"user_ids": [7, 8]}, "require_all": true, "auto_reject_days": 3
                    }
                },
                {"id": 11, "from_state_id": 2, "to_state_id": 3, "name": "Publish"}
            ],
            "slas": [
                {
                    "id": 1, "state_id": 2, "name": "Review SLA", "duration_hours": 8,
                    "business_hours_only": true, "exclude_weekends": true,
                    "escalations": [
                        {"id": 1, "trigger_type": "approaching", "trigger_value": 80,
                         "action_type": "notify_user", "config": {"user_ids": [9]}},
                        {"id": 2, "trigger_type": "breached", "action_type": "send_email",
                         "config": {"to": ["ops@example.com"]}, "display_order": 1}
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_parse_full_blueprint() {
        let bp = from_config(&make_config()).unwrap();
        assert_eq!(bp.id, 1);
        assert_eq!(bp.field_name.as_deref(), Some("stage"));
        assert!(bp.is_active);
        assert_eq!(bp.states.len(), 3);
        assert_eq!(bp.initial_state().unwrap().name, "Draft");
        assert_eq!(bp.states[0].position, Some(CanvasPosition { x: 10, y: 20 }));
        assert_eq!(bp.state_by_field_value("review").unwrap().id, 2);

        let submit = bp.transition(10).unwrap();
        assert_eq!(submit.label(), "Send for review");
        assert_eq!(submit.conditions.len(), 2);
        assert_eq!(submit.conditions[0].operator, Operator::GreaterThan);
        assert_eq!(submit.conditions[1].operator, Operator::InList);
        assert_eq!(submit.conditions[1].logical_group, LogicalGroup::Or);
        assert!(submit.has_required_requirements());
        assert!(!submit.requirements[2].is_required);
        match &submit.requirements[1].kind {
            RequirementKind::Checklist { items } => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].id, "kyc");
                assert_eq!(items[1].label, "Credit check");
            }
            other => panic!("expected checklist, got {:?}", other),
        }
        let approval = submit.approval.as_ref().unwrap();
        assert!(approval.require_all);
        assert_eq!(approval.auto_reject_days, Some(3));
        assert_eq!(
            approval.approvers,
            ApproverSpec::SpecificUsers { user_ids: vec![7, 8] }
        );

        let publish = bp.transition(11).unwrap();
        assert!(publish.is_active);
        assert!(publish.approval.is_none());
        assert_eq!(publish.label(), "Publish");

        let sla = bp.active_sla_for_state(2).unwrap();
        assert_eq!(sla.duration_seconds(), 8 * 3600);
        assert!(sla.is_calendar_aware());
        assert_eq!(
            sla.escalations[0].trigger,
            EscalationTrigger::Approaching { percent: 80 }
        );
        assert_eq!(sla.escalations[1].trigger, EscalationTrigger::Breached);
    }

    #[test]
    fn test_missing_states_rejected() {
        let err = from_config(&json!({"id": 1, "name": "x"})).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingField {
                field: "states".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let mut config = make_config();
        config["transitions"][0]["conditions"][0]["operator"] = json!("roughly");
        let err = from_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown condition operator 'roughly'"));
    }

    #[test]
    fn test_unknown_requirement_type_rejected() {
        let mut config = make_config();
        config["transitions"][0]["requirements"][0]["type"] = json!("signature");
        let err = from_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown requirement type 'signature'"));
    }

    #[test]
    fn test_unknown_approval_type_rejected() {
        let mut config = make_config();
        config["transitions"][0]["approval"]["approval_type"] = json!("committee");
        let err = from_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown approval type 'committee'"));
    }

    #[test]
    fn test_approaching_without_value_rejected() {
        let mut config = make_config();
        config["slas"][0]["escalations"][0]
            .as_object_mut()
            .unwrap()
            .remove("trigger_value");
        let err = from_config(&config).unwrap_err();
        assert!(err.to_string().contains("trigger_value between 1 and 100"));
    }

    #[test]
    fn test_approaching_out_of_range_rejected() {
        let err = parse_escalation(&json!({
            "id": 9, "trigger_type": "approaching", "trigger_value": 150, "action_type": "notify_user"
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref kind, .. } if kind == "escalation"));
    }

    #[test]
    fn test_condition_without_value_rejected() {
        let mut config = make_config();
        config["transitions"][0]["conditions"][0]
            .as_object_mut()
            .unwrap()
            .remove("value");
        let err = from_config(&config).unwrap_err();
        assert!(err.to_string().contains("needs a value"));
    }

    #[test]
    fn test_is_empty_needs_no_value() {
        let mut config = make_config();
        config["transitions"][0]["conditions"] =
            json!([{"field": "notes", "operator": "is_empty"}]);
        let bp = from_config(&config).unwrap();
        let cond = &bp.transition(10).unwrap().conditions[0];
        assert_eq!(cond.operator, Operator::IsEmpty);
        assert_eq!(cond.logical_group, LogicalGroup::And);
        assert!(cond.value.is_none());
    }

    #[test]
    fn test_empty_checklist_rejected() {
        let mut config = make_config();
        config["transitions"][0]["requirements"][1]["config"] = json!({"items": []});
        assert!(from_config(&config).is_err());
    }

    #[test]
    fn test_sla_duration_upper_bound() {
        let mut config = make_config();
        config["slas"][0]["duration_hours"] = json!(100_000_000);
        let err = from_config(&config).unwrap_err();
        assert!(err.to_string().contains("duration_hours must be an integer between 1 and 87600"));

        config["slas"][0]["duration_hours"] = json!(MAX_SLA_DURATION_HOURS);
        assert!(from_config(&config).is_ok());
    }

    #[test]
    fn test_auto_reject_days_upper_bound() {
        let mut config = make_config();
        config["transitions"][0]["approval"]["auto_reject_days"] = json!(4_000_000);
        let err = from_config(&config).unwrap_err();
        assert!(err.to_string().contains("auto_reject_days must be an integer between 1 and 3650"));

        config["transitions"][0]["approval"]["auto_reject_days"] = json!(0);
        assert!(from_config(&config).is_err());
    }

    #[test]
    fn test_approval_follow_ups() {
        let mut config = make_config();
        let approval = &mut config["transitions"][0]["approval"];
        approval["reminder_hours"] = json!(12);
        approval["escalation_hours"] = json!(48);
        approval["escalation_type"] = json!("role");
        approval["escalation_config"] = json!({"roles": ["finance_lead", 4]});
        let bp = from_config(&config).unwrap();
        let approval = bp.transition(10).unwrap().approval.clone().unwrap();
        assert_eq!(
            approval.reminder,
            Some(ApprovalReminder {
                every_hours: 12,
                max_reminders: 3
            })
        );
        let escalation = approval.escalation.unwrap();
        assert_eq!(escalation.after_hours, 48);
        assert_eq!(
            escalation.target,
            EscalationTarget::Role {
                roles: vec!["finance_lead".to_string(), "4".to_string()]
            }
        );

        // Without escalation_type the manager of the requester is used.
        let mut config = make_config();
        config["transitions"][0]["approval"]["escalation_hours"] = json!(24);
        let bp = from_config(&config).unwrap();
        let approval = bp.transition(10).unwrap().approval.clone().unwrap();
        assert_eq!(approval.escalation.unwrap().target, EscalationTarget::Manager);
        assert!(approval.reminder.is_none());
    }

    #[test]
    fn test_bad_escalation_target_rejected() {
        let mut config = make_config();
        config["transitions"][0]["approval"]["escalation_hours"] = json!(24);
        config["transitions"][0]["approval"]["escalation_type"] = json!("specific_user");
        let err = from_config(&config).unwrap_err();
        assert!(err.to_string().contains("escalation_config.user_id"));

        config["transitions"][0]["approval"]["escalation_type"] = json!("board");
        let err = from_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown escalation type 'board'"));

        config["transitions"][0]["approval"]["escalation_type"] = json!("specific_user");
        config["transitions"][0]["approval"]["escalation_hours"] = json!(9_000);
        assert!(from_config(&config).is_err());
    }

    #[test]
    fn test_manager_default_owner_field() {
        let mut config = make_config();
        config["transitions"][0]["approval"] = json!({"approval_type": "manager", "config": {}});
        let bp = from_config(&config).unwrap();
        assert_eq!(
            bp.transition(10).unwrap().approval.as_ref().unwrap().approvers,
            ApproverSpec::Manager {
                owner_field: "owner_id".to_string()
            }
        );
    }
}
