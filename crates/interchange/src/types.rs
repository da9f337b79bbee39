//! Typed structs for blueprint configuration.
//!
//! Every loosely-typed field of the stored configuration (`type`,
//! `operator`, `approval_type`, `trigger_type`) is represented here as an
//! enum with a typed payload per variant. Action configs stay opaque
//! `serde_json::Value`s: the engine never interprets them, it only hands
//! them to the registered handler for the action type.

use serde::{Deserialize, Serialize};

pub type BlueprintId = i64;
pub type StateId = i64;
pub type TransitionId = i64;
pub type RequirementId = i64;
pub type ActionId = i64;
pub type ApprovalId = i64;
pub type SlaId = i64;
pub type EscalationId = i64;
pub type RecordId = i64;
pub type UserId = i64;

/// Longest accepted SLA: ten years of counted hours.
pub const MAX_SLA_DURATION_HOURS: u32 = 87_600;

/// Longest accepted auto-reject window, in days.
pub const MAX_AUTO_REJECT_DAYS: u32 = 3_650;

/// Longest accepted reminder or escalation delay, in hours.
pub const MAX_FOLLOW_UP_HOURS: u32 = 8_760;

// ── Blueprint ───────────────────────────────────────────────────────

/// A workflow bound to one (module, field) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Blueprint {
    pub id: BlueprintId,
    pub name: String,
    pub module_id: i64,
    pub field_id: i64,
    /// API name of the bound field. Used to seed a record's state from its
    /// current field value.
    pub field_name: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub states: Vec<State>,
    pub transitions: Vec<Transition>,
    pub slas: Vec<Sla>,
}

impl Blueprint {
    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.iter().find(|s| s.id == id)
    }

    pub fn initial_state(&self) -> Option<&State> {
        self.states.iter().find(|s| s.is_initial)
    }

    /// The state mirroring the given option value of the bound field.
    pub fn state_by_field_value(&self, value: &str) -> Option<&State> {
        self.states
            .iter()
            .find(|s| s.field_option_value.as_deref() == Some(value))
    }

    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == id)
    }

    pub fn sla(&self, id: SlaId) -> Option<&Sla> {
        self.slas.iter().find(|s| s.id == id)
    }

    /// The SLA bound to a state, active or not.
    pub fn sla_for_state(&self, state_id: StateId) -> Option<&Sla> {
        self.slas.iter().find(|s| s.state_id == state_id)
    }

    /// The state's SLA if it exists and is active.
    pub fn active_sla_for_state(&self, state_id: StateId) -> Option<&Sla> {
        self.sla_for_state(state_id).filter(|s| s.is_active)
    }

    pub fn state_name(&self, id: StateId) -> Option<&str> {
        self.state(id).map(|s| s.name.as_str())
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Canvas coordinates used by the visual editor. No behavioral meaning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanvasPosition {
    pub x: i32,
    pub y: i32,
}

/// A node in the blueprint graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct State {
    pub id: StateId,
    pub name: String,
    pub field_option_value: Option<String>,
    pub color: Option<String>,
    pub is_initial: bool,
    pub is_terminal: bool,
    pub position: Option<CanvasPosition>,
}

// ── Transition ──────────────────────────────────────────────────────

/// A directed edge between states. `from_state_id = None` means the
/// transition is available from any state (blueprint entry).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub id: TransitionId,
    pub from_state_id: Option<StateId>,
    pub to_state_id: StateId,
    pub name: String,
    pub description: Option<String>,
    pub button_label: Option<String>,
    pub display_order: i32,
    pub is_active: bool,
    pub conditions: Vec<Condition>,
    pub requirements: Vec<Requirement>,
    pub actions: Vec<Action>,
    pub approval: Option<Approval>,
}

impl Transition {
    /// True if any requirement blocks completion.
    pub fn has_required_requirements(&self) -> bool {
        self.requirements.iter().any(|r| r.is_required)
    }

    pub fn requires_approval(&self) -> bool {
        self.approval.is_some()
    }

    /// Label for the UI button; falls back to the transition name.
    pub fn label(&self) -> &str {
        self.button_label.as_deref().unwrap_or(&self.name)
    }
}

// ── Conditions ──────────────────────────────────────────────────────

/// How a condition combines with its siblings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LogicalGroup {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl LogicalGroup {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Some(LogicalGroup::And),
            "OR" => Some(LogicalGroup::Or),
            _ => None,
        }
    }
}

/// Comparison operator of a guard condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    IsEmpty,
    IsNotEmpty,
    InList,
    NotInList,
}

impl Operator {
    /// Parse an operator name, accepting the short aliases used by the
    /// configuration editor (`eq`, `ne`, `gt`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        let op = match s {
            "equals" | "eq" | "=" | "==" => Operator::Equals,
            "not_equals" | "ne" | "!=" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "greater_than" | "gt" | ">" => Operator::GreaterThan,
            "less_than" | "lt" | "<" => Operator::LessThan,
            "greater_or_equal" | "gte" | ">=" => Operator::GreaterOrEqual,
            "less_or_equal" | "lte" | "<=" => Operator::LessOrEqual,
            "is_empty" => Operator::IsEmpty,
            "is_not_empty" => Operator::IsNotEmpty,
            "in_list" | "in" => Operator::InList,
            "not_in_list" | "not_in" => Operator::NotInList,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::GreaterOrEqual => "greater_or_equal",
            Operator::LessOrEqual => "less_or_equal",
            Operator::IsEmpty => "is_empty",
            Operator::IsNotEmpty => "is_not_empty",
            Operator::InList => "in_list",
            Operator::NotInList => "not_in_list",
        }
    }

    /// Operators that ignore the condition's comparison value.
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsEmpty | Operator::IsNotEmpty)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A guard predicate over one record field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Option<serde_json::Value>,
    pub logical_group: LogicalGroup,
    pub display_order: i32,
}

// ── Requirements ────────────────────────────────────────────────────

/// One entry of a checklist requirement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistItem {
    pub id: String,
    pub label: String,
}

/// What a requirement asks the user to supply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequirementKind {
    MandatoryField { field: String },
    Attachment,
    Note,
    Checklist { items: Vec<ChecklistItem> },
}

impl RequirementKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RequirementKind::MandatoryField { .. } => "mandatory_field",
            RequirementKind::Attachment => "attachment",
            RequirementKind::Note => "note",
            RequirementKind::Checklist { .. } => "checklist",
        }
    }
}

/// Data that must be gathered before an execution may complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    pub id: RequirementId,
    pub kind: RequirementKind,
    pub label: Option<String>,
    pub description: Option<String>,
    /// Advisory requirements (`false`) are shown but never block.
    pub is_required: bool,
    pub display_order: i32,
}

// ── Actions ─────────────────────────────────────────────────────────

/// An opaque side effect invoked after a transition completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: ActionId,
    pub action_type: String,
    pub config: serde_json::Value,
    pub display_order: i32,
    pub is_active: bool,
}

// ── Approval ────────────────────────────────────────────────────────

/// How the approver set of a request is resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "approval_type", rename_all = "snake_case")]
pub enum ApproverSpec {
    SpecificUsers { user_ids: Vec<UserId> },
    RoleBased { roles: Vec<String> },
    /// The manager of the user stored in `owner_field` of the record.
    Manager { owner_field: String },
    /// A user id stored directly in a record field.
    FieldValue { field: String },
}

impl ApproverSpec {
    pub fn approval_type(&self) -> &'static str {
        match self {
            ApproverSpec::SpecificUsers { .. } => "specific_users",
            ApproverSpec::RoleBased { .. } => "role_based",
            ApproverSpec::Manager { .. } => "manager",
            ApproverSpec::FieldValue { .. } => "field_value",
        }
    }
}

/// Who a stalled approval request is handed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "escalation_type", rename_all = "snake_case")]
pub enum EscalationTarget {
    /// The manager of the requesting user.
    Manager,
    SpecificUser { user_id: UserId },
    /// The lowest user id holding any listed role.
    Role { roles: Vec<String> },
}

impl EscalationTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationTarget::Manager => "manager",
            EscalationTarget::SpecificUser { .. } => "specific_user",
            EscalationTarget::Role { .. } => "role",
        }
    }
}

/// Repeat notifications to approvers who have not answered yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalReminder {
    /// Hours since the request (or the previous reminder).
    pub every_hours: u32,
    pub max_reminders: u32,
}

/// Hand an unanswered request to a deciding user after a delay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalEscalation {
    pub after_hours: u32,
    pub target: EscalationTarget,
}

/// Sign-off gate on a transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Approval {
    pub id: ApprovalId,
    pub approvers: ApproverSpec,
    /// Unanimous (`true`) versus any-one-approves (`false`).
    pub require_all: bool,
    pub auto_reject_days: Option<u32>,
    pub reminder: Option<ApprovalReminder>,
    pub escalation: Option<ApprovalEscalation>,
    pub notify_on_pending: bool,
    pub notify_on_complete: bool,
}

// ── SLA ─────────────────────────────────────────────────────────────

/// When an escalation fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "trigger_type", rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// Fires once `percent` of the SLA duration has been counted.
    Approaching { percent: u8 },
    Breached,
}

impl EscalationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationTrigger::Approaching { .. } => "approaching",
            EscalationTrigger::Breached => "breached",
        }
    }
}

/// A side effect fired when an SLA approaches or breaches its deadline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlaEscalation {
    pub id: EscalationId,
    pub trigger: EscalationTrigger,
    pub action_type: String,
    pub config: serde_json::Value,
    pub display_order: i32,
}

/// Maximum dwell time for records in one state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sla {
    pub id: SlaId,
    pub state_id: StateId,
    pub name: String,
    pub duration_hours: u32,
    pub business_hours_only: bool,
    pub exclude_weekends: bool,
    pub is_active: bool,
    pub escalations: Vec<SlaEscalation>,
}

impl Sla {
    pub fn duration_seconds(&self) -> i64 {
        i64::from(self.duration_hours) * 3600
    }

    /// True if the clock only advances inside a business calendar.
    pub fn is_calendar_aware(&self) -> bool {
        self.business_hours_only || self.exclude_weekends
    }

    /// Escalations sorted by `display_order`.
    pub fn ordered_escalations(&self) -> Vec<&SlaEscalation> {
        let mut escalations: Vec<&SlaEscalation> = self.escalations.iter().collect();
        escalations.sort_by_key(|e| (e.display_order, e.id));
        escalations
    }
}
