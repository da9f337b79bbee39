use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Where a record currently sits in a blueprint. `state_entered_at` is the
/// epoch of the SLA clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStateRecord {
    pub blueprint_id: i64,
    pub record_id: i64,
    pub current_state_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub state_entered_at: OffsetDateTime,
    pub version: i64,
}

/// Status of a transition execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    PendingRequirements,
    PendingApproval,
    Pending,
    Completed,
    Cancelled,
}

impl ExecutionStatus {
    /// Completed and cancelled executions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Started => "STARTED",
            ExecutionStatus::PendingRequirements => "PENDING_REQUIREMENTS",
            ExecutionStatus::PendingApproval => "PENDING_APPROVAL",
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt to traverse a transition for a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub blueprint_id: i64,
    pub transition_id: i64,
    pub record_id: i64,
    pub from_state_id: i64,
    pub to_state_id: i64,
    pub status: ExecutionStatus,
    pub executed_by: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Record field values supplied when the execution started.
    pub record_data: serde_json::Value,
    /// The accepted requirement submission, if any.
    pub requirements_data: Option<serde_json::Value>,
    /// Cancellation reason.
    pub error_message: Option<String>,
}

/// Fields of an execution row before the backend assigns its id.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub blueprint_id: i64,
    pub transition_id: i64,
    pub record_id: i64,
    pub from_state_id: i64,
    pub to_state_id: i64,
    pub status: ExecutionStatus,
    pub executed_by: i64,
    pub started_at: OffsetDateTime,
    pub record_data: serde_json::Value,
}

/// Status of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

/// One approver's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approver_id: i64,
    pub decision: Decision,
    pub comments: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub responded_at: OffsetDateTime,
}

/// A sign-off request attached to one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequestRecord {
    pub id: i64,
    pub approval_id: i64,
    pub transition_id: i64,
    pub execution_id: i64,
    pub blueprint_id: i64,
    pub record_id: i64,
    pub requested_by: i64,
    pub status: ApprovalStatus,
    /// Approver set resolved when the request was created.
    pub approvers: Vec<i64>,
    pub responses: Vec<ApprovalResponse>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    pub reason: Option<String>,
    #[serde(default)]
    pub reminder_count: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_reminder_at: Option<OffsetDateTime>,
    /// Once set, this approver's decision resolves the request on its own.
    #[serde(default)]
    pub escalated_to: Option<i64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub escalated_at: Option<OffsetDateTime>,
    /// Approvers replaced by their delegate when the request was created.
    #[serde(default)]
    pub delegations: Vec<Delegation>,
    #[serde(default)]
    pub reassignments: Vec<Reassignment>,
}

/// `delegate_id` stands in for `delegator_id` on one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator_id: i64,
    pub delegate_id: i64,
}

/// One approver swapped for another after the request was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reassignment {
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub reassigned_by: i64,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub reassigned_at: OffsetDateTime,
}

/// Fields of an approval request before the backend assigns its id.
#[derive(Debug, Clone)]
pub struct NewApprovalRequest {
    pub approval_id: i64,
    pub transition_id: i64,
    pub execution_id: i64,
    pub blueprint_id: i64,
    pub record_id: i64,
    pub requested_by: i64,
    pub approvers: Vec<i64>,
    pub delegations: Vec<Delegation>,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

/// Marks that an escalation fired for one state-entry epoch of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationFiringRecord {
    pub escalation_id: i64,
    pub blueprint_id: i64,
    pub record_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub state_entered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub fired_at: OffsetDateTime,
}
