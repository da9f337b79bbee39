//! Approval coordinator.
//!
//! Approver sets are resolved once, when a request is created, through the
//! resolver registered for the approval type. Responses are folded into the
//! request by [`record_response`]; the engine owns the transaction around it.
//!
//! Unanswered requests are followed up by the scheduler in priority order:
//! auto-reject once expired, else escalate once `escalation_hours` have
//! passed, else remind the silent approvers every `reminder_hours`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use blueprint_interchange::{Approval, ApproverSpec, EscalationTarget, UserId};
use blueprint_storage::{
    ApprovalRequestRecord, ApprovalResponse, ApprovalStatus, Decision, Reassignment,
};
use serde_json::Value;
use time::{Duration, OffsetDateTime};

use crate::action::user_id;
use crate::directory::Directory;
use crate::error::EngineError;

/// Reason stored on requests rejected by the expiry sweep.
pub const AUTO_REJECT_REASON: &str = "auto-rejected: approval window expired";

// ──────────────────────────────────────────────
// Resolvers
// ──────────────────────────────────────────────

/// Resolves the approver set of one approval type.
#[async_trait]
pub trait ApproverResolver: Send + Sync {
    async fn resolve(
        &self,
        spec: &ApproverSpec,
        record_data: &Value,
    ) -> Result<Vec<UserId>, EngineError>;
}

/// Approval type string to resolver.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<String, Arc<dyn ApproverResolver>>,
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("types", &self.resolvers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in approval types.
    pub fn with_builtin(directory: Arc<dyn Directory>) -> Self {
        let mut registry = Self::new();
        registry.register("specific_users", Arc::new(SpecificUsersResolver));
        registry.register(
            "role_based",
            Arc::new(RoleBasedResolver {
                directory: directory.clone(),
            }),
        );
        registry.register("manager", Arc::new(ManagerResolver { directory }));
        registry.register("field_value", Arc::new(FieldValueResolver));
        registry
    }

    pub fn register(&mut self, approval_type: impl Into<String>, resolver: Arc<dyn ApproverResolver>) {
        self.resolvers.insert(approval_type.into(), resolver);
    }

    /// Resolve the approvers of `approval`: ascending, without duplicates.
    /// An empty set is an error.
    pub async fn resolve(
        &self,
        approval: &Approval,
        record_data: &Value,
    ) -> Result<Vec<UserId>, EngineError> {
        let approval_type = approval.approvers.approval_type();
        let resolver = self.resolvers.get(approval_type).ok_or_else(|| {
            EngineError::Approval(format!("no resolver registered for '{}'", approval_type))
        })?;
        let mut users = resolver.resolve(&approval.approvers, record_data).await?;
        users.sort_unstable();
        users.dedup();
        if users.is_empty() {
            return Err(EngineError::Approval(format!(
                "approval {} resolved no approvers ({})",
                approval.id, approval_type
            )));
        }
        Ok(users)
    }
}

fn mismatch(expected: &str, spec: &ApproverSpec) -> EngineError {
    EngineError::Approval(format!(
        "{} resolver given a {} spec",
        expected,
        spec.approval_type()
    ))
}

pub struct SpecificUsersResolver;

#[async_trait]
impl ApproverResolver for SpecificUsersResolver {
    async fn resolve(&self, spec: &ApproverSpec, _: &Value) -> Result<Vec<UserId>, EngineError> {
        match spec {
            ApproverSpec::SpecificUsers { user_ids } => Ok(user_ids.clone()),
            other => Err(mismatch("specific_users", other)),
        }
    }
}

/// Users holding any listed role at resolution time.
pub struct RoleBasedResolver {
    directory: Arc<dyn Directory>,
}

#[async_trait]
impl ApproverResolver for RoleBasedResolver {
    async fn resolve(&self, spec: &ApproverSpec, _: &Value) -> Result<Vec<UserId>, EngineError> {
        match spec {
            ApproverSpec::RoleBased { roles } => Ok(self.directory.users_with_roles(roles).await?),
            other => Err(mismatch("role_based", other)),
        }
    }
}

/// The manager of the user in the record's owner field.
pub struct ManagerResolver {
    directory: Arc<dyn Directory>,
}

#[async_trait]
impl ApproverResolver for ManagerResolver {
    async fn resolve(
        &self,
        spec: &ApproverSpec,
        record_data: &Value,
    ) -> Result<Vec<UserId>, EngineError> {
        let ApproverSpec::Manager { owner_field } = spec else {
            return Err(mismatch("manager", spec));
        };
        let Some(owner) = record_data.get(owner_field).and_then(user_id) else {
            return Ok(Vec::new());
        };
        Ok(self.directory.manager_of(owner).await?.into_iter().collect())
    }
}

/// A user id stored in a record field.
pub struct FieldValueResolver;

#[async_trait]
impl ApproverResolver for FieldValueResolver {
    async fn resolve(
        &self,
        spec: &ApproverSpec,
        record_data: &Value,
    ) -> Result<Vec<UserId>, EngineError> {
        match spec {
            ApproverSpec::FieldValue { field } => Ok(record_data
                .get(field)
                .and_then(user_id)
                .into_iter()
                .collect()),
            other => Err(mismatch("field_value", other)),
        }
    }
}

// ──────────────────────────────────────────────
// Responses
// ──────────────────────────────────────────────

/// Fold one approver's response into a pending request and return its new
/// status. The request is left untouched on error.
pub fn record_response(
    request: &mut ApprovalRequestRecord,
    require_all: bool,
    approver_id: UserId,
    decision: Decision,
    comments: Option<String>,
    now: OffsetDateTime,
) -> Result<ApprovalStatus, EngineError> {
    if is_resolved(request) {
        return Err(EngineError::Approval(format!(
            "approval request {} is already {}",
            request.id,
            request.status.as_str()
        )));
    }
    if !request.approvers.contains(&approver_id) {
        return Err(EngineError::Approval(format!(
            "user {} is not an approver of request {}",
            approver_id, request.id
        )));
    }
    if request.responses.iter().any(|r| r.approver_id == approver_id) {
        return Err(EngineError::Approval(format!(
            "user {} has already responded to request {}",
            approver_id, request.id
        )));
    }

    request.responses.push(ApprovalResponse {
        approver_id,
        decision,
        comments,
        responded_at: now,
    });
    let status = if request.escalated_to == Some(approver_id) {
        match decision {
            Decision::Approved => ApprovalStatus::Approved,
            Decision::Rejected => ApprovalStatus::Rejected,
        }
    } else {
        resolve_status(request, require_all)
    };
    if status != ApprovalStatus::Pending {
        request.status = status;
        request.resolved_at = Some(now);
    }
    Ok(status)
}

/// Status implied by the responses so far.
///
/// Unanimous requests reject on the first rejection and approve once every
/// approver has approved. Any-one requests approve on the first approval
/// and reject only once every approver has rejected.
pub fn resolve_status(request: &ApprovalRequestRecord, require_all: bool) -> ApprovalStatus {
    let approved = request
        .responses
        .iter()
        .filter(|r| r.decision == Decision::Approved)
        .count();
    let rejected = request.responses.len() - approved;
    let everyone = request.approvers.len();

    if require_all {
        if rejected > 0 {
            ApprovalStatus::Rejected
        } else if approved >= everyone {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Pending
        }
    } else if approved > 0 {
        ApprovalStatus::Approved
    } else if rejected >= everyone {
        ApprovalStatus::Rejected
    } else {
        ApprovalStatus::Pending
    }
}

pub fn is_resolved(request: &ApprovalRequestRecord) -> bool {
    request.status != ApprovalStatus::Pending
}

/// Pending and past its auto-reject deadline.
pub fn is_expired(request: &ApprovalRequestRecord, now: OffsetDateTime) -> bool {
    !is_resolved(request) && request.expires_at.is_some_and(|at| now >= at)
}

/// `created_at + auto_reject_days`, if configured.
pub fn expiry(
    approval: &Approval,
    created_at: OffsetDateTime,
) -> Result<Option<OffsetDateTime>, EngineError> {
    let Some(days) = approval.auto_reject_days else {
        return Ok(None);
    };
    created_at
        .checked_add(Duration::days(i64::from(days)))
        .map(Some)
        .ok_or_else(|| {
            EngineError::validation(format!(
                "approval {}: auto_reject_days {} from {} is outside the supported date range",
                approval.id, days, created_at
            ))
        })
}

fn hours_since(from: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (now - from).whole_hours()
}

/// Pending, not yet escalated, and open for at least `escalation_hours`.
pub fn escalation_due(request: &ApprovalRequestRecord, approval: &Approval, now: OffsetDateTime) -> bool {
    let Some(escalation) = &approval.escalation else {
        return false;
    };
    !is_resolved(request)
        && request.escalated_to.is_none()
        && hours_since(request.created_at, now) >= i64::from(escalation.after_hours)
}

/// Pending, under the reminder cap, and `reminder_hours` past the previous
/// reminder (or the request itself).
pub fn reminder_due(request: &ApprovalRequestRecord, approval: &Approval, now: OffsetDateTime) -> bool {
    let Some(reminder) = approval.reminder else {
        return false;
    };
    let since = request.last_reminder_at.unwrap_or(request.created_at);
    !is_resolved(request)
        && request.reminder_count < reminder.max_reminders
        && hours_since(since, now) >= i64::from(reminder.every_hours)
}

/// Approvers who have not responded yet.
pub fn silent_approvers(request: &ApprovalRequestRecord) -> Vec<UserId> {
    request
        .approvers
        .iter()
        .copied()
        .filter(|a| request.responses.iter().all(|r| r.approver_id != *a))
        .collect()
}

/// The user a stalled request is handed to, if the directory knows one.
pub async fn escalation_target(
    target: &EscalationTarget,
    request: &ApprovalRequestRecord,
    directory: &dyn Directory,
) -> Result<Option<UserId>, EngineError> {
    Ok(match target {
        EscalationTarget::Manager => directory.manager_of(request.requested_by).await?,
        EscalationTarget::SpecificUser { user_id } => Some(*user_id),
        EscalationTarget::Role { roles } => directory.users_with_roles(roles).await?.first().copied(),
    })
}

/// Hand the request to `target`, adding them as an approver if needed.
pub fn escalate(request: &mut ApprovalRequestRecord, target: UserId, now: OffsetDateTime) {
    if !request.approvers.contains(&target) {
        request.approvers.push(target);
        request.approvers.sort_unstable();
    }
    request.escalated_to = Some(target);
    request.escalated_at = Some(now);
}

/// Swap approver `from` for `to` on a pending request.
pub fn reassign(
    request: &mut ApprovalRequestRecord,
    from: UserId,
    to: UserId,
    reassigned_by: UserId,
    reason: &str,
    now: OffsetDateTime,
) -> Result<(), EngineError> {
    if is_resolved(request) {
        return Err(EngineError::Approval(format!(
            "cannot reassign approval request {}: it is already {}",
            request.id,
            request.status.as_str()
        )));
    }
    if !request.approvers.contains(&from) {
        return Err(EngineError::Approval(format!(
            "user {} is not an approver of request {}",
            from, request.id
        )));
    }
    if request.responses.iter().any(|r| r.approver_id == from) {
        return Err(EngineError::Approval(format!(
            "user {} has already responded to request {}",
            from, request.id
        )));
    }
    if request.approvers.contains(&to) {
        return Err(EngineError::Approval(format!(
            "user {} is already an approver of request {}",
            to, request.id
        )));
    }
    for approver in request.approvers.iter_mut().filter(|a| **a == from) {
        *approver = to;
    }
    request.approvers.sort_unstable();
    if request.escalated_to == Some(from) {
        request.escalated_to = Some(to);
    }
    request.reassignments.push(Reassignment {
        from_user_id: from,
        to_user_id: to,
        reassigned_by,
        reason: reason.to_string(),
        reassigned_at: now,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use blueprint_interchange::{ApprovalEscalation, ApprovalReminder};
    use serde_json::json;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-01-06 10:00 UTC);

    fn request(approvers: Vec<UserId>) -> ApprovalRequestRecord {
        ApprovalRequestRecord {
            id: 1,
            approval_id: 1,
            transition_id: 1,
            execution_id: 1,
            blueprint_id: 1,
            record_id: 1,
            requested_by: 42,
            status: ApprovalStatus::Pending,
            approvers,
            responses: vec![],
            created_at: NOW,
            expires_at: None,
            resolved_at: None,
            reason: None,
            reminder_count: 0,
            last_reminder_at: None,
            escalated_to: None,
            escalated_at: None,
            delegations: vec![],
            reassignments: vec![],
        }
    }

    fn approval(approvers: ApproverSpec) -> Approval {
        Approval {
            id: 9,
            approvers,
            require_all: true,
            auto_reject_days: Some(3),
            reminder: Some(ApprovalReminder {
                every_hours: 24,
                max_reminders: 2,
            }),
            escalation: Some(ApprovalEscalation {
                after_hours: 48,
                target: EscalationTarget::Manager,
            }),
            notify_on_pending: true,
            notify_on_complete: true,
        }
    }

    #[test]
    fn unanimous_needs_every_approval() {
        let mut req = request(vec![1, 2, 3]);
        assert_eq!(
            record_response(&mut req, true, 1, Decision::Approved, None, NOW).unwrap(),
            ApprovalStatus::Pending
        );
        assert_eq!(
            record_response(&mut req, true, 2, Decision::Approved, None, NOW).unwrap(),
            ApprovalStatus::Pending
        );
        assert_eq!(req.status, ApprovalStatus::Pending);
        assert_eq!(
            record_response(&mut req, true, 3, Decision::Approved, None, NOW).unwrap(),
            ApprovalStatus::Approved
        );
        assert_eq!(req.resolved_at, Some(NOW));
    }

    #[test]
    fn unanimous_rejects_on_first_rejection() {
        let mut req = request(vec![1, 2, 3]);
        record_response(&mut req, true, 1, Decision::Approved, None, NOW).unwrap();
        let status =
            record_response(&mut req, true, 2, Decision::Rejected, Some("no".into()), NOW).unwrap();
        assert_eq!(status, ApprovalStatus::Rejected);
        let err = record_response(&mut req, true, 3, Decision::Approved, None, NOW).unwrap_err();
        assert!(matches!(err, EngineError::Approval(_)));
        assert_eq!(req.responses.len(), 2);
    }

    #[test]
    fn any_one_ignores_partial_rejections() {
        let mut req = request(vec![1, 2, 3]);
        assert_eq!(
            record_response(&mut req, false, 1, Decision::Rejected, None, NOW).unwrap(),
            ApprovalStatus::Pending
        );
        assert_eq!(
            record_response(&mut req, false, 2, Decision::Approved, None, NOW).unwrap(),
            ApprovalStatus::Approved
        );
    }

    #[test]
    fn any_one_rejects_when_everyone_rejected() {
        let mut req = request(vec![1, 2]);
        record_response(&mut req, false, 1, Decision::Rejected, None, NOW).unwrap();
        assert_eq!(
            record_response(&mut req, false, 2, Decision::Rejected, None, NOW).unwrap(),
            ApprovalStatus::Rejected
        );
    }

    #[test]
    fn outsiders_and_repeat_responses_refused() {
        let mut req = request(vec![1, 2]);
        assert!(record_response(&mut req, true, 7, Decision::Approved, None, NOW).is_err());
        record_response(&mut req, true, 1, Decision::Approved, None, NOW).unwrap();
        assert!(record_response(&mut req, true, 1, Decision::Approved, None, NOW).is_err());
        assert_eq!(req.responses.len(), 1);
    }

    #[test]
    fn expiry_window() {
        let a = approval(ApproverSpec::SpecificUsers { user_ids: vec![1] });
        let mut req = request(vec![1]);
        req.expires_at = expiry(&a, NOW).unwrap();
        assert_eq!(req.expires_at, Some(datetime!(2025-01-09 10:00 UTC)));
        assert!(!is_expired(&req, datetime!(2025-01-09 09:59 UTC)));
        assert!(is_expired(&req, datetime!(2025-01-09 10:00 UTC)));
        req.status = ApprovalStatus::Approved;
        assert!(!is_expired(&req, datetime!(2025-02-01 00:00 UTC)));
    }

    #[test]
    fn expiry_out_of_range_is_an_error() {
        let mut a = approval(ApproverSpec::SpecificUsers { user_ids: vec![1] });
        a.auto_reject_days = Some(4_000_000);
        assert!(matches!(expiry(&a, NOW), Err(EngineError::Validation { .. })));
        a.auto_reject_days = None;
        assert_eq!(expiry(&a, NOW).unwrap(), None);
    }

    #[test]
    fn reminders_are_spaced_and_capped() {
        let a = approval(ApproverSpec::SpecificUsers { user_ids: vec![1, 2] });
        let mut req = request(vec![1, 2]);
        assert!(!reminder_due(&req, &a, NOW + Duration::hours(23)));
        assert!(reminder_due(&req, &a, NOW + Duration::hours(24)));

        req.reminder_count = 1;
        req.last_reminder_at = Some(NOW + Duration::hours(24));
        assert!(!reminder_due(&req, &a, NOW + Duration::hours(47)));
        assert!(reminder_due(&req, &a, NOW + Duration::hours(48)));

        req.reminder_count = 2;
        assert!(!reminder_due(&req, &a, NOW + Duration::days(30)));
    }

    #[test]
    fn escalation_happens_once() {
        let a = approval(ApproverSpec::SpecificUsers { user_ids: vec![1] });
        let mut req = request(vec![1]);
        assert!(!escalation_due(&req, &a, NOW + Duration::hours(47)));
        assert!(escalation_due(&req, &a, NOW + Duration::hours(48)));
        escalate(&mut req, 30, NOW + Duration::hours(48));
        assert_eq!(req.approvers, vec![1, 30]);
        assert!(!escalation_due(&req, &a, NOW + Duration::hours(96)));
    }

    #[test]
    fn escalation_target_decides_alone() {
        let mut req = request(vec![1, 2, 3]);
        record_response(&mut req, true, 1, Decision::Approved, None, NOW).unwrap();
        escalate(&mut req, 30, NOW);
        let status = record_response(&mut req, true, 30, Decision::Approved, None, NOW).unwrap();
        assert_eq!(status, ApprovalStatus::Approved);

        let mut req = request(vec![1, 2]);
        escalate(&mut req, 2, NOW);
        let status = record_response(&mut req, false, 2, Decision::Rejected, None, NOW).unwrap();
        assert_eq!(status, ApprovalStatus::Rejected);
    }

    #[test]
    fn reassignment_swaps_a_silent_approver() {
        let mut req = request(vec![1, 2]);
        record_response(&mut req, true, 1, Decision::Approved, None, NOW).unwrap();
        assert!(reassign(&mut req, 1, 5, 99, "left", NOW).is_err());
        assert!(reassign(&mut req, 2, 1, 99, "dup", NOW).is_err());
        assert!(reassign(&mut req, 7, 5, 99, "outsider", NOW).is_err());

        reassign(&mut req, 2, 5, 99, "on leave", NOW).unwrap();
        assert_eq!(req.approvers, vec![1, 5]);
        assert_eq!(req.reassignments.len(), 1);
        assert_eq!(req.reassignments[0].reason, "on leave");
        assert_eq!(silent_approvers(&req), vec![5]);

        req.status = ApprovalStatus::Approved;
        assert!(reassign(&mut req, 5, 6, 99, "late", NOW).is_err());
    }

    #[tokio::test]
    async fn escalation_targets_from_directory() {
        let dir = StaticDirectory::new()
            .with_manager(42, 77)
            .with_role("director", 9)
            .with_role("director", 4);
        let req = request(vec![1]);
        assert_eq!(
            escalation_target(&EscalationTarget::Manager, &req, &dir).await.unwrap(),
            Some(77)
        );
        assert_eq!(
            escalation_target(&EscalationTarget::Role { roles: vec!["director".into()] }, &req, &dir)
                .await
                .unwrap(),
            Some(4)
        );
        assert_eq!(
            escalation_target(&EscalationTarget::SpecificUser { user_id: 12 }, &req, &dir)
                .await
                .unwrap(),
            Some(12)
        );
        let empty = StaticDirectory::new();
        assert_eq!(
            escalation_target(&EscalationTarget::Manager, &req, &empty).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn builtin_resolvers() {
        let dir = Arc::new(
            StaticDirectory::new()
                .with_role("legal", 4)
                .with_role("legal", 2)
                .with_manager(12, 30),
        );
        let registry = ResolverRegistry::with_builtin(dir);
        let data = json!({"owner_id": "12", "reviewer": 8});

        let users = registry
            .resolve(
                &approval(ApproverSpec::SpecificUsers { user_ids: vec![5, 3, 5] }),
                &data,
            )
            .await
            .unwrap();
        assert_eq!(users, vec![3, 5]);

        let users = registry
            .resolve(
                &approval(ApproverSpec::RoleBased { roles: vec!["legal".into()] }),
                &data,
            )
            .await
            .unwrap();
        assert_eq!(users, vec![2, 4]);

        let users = registry
            .resolve(
                &approval(ApproverSpec::Manager { owner_field: "owner_id".into() }),
                &data,
            )
            .await
            .unwrap();
        assert_eq!(users, vec![30]);

        let users = registry
            .resolve(
                &approval(ApproverSpec::FieldValue { field: "reviewer".into() }),
                &data,
            )
            .await
            .unwrap();
        assert_eq!(users, vec![8]);
    }

    #[tokio::test]
    async fn empty_resolution_is_an_error() {
        let registry = ResolverRegistry::with_builtin(Arc::new(StaticDirectory::new()));
        let err = registry
            .resolve(
                &approval(ApproverSpec::RoleBased { roles: vec!["nobody".into()] }),
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Approval(_)));
    }
}
