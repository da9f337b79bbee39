use std::future::Future;

use super::{at_minutes, make_approval_request, seed_execution, TestResult};
use crate::record::{ApprovalResponse, ApprovalStatus, Decision, Delegation, Reassignment};
use crate::{BlueprintStorage, StorageError};

pub(super) async fn run_approval_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "approvals",
        "insert_creates_pending_request",
        insert_creates_pending_request(factory).await,
    ));
    results.push(TestResult::from_result(
        "approvals",
        "responses_persist",
        responses_persist(factory).await,
    ));
    results.push(TestResult::from_result(
        "approvals",
        "follow_up_fields_persist",
        follow_up_fields_persist(factory).await,
    ));
    results.push(TestResult::from_result(
        "approvals",
        "pending_lookup_by_execution",
        pending_lookup_by_execution(factory).await,
    ));
    results.push(TestResult::from_result(
        "approvals",
        "list_filters_by_status",
        list_filters_by_status(factory).await,
    ));
    results.push(TestResult::from_result(
        "approvals",
        "unknown_request_not_found",
        unknown_request_not_found(factory).await,
    ));

    results
}

async fn insert_creates_pending_request<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let exec = seed_execution(&s, 1, 100).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let req = s
        .insert_approval_request(&mut snap, make_approval_request(&exec, vec![7, 8]))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_approval_request(req.id).await.map_err(|e| e.to_string())?;
    if stored.status != ApprovalStatus::Pending
        || stored.approvers != vec![7, 8]
        || !stored.responses.is_empty()
        || stored.execution_id != exec.id
        || stored.reminder_count != 0
        || stored.escalated_to.is_some()
        || stored.delegations
            != vec![Delegation {
                delegator_id: 9,
                delegate_id: 8,
            }]
    {
        return Err(format!("unexpected fresh request: {:?}", stored));
    }
    Ok(())
}

async fn responses_persist<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let exec = seed_execution(&s, 1, 100).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let req = s
        .insert_approval_request(&mut snap, make_approval_request(&exec, vec![7, 8]))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut locked = s
        .get_approval_request_for_update(&mut snap, req.id)
        .await
        .map_err(|e| e.to_string())?;
    locked.responses.push(ApprovalResponse {
        approver_id: 7,
        decision: Decision::Rejected,
        comments: Some("missing figures".to_string()),
        responded_at: at_minutes(10),
    });
    locked.status = ApprovalStatus::Rejected;
    locked.resolved_at = Some(at_minutes(10));
    s.update_approval_request(&mut snap, locked.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_approval_request(req.id).await.map_err(|e| e.to_string())?;
    if stored != locked {
        return Err(format!("expected {:?}, got {:?}", locked, stored));
    }
    Ok(())
}

async fn follow_up_fields_persist<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let exec = seed_execution(&s, 1, 100).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let req = s
        .insert_approval_request(&mut snap, make_approval_request(&exec, vec![7, 8]))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut locked = s
        .get_approval_request_for_update(&mut snap, req.id)
        .await
        .map_err(|e| e.to_string())?;
    locked.reminder_count = 2;
    locked.last_reminder_at = Some(at_minutes(120));
    locked.escalated_to = Some(30);
    locked.escalated_at = Some(at_minutes(240));
    locked.approvers = vec![7, 11, 30];
    locked.reassignments.push(Reassignment {
        from_user_id: 8,
        to_user_id: 11,
        reassigned_by: 1,
        reason: "on leave".to_string(),
        reassigned_at: at_minutes(60),
    });
    s.update_approval_request(&mut snap, locked.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_approval_request(req.id).await.map_err(|e| e.to_string())?;
    if stored != locked {
        return Err(format!("expected {:?}, got {:?}", locked, stored));
    }
    if stored.status != ApprovalStatus::Pending {
        return Err("follow-up bookkeeping changed the status".to_string());
    }
    Ok(())
}

async fn pending_lookup_by_execution<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let exec = seed_execution(&s, 1, 100).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let req = s
        .insert_approval_request(&mut snap, make_approval_request(&exec, vec![7]))
        .await
        .map_err(|e| e.to_string())?;
    let staged = s
        .find_pending_approval_for_execution(&mut snap, exec.id)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    if staged.map(|r| r.id) != Some(req.id) {
        return Err("staged request not found for its execution".to_string());
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let other = s
        .find_pending_approval_for_execution(&mut snap, exec.id + 1000)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if other.is_some() {
        return Err("found a request for an unrelated execution".to_string());
    }
    Ok(())
}

async fn list_filters_by_status<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a = seed_execution(&s, 1, 100).await?;
    let b = seed_execution(&s, 1, 101).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let ra = s
        .insert_approval_request(&mut snap, make_approval_request(&a, vec![7]))
        .await
        .map_err(|e| e.to_string())?;
    let mut rb = s
        .insert_approval_request(&mut snap, make_approval_request(&b, vec![7]))
        .await
        .map_err(|e| e.to_string())?;
    rb.status = ApprovalStatus::Approved;
    s.update_approval_request(&mut snap, rb)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let pending = s
        .list_approval_requests(Some(ApprovalStatus::Pending))
        .await
        .map_err(|e| e.to_string())?;
    let all = s
        .list_approval_requests(None)
        .await
        .map_err(|e| e.to_string())?;
    if pending.len() != 1 || pending[0].id != ra.id {
        return Err(format!("expected only request {} pending, got {:?}", ra.id, pending));
    }
    if all.len() != 2 {
        return Err(format!("expected 2 requests, got {}", all.len()));
    }
    Ok(())
}

async fn unknown_request_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_approval_request(404).await {
        Err(StorageError::ApprovalRequestNotFound { request_id: 404 }) => {}
        other => return Err(format!("expected ApprovalRequestNotFound, got {:?}", other)),
    }
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.get_approval_request_for_update(&mut snap, 404).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ApprovalRequestNotFound { .. }) => Ok(()),
        other => Err(format!("expected ApprovalRequestNotFound, got {:?}", other)),
    }
}
