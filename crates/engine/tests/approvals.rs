//! Approval gates: unanimity, any-one semantics, authorization,
//! notifications, delegation, reassignment and cancellation.

mod common;

use blueprint_engine::{EngineError, NotificationKind, StaticDirectory, Submission};
use blueprint_storage::{ApprovalStatus, ExecutionStatus};
use common::Harness;
use serde_json::{json, Value};

fn contract(approval: Value, requirements: Value) -> Value {
    json!({
        "id": 1,
        "name": "Contracts",
        "states": [
            {"id": 1, "name": "Drafting", "is_initial": true},
            {"id": 2, "name": "Signed", "is_terminal": true}
        ],
        "transitions": [
            {
                "id": 1, "from_state_id": 1, "to_state_id": 2, "name": "Sign",
                "requirements": requirements,
                "approval": approval
            }
        ]
    })
}

fn unanimous(user_ids: Value) -> Value {
    json!({"id": 1, "approval_type": "specific_users", "config": {"user_ids": user_ids}, "require_all": true})
}

#[tokio::test]
async fn unanimous_approval_then_complete() {
    let mut h = Harness::new(contract(unanimous(json!([7, 8, 9])), json!([]))).await;
    let engine = h.engine.clone();

    let started = engine.start_transition(10, 1, 42, json!({})).await.unwrap();
    assert_eq!(started.execution.status, ExecutionStatus::PendingApproval);
    let request = started.approval_request.unwrap();
    assert_eq!(request.approvers, vec![7, 8, 9]);
    assert_eq!(request.requested_by, 42);

    let (users, notification) = h.next_notification().await;
    assert_eq!(users, vec![7, 8, 9]);
    assert_eq!(notification.kind, NotificationKind::ApprovalPending);

    let r = engine.approve(request.id, 7, None).await.unwrap();
    assert_eq!(r.status, ApprovalStatus::Pending);
    let r = engine.approve(request.id, 8, Some("fine".into())).await.unwrap();
    assert_eq!(r.status, ApprovalStatus::Pending);
    assert_eq!(
        engine.get_execution(started.execution.id).await.unwrap().status,
        ExecutionStatus::PendingApproval
    );
    let err = engine.complete_transition(started.execution.id).await.unwrap_err();
    assert!(matches!(err, EngineError::State { .. }));

    let r = engine.approve(request.id, 9, None).await.unwrap();
    assert_eq!(r.status, ApprovalStatus::Approved);
    assert_eq!(r.responses.len(), 3);
    assert_eq!(
        engine.get_execution(started.execution.id).await.unwrap().status,
        ExecutionStatus::Pending
    );

    let (users, notification) = h.next_notification().await;
    assert_eq!(users, vec![42]);
    assert_eq!(notification.kind, NotificationKind::ApprovalApproved);

    engine.complete_transition(started.execution.id).await.unwrap();
    assert_eq!(engine.get_record_state(1, 10).await.unwrap().current_state_id, 2);
}

#[tokio::test]
async fn single_rejection_short_circuits_unanimous_request() {
    let h = Harness::new(contract(unanimous(json!([7, 8, 9])), json!([]))).await;
    let started = h.engine.start_transition(11, 1, 42, json!({})).await.unwrap();
    let request_id = started.approval_request.unwrap().id;

    h.engine.approve(request_id, 7, None).await.unwrap();
    let r = h
        .engine
        .reject(request_id, 8, Some("missing clause".into()))
        .await
        .unwrap();
    assert_eq!(r.status, ApprovalStatus::Rejected);

    let execution = h.engine.get_execution(started.execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.error_message.as_deref(), Some("approval rejected"));
    assert_eq!(h.engine.get_record_state(1, 11).await.unwrap().current_state_id, 1);

    let err = h.engine.approve(request_id, 9, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Approval(_)));
}

#[tokio::test]
async fn any_one_approver_suffices() {
    let approval = json!({"id": 1, "approval_type": "specific_users",
                          "config": {"user_ids": [7, 8, 9]}, "require_all": false});
    let h = Harness::new(contract(approval, json!([]))).await;
    let started = h.engine.start_transition(12, 1, 42, json!({})).await.unwrap();
    let request_id = started.approval_request.unwrap().id;

    let r = h.engine.reject(request_id, 7, None).await.unwrap();
    assert_eq!(r.status, ApprovalStatus::Pending);
    let r = h.engine.approve(request_id, 9, None).await.unwrap();
    assert_eq!(r.status, ApprovalStatus::Approved);
    assert_eq!(
        h.engine.get_execution(started.execution.id).await.unwrap().status,
        ExecutionStatus::Pending
    );
}

#[tokio::test]
async fn only_fresh_resolved_approvers_may_respond() {
    let h = Harness::new(contract(unanimous(json!([7, 8])), json!([]))).await;
    let started = h.engine.start_transition(13, 1, 42, json!({})).await.unwrap();
    let request_id = started.approval_request.unwrap().id;

    let err = h.engine.approve(request_id, 42, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Approval(_)));

    h.engine.approve(request_id, 7, None).await.unwrap();
    let err = h.engine.reject(request_id, 7, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Approval(_)));

    let stored = h.engine.get_approval_request(request_id).await.unwrap();
    assert_eq!(stored.responses.len(), 1);
    assert_eq!(stored.status, ApprovalStatus::Pending);

    let err = h.engine.approve(999, 7, None).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn pending_approvals_for_user_hides_answered_requests() {
    let h = Harness::new(contract(unanimous(json!([7, 8])), json!([]))).await;
    let a = h.engine.start_transition(20, 1, 42, json!({})).await.unwrap();
    let b = h.engine.start_transition(21, 1, 42, json!({})).await.unwrap();
    let a_id = a.approval_request.unwrap().id;
    let b_id = b.approval_request.unwrap().id;

    let ids = |v: Vec<blueprint_storage::ApprovalRequestRecord>| v.iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids(h.engine.pending_approvals_for_user(7).await.unwrap()), vec![a_id, b_id]);

    h.engine.approve(a_id, 7, None).await.unwrap();
    assert_eq!(ids(h.engine.pending_approvals_for_user(7).await.unwrap()), vec![b_id]);
    assert_eq!(ids(h.engine.pending_approvals_for_user(8).await.unwrap()), vec![a_id, b_id]);
    assert!(h.engine.pending_approvals_for_user(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn role_based_approvers_snapshot_from_directory() {
    let approval = json!({"id": 1, "approval_type": "role_based",
                          "config": {"roles": ["legal"]}, "require_all": true});
    let directory = StaticDirectory::new()
        .with_role("legal", 31)
        .with_role("legal", 30)
        .with_role("sales", 40);
    let h = Harness::with_directory(contract(approval, json!([])), directory).await;
    let started = h.engine.start_transition(30, 1, 42, json!({})).await.unwrap();
    assert_eq!(started.approval_request.unwrap().approvers, vec![30, 31]);
}

#[tokio::test]
async fn no_resolvable_approvers_leaves_nothing_behind() {
    let approval = json!({"id": 1, "approval_type": "manager", "config": {}});
    let h = Harness::new(contract(approval, json!([]))).await;

    let err = h
        .engine
        .start_transition(31, 1, 42, json!({"owner_id": 5}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Approval(_)));
    assert!(h.engine.get_transition_history(1, 31).await.unwrap().is_empty());
    assert!(h.engine.get_record_state(1, 31).await.is_err());
}

#[tokio::test]
async fn approver_from_submitted_field() {
    let approval = json!({"id": 1, "approval_type": "field_value", "config": {"field": "reviewer_id"}});
    let requirements = json!([{"id": 1, "type": "mandatory_field", "field": "reviewer_id"}]);
    let h = Harness::new(contract(approval, requirements)).await;

    let started = h.engine.start_transition(32, 1, 42, json!({})).await.unwrap();
    assert_eq!(started.execution.status, ExecutionStatus::PendingRequirements);
    assert!(started.approval_request.is_none());

    let mut submission = Submission::default();
    submission.fields.insert("reviewer_id".into(), json!("77"));
    let submitted = h
        .engine
        .submit_requirements(started.execution.id, submission)
        .await
        .unwrap();
    assert_eq!(submitted.execution.status, ExecutionStatus::PendingApproval);
    assert_eq!(submitted.approval_request.unwrap().approvers, vec![77]);
}

#[tokio::test]
async fn cancel_rejects_pending_request() {
    let h = Harness::new(contract(unanimous(json!([7])), json!([]))).await;
    let started = h.engine.start_transition(40, 1, 42, json!({})).await.unwrap();
    let request_id = started.approval_request.unwrap().id;

    h.engine
        .cancel_transition(started.execution.id, "deal lost")
        .await
        .unwrap();
    let request = h.engine.get_approval_request(request_id).await.unwrap();
    assert_eq!(request.status, ApprovalStatus::Rejected);
    assert_eq!(request.reason.as_deref(), Some("execution cancelled: deal lost"));
    assert!(request.resolved_at.is_some());

    let err = h.engine.approve(request_id, 7, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Approval(_)));
}

#[tokio::test]
async fn delegate_stands_in_for_absent_approver() {
    let directory = StaticDirectory::new().with_delegate(7, 17).with_delegate(8, 9);
    let mut h = Harness::with_directory(contract(unanimous(json!([7, 8, 9])), json!([])), directory).await;
    let started = h.engine.start_transition(50, 1, 42, json!({})).await.unwrap();
    let request = started.approval_request.unwrap();

    // 8 delegates to 9, who is already an approver.
    assert_eq!(request.approvers, vec![9, 17]);
    assert_eq!(
        request
            .delegations
            .iter()
            .map(|d| (d.delegator_id, d.delegate_id))
            .collect::<Vec<_>>(),
        vec![(7, 17), (8, 9)]
    );

    let mut received = Vec::new();
    for _ in 0..3 {
        let (users, notification) = h.next_notification().await;
        received.push((notification.kind, users));
    }
    assert!(received.contains(&(NotificationKind::ApprovalPending, vec![9, 17])));
    assert!(received.contains(&(NotificationKind::ApprovalDelegated, vec![7])));
    assert!(received.contains(&(NotificationKind::ApprovalDelegated, vec![8])));

    let err = h.engine.approve(request.id, 7, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Approval(_)));
    h.engine.approve(request.id, 9, None).await.unwrap();
    let r = h.engine.approve(request.id, 17, None).await.unwrap();
    assert_eq!(r.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn reassignment_moves_the_request() {
    let mut h = Harness::new(contract(unanimous(json!([7, 8])), json!([]))).await;
    let started = h.engine.start_transition(51, 1, 42, json!({})).await.unwrap();
    let request_id = started.approval_request.unwrap().id;
    let _ = h.next_notification().await;

    h.engine.approve(request_id, 7, None).await.unwrap();
    let err = h
        .engine
        .reassign_approval(request_id, 7, 20, 1, "already answered")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Approval(_)));
    let err = h
        .engine
        .reassign_approval(request_id, 8, 7, 1, "duplicate")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Approval(_)));

    let r = h
        .engine
        .reassign_approval(request_id, 8, 20, 1, "on leave")
        .await
        .unwrap();
    assert_eq!(r.approvers, vec![7, 20]);
    assert_eq!(r.reassignments.len(), 1);
    assert_eq!(r.reassignments[0].from_user_id, 8);
    assert_eq!(r.reassignments[0].reason, "on leave");

    let (users, notification) = h.next_notification().await;
    assert_eq!(users, vec![20]);
    assert_eq!(notification.kind, NotificationKind::ApprovalReassigned);

    let err = h.engine.approve(request_id, 8, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Approval(_)));
    let r = h.engine.approve(request_id, 20, None).await.unwrap();
    assert_eq!(r.status, ApprovalStatus::Approved);

    let err = h
        .engine
        .reassign_approval(request_id, 20, 21, 1, "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Approval(_)));
    let stored = h.engine.get_approval_request(request_id).await.unwrap();
    assert_eq!(stored.reassignments.len(), 1);
}
