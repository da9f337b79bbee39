use std::future::Future;

use super::{at_minutes, make_execution, seed_execution, TestResult};
use crate::record::ExecutionStatus;
use crate::{BlueprintStorage, StorageError};

pub(super) async fn run_execution_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "executions",
        "insert_assigns_distinct_ids",
        insert_assigns_distinct_ids(factory).await,
    ));
    results.push(TestResult::from_result(
        "executions",
        "second_active_execution_rejected",
        second_active_execution_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "executions",
        "terminal_execution_frees_record",
        terminal_execution_frees_record(factory).await,
    ));
    results.push(TestResult::from_result(
        "executions",
        "update_execution_persists",
        update_execution_persists(factory).await,
    ));
    results.push(TestResult::from_result(
        "executions",
        "update_unknown_execution_not_found",
        update_unknown_execution_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "executions",
        "history_keeps_every_execution",
        history_keeps_every_execution(factory).await,
    ));

    results
}

async fn insert_assigns_distinct_ids<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a = seed_execution(&s, 1, 100).await?;
    let b = seed_execution(&s, 1, 101).await?;
    if a.id == b.id {
        return Err(format!("duplicate execution id {}", a.id));
    }
    if a.status != ExecutionStatus::Started || a.completed_at.is_some() {
        return Err(format!("unexpected fresh execution: {:?}", a));
    }
    Ok(())
}

async fn second_active_execution_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let first = seed_execution(&s, 1, 100).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.insert_execution(&mut snap, make_execution(1, 100)).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ActiveExecutionExists { execution_id, .. }) if execution_id == first.id => {
            Ok(())
        }
        other => Err(format!("expected ActiveExecutionExists, got {:?}", other)),
    }
}

async fn terminal_execution_frees_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut first = seed_execution(&s, 1, 100).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    first.status = ExecutionStatus::Cancelled;
    first.error_message = Some("changed my mind".to_string());
    s.update_execution(&mut snap, first.clone())
        .await
        .map_err(|e| e.to_string())?;
    // Same snapshot: the cancellation is visible to the uniqueness check.
    let second = s
        .insert_execution(&mut snap, make_execution(1, 100))
        .await
        .map_err(|e| format!("insert after cancel: {e}"))?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let active = s
        .find_active_execution(&mut snap, 1, 100)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if active.map(|e| e.id) != Some(second.id) {
        return Err("expected the new execution to be the active one".to_string());
    }
    Ok(())
}

async fn update_execution_persists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let exec = seed_execution(&s, 1, 100).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut locked = s
        .get_execution_for_update(&mut snap, exec.id)
        .await
        .map_err(|e| e.to_string())?;
    locked.status = ExecutionStatus::Completed;
    locked.completed_at = Some(at_minutes(5));
    locked.requirements_data = Some(serde_json::json!({"note": "done"}));
    s.update_execution(&mut snap, locked.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_execution(exec.id).await.map_err(|e| e.to_string())?;
    if stored != locked {
        return Err(format!("expected {:?}, got {:?}", locked, stored));
    }
    Ok(())
}

async fn update_unknown_execution_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut exec = seed_execution(&s, 1, 100).await?;
    exec.id += 1000;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let update = s.update_execution(&mut snap, exec.clone()).await;
    let read = s.get_execution_for_update(&mut snap, exec.id).await;
    let _ = s.abort_snapshot(snap).await;
    match (update, read) {
        (
            Err(StorageError::ExecutionNotFound { .. }),
            Err(StorageError::ExecutionNotFound { .. }),
        ) => Ok(()),
        other => Err(format!("expected ExecutionNotFound twice, got {:?}", other)),
    }
}

async fn history_keeps_every_execution<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut exec = seed_execution(&s, 1, 100).await?;
        ids.push(exec.id);
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        exec.status = ExecutionStatus::Completed;
        s.update_execution(&mut snap, exec)
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }
    seed_execution(&s, 1, 200).await?;

    let history = s.list_executions(1, 100).await.map_err(|e| e.to_string())?;
    let listed: Vec<i64> = history.iter().map(|e| e.id).collect();
    if listed != ids {
        return Err(format!("expected {:?} oldest first, got {:?}", ids, listed));
    }
    Ok(())
}
