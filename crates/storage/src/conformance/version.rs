use std::future::Future;

use super::{at_minutes, seed_record, TestResult};
use crate::{BlueprintStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "version",
        "update_increments_version",
        update_increments_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "stale_version_conflicts",
        stale_version_conflicts(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_missing_record_not_found",
        update_missing_record_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "sequential_updates_chain_versions",
        sequential_updates_chain_versions(factory).await,
    ));

    results
}

async fn update_increments_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 100, 1).await?;
    let entered = at_minutes(90);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let v = s
        .update_record_state(&mut snap, 1, 100, 0, 2, entered)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    if v != 1 {
        return Err(format!("expected new version 1, got {v}"));
    }
    let rec = s.get_record_state(1, 100).await.map_err(|e| e.to_string())?;
    if rec.current_state_id != 2 || rec.state_entered_at != entered || rec.version != 1 {
        return Err(format!("unexpected record after update: {:?}", rec));
    }
    Ok(())
}

async fn stale_version_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 100, 1).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_record_state(&mut snap, 1, 100, 0, 2, at_minutes(1))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_record_state(&mut snap, 1, 100, 0, 3, at_minutes(2))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict {
            expected_version: 0,
            ..
        }) => {}
        other => return Err(format!("expected ConcurrentConflict, got {:?}", other)),
    }
    let rec = s.get_record_state(1, 100).await.map_err(|e| e.to_string())?;
    if rec.current_state_id != 2 {
        return Err(format!("conflicting update leaked: {:?}", rec));
    }
    Ok(())
}

async fn update_missing_record_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_record_state(&mut snap, 1, 404, 0, 2, at_minutes(0))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::RecordStateNotFound { .. }) => Ok(()),
        other => Err(format!("expected RecordStateNotFound, got {:?}", other)),
    }
}

async fn sequential_updates_chain_versions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 100, 1).await?;
    for (i, state) in [2_i64, 3, 1, 2].into_iter().enumerate() {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        let rec = s
            .get_record_state_for_update(&mut snap, 1, 100)
            .await
            .map_err(|e| e.to_string())?;
        if rec.version != i as i64 {
            return Err(format!("step {i}: expected version {i}, got {}", rec.version));
        }
        s.update_record_state(&mut snap, 1, 100, rec.version, state, at_minutes(i as i64))
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }
    let rec = s.get_record_state(1, 100).await.map_err(|e| e.to_string())?;
    if rec.version != 4 || rec.current_state_id != 2 {
        return Err(format!("unexpected final record: {:?}", rec));
    }
    Ok(())
}
