use std::future::Future;

use super::{at_minutes, seed_record, TestResult, T0};
use crate::{BlueprintStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "init",
        "initialize_creates_record_at_version_0",
        initialize_creates_record_at_version_0(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "initialize_sets_state_and_entered_at",
        initialize_sets_state_and_entered_at(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "double_initialize_returns_already_initialized",
        double_initialize_returns_already_initialized(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "double_initialize_across_snapshots",
        double_initialize_across_snapshots(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "missing_record_returns_not_found",
        missing_record_returns_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "different_records_are_independent",
        different_records_are_independent(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "list_record_states_filters_by_blueprint",
        list_record_states_filters_by_blueprint(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn initialize_creates_record_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 100, 1).await?;
    let rec = s.get_record_state(1, 100).await.map_err(|e| e.to_string())?;
    if rec.version != 0 {
        return Err(format!("expected version 0, got {}", rec.version));
    }
    Ok(())
}

async fn initialize_sets_state_and_entered_at<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let entered = at_minutes(30);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let created = s
        .initialize_record_state(&mut snap, 1, 100, 7, entered)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_record_state(1, 100).await.map_err(|e| e.to_string())?;
    if rec != created {
        return Err(format!("stored {:?} differs from returned {:?}", rec, created));
    }
    if rec.current_state_id != 7 || rec.state_entered_at != entered {
        return Err(format!("unexpected record state {:?}", rec));
    }
    Ok(())
}

async fn double_initialize_returns_already_initialized<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.initialize_record_state(&mut snap, 1, 100, 1, T0)
        .await
        .map_err(|e| e.to_string())?;
    match s.initialize_record_state(&mut snap, 1, 100, 1, T0).await {
        Err(StorageError::AlreadyInitialized {
            blueprint_id: 1,
            record_id: 100,
        }) => Ok(()),
        other => Err(format!("expected AlreadyInitialized, got {:?}", other)),
    }
}

async fn double_initialize_across_snapshots<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 100, 1).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.initialize_record_state(&mut snap, 1, 100, 2, T0).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyInitialized { .. }) => Ok(()),
        other => Err(format!("expected AlreadyInitialized, got {:?}", other)),
    }
}

async fn missing_record_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_record_state(1, 404).await {
        Err(StorageError::RecordStateNotFound { .. }) => {}
        other => return Err(format!("get_record_state: expected not found, got {:?}", other)),
    }
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.get_record_state_for_update(&mut snap, 1, 404).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::RecordStateNotFound { .. }) => Ok(()),
        other => Err(format!("for_update: expected not found, got {:?}", other)),
    }
}

async fn different_records_are_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 100, 1).await?;
    seed_record(&s, 1, 101, 2).await?;
    seed_record(&s, 2, 100, 3).await?;

    let a = s.get_record_state(1, 100).await.map_err(|e| e.to_string())?;
    let b = s.get_record_state(1, 101).await.map_err(|e| e.to_string())?;
    let c = s.get_record_state(2, 100).await.map_err(|e| e.to_string())?;
    if (a.current_state_id, b.current_state_id, c.current_state_id) != (1, 2, 3) {
        return Err(format!("records bled into each other: {:?} {:?} {:?}", a, b, c));
    }
    Ok(())
}

async fn list_record_states_filters_by_blueprint<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 2, 5, 1).await?;
    seed_record(&s, 1, 9, 1).await?;
    seed_record(&s, 1, 3, 1).await?;

    let all = s.list_record_states(None).await.map_err(|e| e.to_string())?;
    let keys: Vec<(i64, i64)> = all.iter().map(|r| (r.blueprint_id, r.record_id)).collect();
    if keys != vec![(1, 3), (1, 9), (2, 5)] {
        return Err(format!("expected ordered keys, got {:?}", keys));
    }
    let one = s
        .list_record_states(Some(1))
        .await
        .map_err(|e| e.to_string())?;
    if one.len() != 2 {
        return Err(format!("expected 2 records for blueprint 1, got {}", one.len()));
    }
    Ok(())
}
