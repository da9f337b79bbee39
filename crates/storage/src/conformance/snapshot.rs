use std::future::Future;

use super::{make_execution, seed_record, TestResult, T0};
use crate::{BlueprintStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_init_invisible",
        uncommitted_init_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "aborted_writes_discarded",
        aborted_writes_discarded(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_discards_writes",
        dropped_snapshot_discards_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "snapshot_reads_its_own_writes",
        snapshot_reads_its_own_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "commit_applies_all_writes",
        commit_applies_all_writes(factory).await,
    ));

    results
}

async fn uncommitted_init_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let outside = s.get_record_state(1, 100).await;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    match outside {
        Err(StorageError::RecordStateNotFound { .. }) => {}
        other => return Err(format!("uncommitted record visible: {:?}", other)),
    }
    s.get_record_state(1, 100)
        .await
        .map(|_| ())
        .map_err(|e| format!("committed record not visible: {e}"))
}

async fn aborted_writes_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let exec = s
        .insert_execution(&mut snap, make_execution(1, 100))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s.get_record_state(1, 100).await.is_ok() {
        return Err("aborted record state visible".to_string());
    }
    if s.get_execution(exec.id).await.is_ok() {
        return Err("aborted execution visible".to_string());
    }
    Ok(())
}

async fn dropped_snapshot_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.initialize_record_state(&mut snap, 1, 100, 1, T0)
            .await
            .map_err(|e| e.to_string())?;
    }
    if s.get_record_state(1, 100).await.is_ok() {
        return Err("dropped snapshot write visible".to_string());
    }
    // The row lock must have been released with the dropped snapshot.
    seed_record(&s, 1, 100, 2).await
}

async fn snapshot_reads_its_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let rec = s
        .get_record_state_for_update(&mut snap, 1, 100)
        .await
        .map_err(|e| format!("own write not visible: {e}"))?;
    let exec = s
        .insert_execution(&mut snap, make_execution(1, 100))
        .await
        .map_err(|e| e.to_string())?;
    let active = s
        .find_active_execution(&mut snap, 1, 100)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if rec.current_state_id != 1 {
        return Err(format!("unexpected state {}", rec.current_state_id));
    }
    if active.map(|a| a.id) != Some(exec.id) {
        return Err("staged execution not found as active".to_string());
    }
    Ok(())
}

async fn commit_applies_all_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 100, 1).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rec = s
        .get_record_state_for_update(&mut snap, 1, 100)
        .await
        .map_err(|e| e.to_string())?;
    s.update_record_state(&mut snap, 1, 100, rec.version, 2, T0)
        .await
        .map_err(|e| e.to_string())?;
    let exec = s
        .insert_execution(&mut snap, make_execution(1, 100))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let after = s.get_record_state(1, 100).await.map_err(|e| e.to_string())?;
    if after.current_state_id != 2 || after.version != 1 {
        return Err(format!("record state not committed: {:?}", after));
    }
    s.get_execution(exec.id)
        .await
        .map(|_| ())
        .map_err(|e| format!("execution not committed: {e}"))
}
