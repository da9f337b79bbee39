use std::future::Future;
use std::sync::Arc;

use super::{at_minutes, make_execution, seed_record, TestResult, T0};
use crate::record::EscalationFiringRecord;
use crate::{BlueprintStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_starts_exactly_one_wins",
        concurrent_starts_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_exactly_one_wins",
        concurrent_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_initialize_exactly_one_wins",
        concurrent_initialize_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_starts_different_records_all_succeed",
        concurrent_starts_different_records_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_firings_exactly_one_inserts",
        concurrent_firings_exactly_one_inserts(factory).await,
    ));

    results
}

/// Count winners of a race; every task must resolve to `Ok(bool)`.
async fn tally(
    handles: Vec<tokio::task::JoinHandle<Result<bool, StorageError>>>,
) -> Result<usize, String> {
    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    Ok(winners)
}

// ── Concurrent start: exactly one active execution ──────────────────────────

/// N tasks run the check-then-insert sequence of a transition start on the
/// same record. Exactly one commits an execution; the rest see the active
/// execution or are rejected by the uniqueness check.
async fn concurrent_starts_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_record(storage.as_ref(), 1, 100, 1).await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.lock_record(&mut snap, 1, 100).await?;
            if s.find_active_execution(&mut snap, 1, 100).await?.is_some() {
                s.abort_snapshot(snap).await?;
                return Ok(false);
            }
            match s.insert_execution(&mut snap, make_execution(1, 100)).await {
                Ok(_) => match s.commit_snapshot(snap).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::ActiveExecutionExists { .. }) => Ok(false),
                    Err(e) => Err(e),
                },
                Err(StorageError::ActiveExecutionExists { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let winners = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    let executions = storage
        .list_executions(1, 100)
        .await
        .map_err(|e| e.to_string())?;
    if executions.len() != 1 {
        return Err(format!("expected 1 stored execution, got {}", executions.len()));
    }
    Ok(())
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each try to move the record from version 0. Exactly one commit
/// succeeds; the rest must get ConcurrentConflict.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_record(storage.as_ref(), 1, 100, 1).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let result = s
                .update_record_state(&mut snap, 1, 100, 0, 2, at_minutes(i as i64))
                .await;
            match result {
                Ok(_new_version) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let winners = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    let rec = storage
        .get_record_state(1, 100)
        .await
        .map_err(|e| e.to_string())?;
    if rec.version != 1 {
        return Err(format!("expected final version 1, got {}", rec.version));
    }
    Ok(())
}

// ── Concurrent initialization: exactly one wins ─────────────────────────────

async fn concurrent_initialize_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let result = s
                .initialize_record_state(&mut snap, 1, 100, i as i64 + 1, T0)
                .await;
            match result {
                Ok(_) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::AlreadyInitialized { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let winners = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    Ok(())
}

// ── Different records: all succeed ──────────────────────────────────────────

/// No false conflicts when there is no contention.
async fn concurrent_starts_different_records_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let record_id = 100 + i as i64;
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.initialize_record_state(&mut snap, 1, record_id, 1, T0)
                .await?;
            s.insert_execution(&mut snap, make_execution(1, record_id))
                .await?;
            s.commit_snapshot(snap).await?;
            Ok(true)
        }));
    }

    let winners = tally(handles).await?;
    if winners != N {
        return Err(format!("expected {N} successes, got {winners}"));
    }
    Ok(())
}

// ── Firing dedup under contention ────────────────────────────────────────────

/// N scheduler instances try to fire the same escalation for the same
/// epoch. Exactly one insert succeeds.
async fn concurrent_firings_exactly_one_inserts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            s.record_escalation_firing(EscalationFiringRecord {
                escalation_id: 1,
                blueprint_id: 1,
                record_id: 100,
                state_entered_at: T0,
                fired_at: at_minutes(60 + i as i64),
            })
            .await
        }));
    }

    let winners = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 firing, got {winners}"));
    }
    Ok(())
}
