//! Concurrent starts: at most one non-terminal execution per record.

mod common;

use std::collections::BTreeSet;

use blueprint_engine::EngineError;
use blueprint_storage::ExecutionStatus;
use common::Harness;
use serde_json::{json, Value};

const N: usize = 10;

fn simple() -> Value {
    json!({
        "id": 1,
        "name": "Tickets",
        "states": [
            {"id": 1, "name": "New", "is_initial": true},
            {"id": 2, "name": "Closed", "is_terminal": true}
        ],
        "transitions": [
            {"id": 1, "from_state_id": 1, "to_state_id": 2, "name": "Close"}
        ]
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_same_record_exactly_one_wins() {
    let h = Harness::new(simple()).await;

    let mut handles = Vec::with_capacity(N);
    for user in 0..N {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.start_transition(77, 1, user as i64, json!({})).await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome.execution.status, ExecutionStatus::Pending);
                wins += 1;
            }
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(wins, 1, "exactly one start must win");
    assert_eq!(conflicts, N - 1);

    let history = h.engine.get_transition_history(1, 77).await.unwrap();
    assert_eq!(history.len(), 1);
    let state = h.engine.get_record_state(1, 77).await.unwrap();
    assert_eq!(state.current_state_id, 1);
    assert_eq!(state.version, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_different_records_all_succeed() {
    let h = Harness::new(simple()).await;

    let mut handles = Vec::with_capacity(N);
    for record in 0..N {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.start_transition(1000 + record as i64, 1, 1, json!({})).await
        }));
    }

    let mut ids = BTreeSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        ids.insert(outcome.execution.id);
    }
    assert_eq!(ids.len(), N);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completes_apply_once() {
    let h = Harness::new(simple()).await;
    let started = h.engine.start_transition(88, 1, 1, json!({})).await.unwrap();

    let mut handles = Vec::with_capacity(N);
    for _ in 0..N {
        let engine = h.engine.clone();
        let id = started.execution.id;
        handles.push(tokio::spawn(async move { engine.complete_transition(id).await }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => completed += 1,
            Err(EngineError::State { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(completed, 1);
    let state = h.engine.get_record_state(1, 88).await.unwrap();
    assert_eq!(state.current_state_id, 2);
    assert_eq!(state.version, 1);
}
