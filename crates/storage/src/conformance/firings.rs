use std::future::Future;

use super::{at_minutes, TestResult, T0};
use crate::record::EscalationFiringRecord;
use crate::BlueprintStorage;

pub(super) async fn run_firing_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "firings",
        "first_firing_inserted",
        first_firing_inserted(factory).await,
    ));
    results.push(TestResult::from_result(
        "firings",
        "repeat_firing_same_epoch_ignored",
        repeat_firing_same_epoch_ignored(factory).await,
    ));
    results.push(TestResult::from_result(
        "firings",
        "new_epoch_fires_again",
        new_epoch_fires_again(factory).await,
    ));
    results.push(TestResult::from_result(
        "firings",
        "same_escalation_id_in_other_blueprint",
        same_escalation_id_in_other_blueprint(factory).await,
    ));

    results
}

fn firing(escalation_id: i64, record_id: i64, minutes: i64) -> EscalationFiringRecord {
    EscalationFiringRecord {
        escalation_id,
        blueprint_id: 1,
        record_id,
        state_entered_at: at_minutes(minutes),
        fired_at: T0 + time::Duration::hours(12),
    }
}

async fn first_firing_inserted<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let inserted = s
        .record_escalation_firing(firing(1, 100, 0))
        .await
        .map_err(|e| e.to_string())?;
    if !inserted {
        return Err("first firing reported as duplicate".to_string());
    }
    let listed = s
        .list_escalation_firings(1, 100)
        .await
        .map_err(|e| e.to_string())?;
    if listed != vec![firing(1, 100, 0)] {
        return Err(format!("unexpected firings: {:?}", listed));
    }
    Ok(())
}

async fn repeat_firing_same_epoch_ignored<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.record_escalation_firing(firing(1, 100, 0))
        .await
        .map_err(|e| e.to_string())?;
    let mut again = firing(1, 100, 0);
    again.fired_at = again.fired_at + time::Duration::minutes(1);
    let inserted = s
        .record_escalation_firing(again)
        .await
        .map_err(|e| e.to_string())?;
    if inserted {
        return Err("duplicate firing inserted".to_string());
    }
    // Other escalations and other records are independent.
    let other_escalation = s
        .record_escalation_firing(firing(2, 100, 0))
        .await
        .map_err(|e| e.to_string())?;
    let other_record = s
        .record_escalation_firing(firing(1, 101, 0))
        .await
        .map_err(|e| e.to_string())?;
    if !other_escalation || !other_record {
        return Err("independent firing rejected".to_string());
    }
    Ok(())
}

async fn new_epoch_fires_again<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.record_escalation_firing(firing(1, 100, 0))
        .await
        .map_err(|e| e.to_string())?;
    let inserted = s
        .record_escalation_firing(firing(1, 100, 600))
        .await
        .map_err(|e| e.to_string())?;
    if !inserted {
        return Err("re-entry into the state did not reset the firing".to_string());
    }
    Ok(())
}

async fn same_escalation_id_in_other_blueprint<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.record_escalation_firing(firing(1, 100, 0))
        .await
        .map_err(|e| e.to_string())?;
    let mut other = firing(1, 100, 0);
    other.blueprint_id = 2;
    let inserted = s
        .record_escalation_firing(other.clone())
        .await
        .map_err(|e| e.to_string())?;
    if !inserted {
        return Err("firing of another blueprint's escalation was dropped".to_string());
    }
    let listed = s
        .list_escalation_firings(2, 100)
        .await
        .map_err(|e| e.to_string())?;
    if listed != vec![other] {
        return Err(format!("unexpected firings for blueprint 2: {:?}", listed));
    }
    Ok(())
}
