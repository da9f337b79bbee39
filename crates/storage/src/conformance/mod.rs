//! Conformance test suite for `BlueprintStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `BlueprintStorage` implementation can run to verify correctness. The
//! suite covers:
//!
//! - **Initialization**: record state creation, duplicate detection
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Version validation / OCC**: optimistic concurrency conflict detection
//! - **Executions**: active-execution uniqueness, updates, audit trail
//! - **Approvals**: request lifecycle, follow-up bookkeeping and pending lookups
//! - **Firings**: escalation firing dedup per blueprint and state-entry epoch
//! - **Concurrency**: real parallel tasks racing on the same record
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use blueprint_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod approvals;
mod concurrent;
mod executions;
mod firings;
mod init;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use time::macros::datetime;
use time::OffsetDateTime;

use crate::record::{
    Delegation, ExecutionRecord, ExecutionStatus, NewApprovalRequest, NewExecution,
};
use crate::BlueprintStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "executions").
    pub category: String,
    /// Test name (e.g. "initialize_creates_record_at_version_0").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(executions::run_execution_tests(&factory).await);
    results.extend(approvals::run_approval_tests(&factory).await);
    results.extend(firings::run_firing_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: fixtures with sensible defaults ─────────────────────────────────

const T0: OffsetDateTime = datetime!(2025-01-06 09:00 UTC);

fn at_minutes(minutes: i64) -> OffsetDateTime {
    T0 + time::Duration::minutes(minutes)
}

fn make_execution(blueprint_id: i64, record_id: i64) -> NewExecution {
    NewExecution {
        blueprint_id,
        transition_id: 10,
        record_id,
        from_state_id: 1,
        to_state_id: 2,
        status: ExecutionStatus::Started,
        executed_by: 42,
        started_at: T0,
        record_data: serde_json::json!({"amount": 100}),
    }
}

fn make_approval_request(execution: &ExecutionRecord, approvers: Vec<i64>) -> NewApprovalRequest {
    NewApprovalRequest {
        approval_id: 5,
        transition_id: execution.transition_id,
        execution_id: execution.id,
        blueprint_id: execution.blueprint_id,
        record_id: execution.record_id,
        requested_by: execution.executed_by,
        approvers,
        delegations: vec![Delegation {
            delegator_id: 9,
            delegate_id: 8,
        }],
        created_at: T0,
        expires_at: Some(T0 + time::Duration::days(3)),
    }
}

/// Create and commit a record state at `state_id`.
async fn seed_record<S: BlueprintStorage>(
    s: &S,
    blueprint_id: i64,
    record_id: i64,
    state_id: i64,
) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.initialize_record_state(&mut snap, blueprint_id, record_id, state_id, T0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())
}

/// Insert and commit a fresh execution.
async fn seed_execution<S: BlueprintStorage>(
    s: &S,
    blueprint_id: i64,
    record_id: i64,
) -> Result<ExecutionRecord, String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let exec = s
        .insert_execution(&mut snap, make_execution(blueprint_id, record_id))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(exec)
}
