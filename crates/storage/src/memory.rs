//! In-memory `BlueprintStorage` backend.
//!
//! Rows live in ordered maps behind one data mutex. A snapshot stages its
//! writes locally and holds one owned row-lock guard per touched
//! `(blueprint_id, record_id)`; commit applies the staged rows under the
//! data mutex and then releases the row locks. Dropping a snapshot discards
//! its writes and releases its locks. A row's lock entry lives only while
//! some snapshot holds or waits for it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StorageError;
use crate::record::{
    ApprovalRequestRecord, ApprovalStatus, EscalationFiringRecord, ExecutionRecord,
    NewApprovalRequest, NewExecution, RecordStateRecord,
};
use crate::traits::BlueprintStorage;

type RowKey = (i64, i64);
type LockTable = Arc<SyncMutex<HashMap<RowKey, Arc<Mutex<()>>>>>;

/// Held row lock. Dropping the last reference to a row forgets its entry.
struct RowGuard {
    key: RowKey,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.key)
            .is_some_and(|row| Arc::strong_count(row) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

#[derive(Default)]
struct Tables {
    record_states: BTreeMap<RowKey, RecordStateRecord>,
    executions: BTreeMap<i64, ExecutionRecord>,
    approvals: BTreeMap<i64, ApprovalRequestRecord>,
    firings: Vec<EscalationFiringRecord>,
    /// `(blueprint_id, escalation_id, record_id, entered_at)`
    firing_keys: HashSet<(i64, i64, i64, i128)>,
}

/// Open transaction against [`InMemoryStorage`].
pub struct MemorySnapshot {
    guards: HashMap<RowKey, RowGuard>,
    record_states: BTreeMap<RowKey, RecordStateRecord>,
    executions: BTreeMap<i64, ExecutionRecord>,
    approvals: BTreeMap<i64, ApprovalRequestRecord>,
}

/// Reference backend used by tests, the CLI and embedders without a database.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
    row_locks: LockTable,
    next_execution_id: AtomicI64,
    next_approval_id: AtomicI64,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_row(&self, snapshot: &mut MemorySnapshot, key: RowKey) {
        if snapshot.guards.contains_key(&key) {
            return;
        }
        let row = {
            let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = row.lock_owned().await;
        snapshot.guards.insert(
            key,
            RowGuard {
                key,
                guard: Some(guard),
                table: self.row_locks.clone(),
            },
        );
    }

    #[cfg(test)]
    fn tracked_row_locks(&self) -> usize {
        self.row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn record_state_view(
        &self,
        snapshot: &MemorySnapshot,
        key: RowKey,
    ) -> Option<RecordStateRecord> {
        if let Some(staged) = snapshot.record_states.get(&key) {
            return Some(staged.clone());
        }
        self.tables.lock().await.record_states.get(&key).cloned()
    }

    async fn execution_view(
        &self,
        snapshot: &MemorySnapshot,
        execution_id: i64,
    ) -> Option<ExecutionRecord> {
        if let Some(staged) = snapshot.executions.get(&execution_id) {
            return Some(staged.clone());
        }
        self.tables.lock().await.executions.get(&execution_id).cloned()
    }

    async fn approval_view(
        &self,
        snapshot: &MemorySnapshot,
        request_id: i64,
    ) -> Option<ApprovalRequestRecord> {
        if let Some(staged) = snapshot.approvals.get(&request_id) {
            return Some(staged.clone());
        }
        self.tables.lock().await.approvals.get(&request_id).cloned()
    }

    /// Committed executions of a record overlaid with the snapshot's staged rows.
    async fn executions_view(&self, snapshot: &MemorySnapshot, key: RowKey) -> Vec<ExecutionRecord> {
        let mut merged: BTreeMap<i64, ExecutionRecord> = {
            let tables = self.tables.lock().await;
            tables
                .executions
                .values()
                .filter(|e| (e.blueprint_id, e.record_id) == key)
                .map(|e| (e.id, e.clone()))
                .collect()
        };
        for e in snapshot
            .executions
            .values()
            .filter(|e| (e.blueprint_id, e.record_id) == key)
        {
            merged.insert(e.id, e.clone());
        }
        merged.into_values().collect()
    }
}

#[async_trait]
impl BlueprintStorage for InMemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot {
            guards: HashMap::new(),
            record_states: BTreeMap::new(),
            executions: BTreeMap::new(),
            approvals: BTreeMap::new(),
        })
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;

        for (key, staged) in &snapshot.record_states {
            let committed = tables.record_states.get(key).map(|r| r.version);
            let consistent = match committed {
                None => staged.version == 0,
                Some(v) => staged.version == v + 1,
            };
            if !consistent {
                return Err(StorageError::ConcurrentConflict {
                    blueprint_id: key.0,
                    record_id: key.1,
                    expected_version: staged.version - 1,
                });
            }
        }

        for exec in snapshot.executions.values().filter(|e| !e.status.is_terminal()) {
            let clash = tables.executions.values().find(|other| {
                other.id != exec.id
                    && other.blueprint_id == exec.blueprint_id
                    && other.record_id == exec.record_id
                    && !other.status.is_terminal()
                    && !snapshot
                        .executions
                        .get(&other.id)
                        .is_some_and(|s| s.status.is_terminal())
            });
            if let Some(other) = clash {
                return Err(StorageError::ActiveExecutionExists {
                    blueprint_id: exec.blueprint_id,
                    record_id: exec.record_id,
                    execution_id: other.id,
                });
            }
        }

        let MemorySnapshot {
            guards,
            record_states,
            executions,
            approvals,
        } = snapshot;
        tables.record_states.extend(record_states);
        tables.executions.extend(executions);
        tables.approvals.extend(approvals);
        drop(tables);
        drop(guards);
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn lock_record(
        &self,
        snapshot: &mut MemorySnapshot,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<(), StorageError> {
        self.lock_row(snapshot, (blueprint_id, record_id)).await;
        Ok(())
    }

    async fn initialize_record_state(
        &self,
        snapshot: &mut MemorySnapshot,
        blueprint_id: i64,
        record_id: i64,
        state_id: i64,
        entered_at: OffsetDateTime,
    ) -> Result<RecordStateRecord, StorageError> {
        let key = (blueprint_id, record_id);
        self.lock_row(snapshot, key).await;
        if self.record_state_view(snapshot, key).await.is_some() {
            return Err(StorageError::AlreadyInitialized {
                blueprint_id,
                record_id,
            });
        }
        let record = RecordStateRecord {
            blueprint_id,
            record_id,
            current_state_id: state_id,
            state_entered_at: entered_at,
            version: 0,
        };
        snapshot.record_states.insert(key, record.clone());
        Ok(record)
    }

    async fn get_record_state_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<RecordStateRecord, StorageError> {
        let key = (blueprint_id, record_id);
        self.lock_row(snapshot, key).await;
        self.record_state_view(snapshot, key)
            .await
            .ok_or(StorageError::RecordStateNotFound {
                blueprint_id,
                record_id,
            })
    }

    async fn update_record_state(
        &self,
        snapshot: &mut MemorySnapshot,
        blueprint_id: i64,
        record_id: i64,
        expected_version: i64,
        new_state_id: i64,
        entered_at: OffsetDateTime,
    ) -> Result<i64, StorageError> {
        let key = (blueprint_id, record_id);
        self.lock_row(snapshot, key).await;
        let current = self.record_state_view(snapshot, key).await.ok_or(
            StorageError::RecordStateNotFound {
                blueprint_id,
                record_id,
            },
        )?;
        if current.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                blueprint_id,
                record_id,
                expected_version,
            });
        }
        let new_version = expected_version + 1;
        snapshot.record_states.insert(
            key,
            RecordStateRecord {
                current_state_id: new_state_id,
                state_entered_at: entered_at,
                version: new_version,
                ..current
            },
        );
        Ok(new_version)
    }

    async fn insert_execution(
        &self,
        snapshot: &mut MemorySnapshot,
        new: NewExecution,
    ) -> Result<ExecutionRecord, StorageError> {
        let key = (new.blueprint_id, new.record_id);
        self.lock_row(snapshot, key).await;
        if !new.status.is_terminal() {
            let active = self
                .executions_view(snapshot, key)
                .await
                .into_iter()
                .find(|e| !e.status.is_terminal());
            if let Some(active) = active {
                return Err(StorageError::ActiveExecutionExists {
                    blueprint_id: new.blueprint_id,
                    record_id: new.record_id,
                    execution_id: active.id,
                });
            }
        }
        let id = self.next_execution_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = ExecutionRecord {
            id,
            blueprint_id: new.blueprint_id,
            transition_id: new.transition_id,
            record_id: new.record_id,
            from_state_id: new.from_state_id,
            to_state_id: new.to_state_id,
            status: new.status,
            executed_by: new.executed_by,
            started_at: new.started_at,
            completed_at: None,
            record_data: new.record_data,
            requirements_data: None,
            error_message: None,
        };
        snapshot.executions.insert(id, record.clone());
        Ok(record)
    }

    async fn get_execution_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        execution_id: i64,
    ) -> Result<ExecutionRecord, StorageError> {
        let not_found = StorageError::ExecutionNotFound { execution_id };
        let Some(found) = self.execution_view(snapshot, execution_id).await else {
            return Err(not_found);
        };
        self.lock_row(snapshot, (found.blueprint_id, found.record_id))
            .await;
        self.execution_view(snapshot, execution_id)
            .await
            .ok_or(not_found)
    }

    async fn find_active_execution(
        &self,
        snapshot: &mut MemorySnapshot,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<Option<ExecutionRecord>, StorageError> {
        let key = (blueprint_id, record_id);
        self.lock_row(snapshot, key).await;
        Ok(self
            .executions_view(snapshot, key)
            .await
            .into_iter()
            .find(|e| !e.status.is_terminal()))
    }

    async fn update_execution(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ExecutionRecord,
    ) -> Result<(), StorageError> {
        self.lock_row(snapshot, (record.blueprint_id, record.record_id))
            .await;
        if self.execution_view(snapshot, record.id).await.is_none() {
            return Err(StorageError::ExecutionNotFound {
                execution_id: record.id,
            });
        }
        snapshot.executions.insert(record.id, record);
        Ok(())
    }

    async fn insert_approval_request(
        &self,
        snapshot: &mut MemorySnapshot,
        new: NewApprovalRequest,
    ) -> Result<ApprovalRequestRecord, StorageError> {
        self.lock_row(snapshot, (new.blueprint_id, new.record_id))
            .await;
        let id = self.next_approval_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = ApprovalRequestRecord {
            id,
            approval_id: new.approval_id,
            transition_id: new.transition_id,
            execution_id: new.execution_id,
            blueprint_id: new.blueprint_id,
            record_id: new.record_id,
            requested_by: new.requested_by,
            status: ApprovalStatus::Pending,
            approvers: new.approvers,
            responses: Vec::new(),
            created_at: new.created_at,
            expires_at: new.expires_at,
            resolved_at: None,
            reason: None,
            reminder_count: 0,
            last_reminder_at: None,
            escalated_to: None,
            escalated_at: None,
            delegations: new.delegations,
            reassignments: Vec::new(),
        };
        snapshot.approvals.insert(id, record.clone());
        Ok(record)
    }

    async fn get_approval_request_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        request_id: i64,
    ) -> Result<ApprovalRequestRecord, StorageError> {
        let not_found = StorageError::ApprovalRequestNotFound { request_id };
        let Some(found) = self.approval_view(snapshot, request_id).await else {
            return Err(not_found);
        };
        self.lock_row(snapshot, (found.blueprint_id, found.record_id))
            .await;
        self.approval_view(snapshot, request_id)
            .await
            .ok_or(not_found)
    }

    async fn find_pending_approval_for_execution(
        &self,
        snapshot: &mut MemorySnapshot,
        execution_id: i64,
    ) -> Result<Option<ApprovalRequestRecord>, StorageError> {
        let mut merged: BTreeMap<i64, ApprovalRequestRecord> = {
            let tables = self.tables.lock().await;
            tables
                .approvals
                .values()
                .filter(|a| a.execution_id == execution_id)
                .map(|a| (a.id, a.clone()))
                .collect()
        };
        for a in snapshot
            .approvals
            .values()
            .filter(|a| a.execution_id == execution_id)
        {
            merged.insert(a.id, a.clone());
        }
        let pending = merged
            .into_values()
            .find(|a| a.status == ApprovalStatus::Pending);
        if let Some(ref request) = pending {
            self.lock_row(snapshot, (request.blueprint_id, request.record_id))
                .await;
        }
        Ok(pending)
    }

    async fn update_approval_request(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ApprovalRequestRecord,
    ) -> Result<(), StorageError> {
        self.lock_row(snapshot, (record.blueprint_id, record.record_id))
            .await;
        if self.approval_view(snapshot, record.id).await.is_none() {
            return Err(StorageError::ApprovalRequestNotFound {
                request_id: record.id,
            });
        }
        snapshot.approvals.insert(record.id, record);
        Ok(())
    }

    async fn record_escalation_firing(
        &self,
        firing: EscalationFiringRecord,
    ) -> Result<bool, StorageError> {
        let key = (
            firing.blueprint_id,
            firing.escalation_id,
            firing.record_id,
            firing.state_entered_at.unix_timestamp_nanos(),
        );
        let mut tables = self.tables.lock().await;
        if !tables.firing_keys.insert(key) {
            return Ok(false);
        }
        tables.firings.push(firing);
        Ok(true)
    }

    async fn get_record_state(
        &self,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<RecordStateRecord, StorageError> {
        self.tables
            .lock()
            .await
            .record_states
            .get(&(blueprint_id, record_id))
            .cloned()
            .ok_or(StorageError::RecordStateNotFound {
                blueprint_id,
                record_id,
            })
    }

    async fn list_record_states(
        &self,
        blueprint_id: Option<i64>,
    ) -> Result<Vec<RecordStateRecord>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .record_states
            .values()
            .filter(|r| blueprint_id.map_or(true, |bp| r.blueprint_id == bp))
            .cloned()
            .collect())
    }

    async fn get_execution(&self, execution_id: i64) -> Result<ExecutionRecord, StorageError> {
        self.tables
            .lock()
            .await
            .executions
            .get(&execution_id)
            .cloned()
            .ok_or(StorageError::ExecutionNotFound { execution_id })
    }

    async fn list_executions(
        &self,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .executions
            .values()
            .filter(|e| e.blueprint_id == blueprint_id && e.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn get_approval_request(
        &self,
        request_id: i64,
    ) -> Result<ApprovalRequestRecord, StorageError> {
        self.tables
            .lock()
            .await
            .approvals
            .get(&request_id)
            .cloned()
            .ok_or(StorageError::ApprovalRequestNotFound { request_id })
    }

    async fn list_approval_requests(
        &self,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ApprovalRequestRecord>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .approvals
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect())
    }

    async fn list_escalation_firings(
        &self,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<Vec<EscalationFiringRecord>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .firings
            .iter()
            .filter(|f| f.blueprint_id == blueprint_id && f.record_id == record_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;

    #[tokio::test]
    async fn in_memory_conformance() {
        let report = run_conformance_suite(|| async { InMemoryStorage::new() }).await;
        assert!(report.failed == 0, "{report}");
        assert!(report.total > 0);
    }

    #[tokio::test]
    async fn dropped_snapshot_releases_lock() {
        let storage = InMemoryStorage::new();
        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage.lock_record(&mut snap, 1, 1).await.unwrap();
        }
        let mut snap = storage.begin_snapshot().await.unwrap();
        let locked = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            storage.lock_record(&mut snap, 1, 1),
        )
        .await;
        assert!(locked.is_ok(), "row lock was not released on drop");
    }

    #[tokio::test]
    async fn row_lock_entries_are_released() {
        let storage = InMemoryStorage::new();
        for record_id in 0..50 {
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage.lock_record(&mut snap, 1, record_id).await.unwrap();
            storage.commit_snapshot(snap).await.unwrap();
        }
        assert_eq!(storage.tracked_row_locks(), 0);

        let storage = Arc::new(storage);
        let mut first = storage.begin_snapshot().await.unwrap();
        storage.lock_record(&mut first, 1, 1).await.unwrap();
        let waiter = {
            let storage = storage.clone();
            tokio::spawn(async move {
                let mut snap = storage.begin_snapshot().await.unwrap();
                storage.lock_record(&mut snap, 1, 1).await.unwrap();
                storage.abort_snapshot(snap).await.unwrap();
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        // Still held by `first` and awaited by the waiter.
        assert_eq!(storage.tracked_row_locks(), 1);
        storage.abort_snapshot(first).await.unwrap();
        waiter.await.unwrap();
        assert_eq!(storage.tracked_row_locks(), 0);
    }
}
