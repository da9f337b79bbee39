use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{
    ApprovalRequestRecord, ApprovalStatus, EscalationFiringRecord, ExecutionRecord,
    NewApprovalRequest, NewExecution, RecordStateRecord,
};

/// The storage trait for blueprint workflow backends.
///
/// A `BlueprintStorage` implementation provides transactional storage for
/// record states, transition executions, approval requests and escalation
/// firings. Blueprint configuration itself is not stored here.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()` starts a transaction and returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` commits and consumes the transaction,
///    or `abort_snapshot(snapshot)` rolls it back
///
/// If a `Snapshot` is dropped without committing, its writes MUST be
/// discarded and its row locks released.
///
/// ## Row Locks
///
/// Every `*_for_update` read and every write inside a snapshot locks the
/// owning `(blueprint_id, record_id)` row until the snapshot ends
/// (`SELECT ... FOR UPDATE`). Distinct records never contend.
///
/// ## OCC Conflict Detection
///
/// `update_record_state` performs an optimistic concurrency check:
/// `UPDATE WHERE version = expected_version`. If zero rows are affected,
/// the method returns `Err(StorageError::ConcurrentConflict { .. })`.
///
/// ## Active Execution Uniqueness
///
/// At most one execution with a non-terminal status may exist per
/// `(blueprint_id, record_id)`. Backends enforce this like a partial unique
/// index, both on insert and again on commit.
///
/// ## Audit Trail
///
/// Executions and approval requests are never deleted.
#[async_trait]
pub trait BlueprintStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Record state (within snapshot) ────────────────────────────────────────

    /// Lock the `(blueprint_id, record_id)` row for the life of the snapshot,
    /// whether or not a record state exists yet.
    async fn lock_record(
        &self,
        snapshot: &mut Self::Snapshot,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<(), StorageError>;

    /// Create a record state at version 0.
    ///
    /// Returns `Err(StorageError::AlreadyInitialized)` if one already exists.
    async fn initialize_record_state(
        &self,
        snapshot: &mut Self::Snapshot,
        blueprint_id: i64,
        record_id: i64,
        state_id: i64,
        entered_at: OffsetDateTime,
    ) -> Result<RecordStateRecord, StorageError>;

    /// Read a record state, locking the row for update.
    ///
    /// Returns `Err(StorageError::RecordStateNotFound)` if it does not exist.
    async fn get_record_state_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<RecordStateRecord, StorageError>;

    /// Move a record to a new state (OCC on `expected_version`).
    ///
    /// Returns the new version number on success.
    async fn update_record_state(
        &self,
        snapshot: &mut Self::Snapshot,
        blueprint_id: i64,
        record_id: i64,
        expected_version: i64,
        new_state_id: i64,
        entered_at: OffsetDateTime,
    ) -> Result<i64, StorageError>;

    // ── Executions (within snapshot) ──────────────────────────────────────────

    /// Insert an execution and assign its id.
    ///
    /// Returns `Err(StorageError::ActiveExecutionExists)` if `new.status` is
    /// non-terminal and the record already has a non-terminal execution.
    async fn insert_execution(
        &self,
        snapshot: &mut Self::Snapshot,
        new: NewExecution,
    ) -> Result<ExecutionRecord, StorageError>;

    /// Read an execution, locking its record row.
    async fn get_execution_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        execution_id: i64,
    ) -> Result<ExecutionRecord, StorageError>;

    /// The record's non-terminal execution, if any, as seen by this snapshot.
    async fn find_active_execution(
        &self,
        snapshot: &mut Self::Snapshot,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<Option<ExecutionRecord>, StorageError>;

    /// Overwrite an existing execution row.
    async fn update_execution(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ExecutionRecord,
    ) -> Result<(), StorageError>;

    // ── Approval requests (within snapshot) ───────────────────────────────────

    async fn insert_approval_request(
        &self,
        snapshot: &mut Self::Snapshot,
        new: NewApprovalRequest,
    ) -> Result<ApprovalRequestRecord, StorageError>;

    /// Read an approval request, locking its record row.
    async fn get_approval_request_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        request_id: i64,
    ) -> Result<ApprovalRequestRecord, StorageError>;

    /// The pending approval request of an execution, if any.
    async fn find_pending_approval_for_execution(
        &self,
        snapshot: &mut Self::Snapshot,
        execution_id: i64,
    ) -> Result<Option<ApprovalRequestRecord>, StorageError>;

    async fn update_approval_request(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ApprovalRequestRecord,
    ) -> Result<(), StorageError>;

    // ── Escalation firings (atomic, outside snapshot) ─────────────────────────

    /// Insert a firing unless one already exists for
    /// `(blueprint_id, escalation_id, record_id, state_entered_at)`.
    /// Escalation ids are only unique within a blueprint.
    ///
    /// Returns `true` if this call inserted it.
    async fn record_escalation_firing(
        &self,
        firing: EscalationFiringRecord,
    ) -> Result<bool, StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    async fn get_record_state(
        &self,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<RecordStateRecord, StorageError>;

    /// All record states, optionally limited to one blueprint, ordered by
    /// `(blueprint_id, record_id)`.
    async fn list_record_states(
        &self,
        blueprint_id: Option<i64>,
    ) -> Result<Vec<RecordStateRecord>, StorageError>;

    async fn get_execution(&self, execution_id: i64) -> Result<ExecutionRecord, StorageError>;

    /// Every execution of a record, oldest first.
    async fn list_executions(
        &self,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<Vec<ExecutionRecord>, StorageError>;

    async fn get_approval_request(
        &self,
        request_id: i64,
    ) -> Result<ApprovalRequestRecord, StorageError>;

    /// Approval requests, optionally filtered by status, ordered by id.
    async fn list_approval_requests(
        &self,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ApprovalRequestRecord>, StorageError>;

    async fn list_escalation_firings(
        &self,
        blueprint_id: i64,
        record_id: i64,
    ) -> Result<Vec<EscalationFiringRecord>, StorageError>;
}
