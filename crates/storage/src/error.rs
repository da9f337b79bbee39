/// All errors that can be returned by a BlueprintStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another transaction moved
    /// the record concurrently and the expected version was not found.
    #[error(
        "concurrent conflict on record {blueprint_id}/{record_id}: expected version {expected_version}"
    )]
    ConcurrentConflict {
        blueprint_id: i64,
        record_id: i64,
        expected_version: i64,
    },

    /// No record state exists for the (blueprint_id, record_id) pair.
    #[error("record state not found: {blueprint_id}/{record_id}")]
    RecordStateNotFound { blueprint_id: i64, record_id: i64 },

    /// A record state for this (blueprint_id, record_id) already exists.
    #[error("record state already initialized: {blueprint_id}/{record_id}")]
    AlreadyInitialized { blueprint_id: i64, record_id: i64 },

    /// Transition execution not found.
    #[error("transition execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: i64 },

    /// Approval request not found.
    #[error("approval request not found: {request_id}")]
    ApprovalRequestNotFound { request_id: i64 },

    /// The record already has a non-terminal execution.
    #[error(
        "record {blueprint_id}/{record_id} already has an active execution {execution_id}"
    )]
    ActiveExecutionExists {
        blueprint_id: i64,
        record_id: i64,
        execution_id: i64,
    },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
