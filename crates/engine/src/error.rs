use blueprint_interchange::ConfigError;
use blueprint_storage::{ExecutionStatus, StorageError};

/// Failure reported by an external collaborator (directory, notifier,
/// action handler, record-data provider).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        CollaboratorError(message.into())
    }
}

/// Errors returned by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Blueprint, state, transition, execution or approval request absent.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    /// The transition is not available for the record.
    #[error("transition {transition_id} is not available: {}", .reasons.join(", "))]
    Guard {
        transition_id: i64,
        reasons: Vec<String>,
    },

    /// Concurrent start, duplicate active execution, or a pre-existing SLA.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing submission items or malformed configuration input.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        /// Ids of the blocking requirements that were not satisfied.
        missing: Vec<i64>,
    },

    /// Operation attempted from the wrong execution status.
    #[error("cannot {operation} execution {execution_id} in status {status}")]
    State {
        execution_id: i64,
        status: ExecutionStatus,
        operation: &'static str,
    },

    /// Approval request already resolved, unauthorized approver, or no
    /// approvers resolvable.
    #[error("approval error: {0}")]
    Approval(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("external collaborator failed: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
            missing: Vec::new(),
        }
    }

    /// Conflicts may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    /// Errors the caller can correct (4xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound { .. }
                | EngineError::Guard { .. }
                | EngineError::Validation { .. }
                | EngineError::State { .. }
                | EngineError::Approval(_)
                | EngineError::Config(_)
        )
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ConcurrentConflict { .. }
            | StorageError::ActiveExecutionExists { .. }
            | StorageError::AlreadyInitialized { .. } => EngineError::Conflict(e.to_string()),
            StorageError::ExecutionNotFound { execution_id } => EngineError::NotFound {
                kind: "execution",
                id: execution_id,
            },
            StorageError::ApprovalRequestNotFound { request_id } => EngineError::NotFound {
                kind: "approval request",
                id: request_id,
            },
            StorageError::RecordStateNotFound { record_id, .. } => EngineError::NotFound {
                kind: "record state",
                id: record_id,
            },
            other => EngineError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_conflicts_become_retryable() {
        let err: EngineError = StorageError::ActiveExecutionExists {
            blueprint_id: 1,
            record_id: 2,
            execution_id: 3,
        }
        .into();
        assert!(err.is_retryable());
        assert!(!err.is_client_error());
    }

    #[test]
    fn backend_errors_are_opaque() {
        let err: EngineError = StorageError::Backend("connection reset".into()).into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(!err.is_retryable());
        assert!(!err.is_client_error());
    }

    #[test]
    fn guard_message_lists_reasons() {
        let err = EngineError::Guard {
            transition_id: 4,
            reasons: vec!["amount greater_than 100".into(), "stage equals open".into()],
        };
        assert_eq!(
            err.to_string(),
            "transition 4 is not available: amount greater_than 100, stage equals open"
        );
        assert!(err.is_client_error());
    }
}
