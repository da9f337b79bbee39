//! Storage layer for blueprint workflow state.
//!
//! Defines the [`BlueprintStorage`] trait, the persisted record types, an
//! in-memory reference backend and a backend-agnostic conformance suite.

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{InMemoryStorage, MemorySnapshot};
pub use record::{
    ApprovalRequestRecord, ApprovalResponse, ApprovalStatus, Decision, Delegation,
    EscalationFiringRecord, ExecutionRecord, ExecutionStatus, NewApprovalRequest, NewExecution,
    Reassignment, RecordStateRecord,
};
pub use traits::BlueprintStorage;
