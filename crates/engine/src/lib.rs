//! Blueprint workflow engine.
//!
//! A blueprint is a state graph bound to one field of a record type. The
//! engine moves records along its transitions through guard conditions,
//! requirement gates and approvals, keeps an SLA clock per state, and fires
//! escalations from a periodic scheduler.

pub mod action;
pub mod approval;
pub mod clock;
pub mod condition;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod notify;
pub mod record_data;
pub mod requirement;
pub mod scheduler;
pub mod sla;
pub mod value;

pub use action::{ActionContext, ActionHandler, ActionRegistry, ActionTrigger};
pub use approval::{ApproverResolver, ResolverRegistry, AUTO_REJECT_REASON};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use directory::{Directory, StaticDirectory};
pub use engine::{
    available_transitions, seed_state, BlueprintEngine, EngineBuilder, ExecutionOutcome,
    TransitionSummary, APPROVAL_REJECTED_REASON,
};
pub use error::{CollaboratorError, EngineError};
pub use notify::{LogNotifier, Notification, NotificationKind, Notifier};
pub use record_data::{RecordDataProvider, StaticRecordData};
pub use requirement::Submission;
pub use scheduler::{EscalationScheduler, TickSummary};
pub use sla::{BusinessCalendar, SlaStatus};
