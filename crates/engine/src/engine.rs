//! The blueprint engine: configuration registry plus the transition
//! execution state machine.
//!
//! ```text
//! STARTED -> PENDING_REQUIREMENTS -> PENDING_APPROVAL -> PENDING -> COMPLETED
//!    \______________\____________________\_______________\-> CANCELLED
//! ```
//!
//! Every operation that reads and then writes a record's state or
//! executions runs inside one storage snapshot holding that record's row
//! lock. Notifications and actions are spawned only after the snapshot
//! commits.

use std::collections::BTreeMap;
use std::sync::Arc;

use blueprint_interchange::{
    from_config, validate_blueprint, validate_escalation, validate_sla, Approval, Blueprint,
    BlueprintId, RecordId, Requirement, Sla, SlaEscalation, SlaId, State, Transition,
    TransitionId, UserId,
};
use blueprint_storage::{
    ApprovalRequestRecord, ApprovalStatus, BlueprintStorage, Decision, Delegation,
    ExecutionRecord, ExecutionStatus, NewApprovalRequest, NewExecution, RecordStateRecord,
    StorageError,
};
use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::action::{ActionContext, ActionHandler, ActionRegistry, ActionTrigger};
use crate::approval::{self, ApproverResolver, ResolverRegistry, AUTO_REJECT_REASON};
use crate::clock::{Clock, SystemClock};
use crate::condition;
use crate::config::EngineConfig;
use crate::directory::{Directory, StaticDirectory};
use crate::error::EngineError;
use crate::notify::{LogNotifier, Notification, NotificationKind, Notifier};
use crate::requirement::{self, Submission};
use crate::sla::{self, BusinessCalendar, SlaStatus};

/// Reason stored on executions cancelled by an approval rejection.
pub const APPROVAL_REJECTED_REASON: &str = "approval rejected";

// ──────────────────────────────────────────────
// Results
// ──────────────────────────────────────────────

/// A transition offered to a user for a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionSummary {
    pub id: TransitionId,
    pub name: String,
    /// Button label, falling back to the name.
    pub label: String,
    pub description: Option<String>,
    pub from_state_id: Option<i64>,
    pub to_state_id: i64,
    pub to_state_name: String,
    pub requires_approval: bool,
    /// Every requirement, advisory ones included, in display order.
    pub requirements: Vec<Requirement>,
}

impl TransitionSummary {
    pub fn new(blueprint: &Blueprint, transition: &Transition) -> Self {
        TransitionSummary {
            id: transition.id,
            name: transition.name.clone(),
            label: transition.label().to_string(),
            description: transition.description.clone(),
            from_state_id: transition.from_state_id,
            to_state_id: transition.to_state_id,
            to_state_name: blueprint
                .state_name(transition.to_state_id)
                .unwrap_or_default()
                .to_string(),
            requires_approval: transition.requires_approval(),
            requirements: requirement::display_requirements(transition)
                .into_iter()
                .cloned()
                .collect(),
        }
    }
}

/// An execution after `start_transition` or `submit_requirements`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub execution: ExecutionRecord,
    /// Blocking requirements still to be submitted.
    pub pending_requirements: Vec<Requirement>,
    /// The approval request opened by this step, if any.
    pub approval_request: Option<ApprovalRequestRecord>,
}

/// Active transitions leaving `current_state_id` (or entry transitions)
/// whose guard passes for `record_data`, in display order.
pub fn available_transitions<'a>(
    blueprint: &'a Blueprint,
    current_state_id: i64,
    record_data: &Value,
) -> Vec<&'a Transition> {
    if !blueprint.is_active {
        return Vec::new();
    }
    let mut available: Vec<&Transition> = blueprint
        .transitions
        .iter()
        .filter(|t| t.is_active)
        .filter(|t| t.from_state_id.map_or(true, |from| from == current_state_id))
        .filter(|t| condition::evaluate(&t.conditions, record_data))
        .collect();
    available.sort_by_key(|t| (t.display_order, t.id));
    available
}

/// The state a record without a record state starts in: the state mirroring
/// the bound field's value, else the initial state, else the first state.
pub fn seed_state<'a>(blueprint: &'a Blueprint, record_data: &Value) -> Option<&'a State> {
    blueprint
        .field_name
        .as_deref()
        .and_then(|field| record_data.get(field))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .and_then(|value| blueprint.state_by_field_value(&value))
        .or_else(|| blueprint.initial_state())
        .or_else(|| blueprint.states.first())
}

// ──────────────────────────────────────────────
// Builder
// ──────────────────────────────────────────────

pub struct EngineBuilder<S: BlueprintStorage> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    notifier: Arc<dyn Notifier>,
    directory: Arc<dyn Directory>,
    actions: Vec<(String, Arc<dyn ActionHandler>)>,
    resolvers: Vec<(String, Arc<dyn ApproverResolver>)>,
}

impl<S: BlueprintStorage> EngineBuilder<S> {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn calendar(mut self, calendar: BusinessCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    /// Apply the calendar settings of an [`EngineConfig`].
    pub fn config(mut self, config: &EngineConfig) -> Result<Self, EngineError> {
        self.calendar = config.calendar()?;
        Ok(self)
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = directory;
        self
    }

    /// Register an action handler, replacing a built-in of the same type.
    pub fn action(mut self, action_type: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        self.actions.push((action_type.into(), handler));
        self
    }

    /// Register an approver resolver, replacing a built-in of the same type.
    pub fn resolver(
        mut self,
        approval_type: impl Into<String>,
        resolver: Arc<dyn ApproverResolver>,
    ) -> Self {
        self.resolvers.push((approval_type.into(), resolver));
        self
    }

    pub fn build(self) -> BlueprintEngine<S> {
        let mut actions = ActionRegistry::with_builtin(self.notifier.clone());
        for (action_type, handler) in self.actions {
            actions.register(action_type, handler);
        }
        let mut resolvers = ResolverRegistry::with_builtin(self.directory.clone());
        for (approval_type, resolver) in self.resolvers {
            resolvers.register(approval_type, resolver);
        }
        BlueprintEngine {
            storage: self.storage,
            blueprints: RwLock::new(BTreeMap::new()),
            actions,
            resolvers,
            directory: self.directory,
            notifier: self.notifier,
            clock: self.clock,
            calendar: self.calendar,
        }
    }
}

// ──────────────────────────────────────────────
// BlueprintEngine
// ──────────────────────────────────────────────

pub struct BlueprintEngine<S: BlueprintStorage> {
    storage: Arc<S>,
    blueprints: RwLock<BTreeMap<BlueprintId, Arc<Blueprint>>>,
    actions: ActionRegistry,
    resolvers: ResolverRegistry,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
}

impl<S: BlueprintStorage> BlueprintEngine<S> {
    /// Defaults: system clock, 09:00-17:00 UTC calendar, log notifier, empty
    /// directory.
    pub fn builder(storage: Arc<S>) -> EngineBuilder<S> {
        EngineBuilder {
            storage,
            clock: Arc::new(SystemClock),
            calendar: BusinessCalendar::default(),
            notifier: Arc::new(LogNotifier),
            directory: Arc::new(StaticDirectory::new()),
            actions: Vec::new(),
            resolvers: Vec::new(),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn calendar(&self) -> &BusinessCalendar {
        &self.calendar
    }

    pub(crate) fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    // ── Configuration ────────────────────────────────────────────────

    /// Add or replace a blueprint. Transition ids must be unique across
    /// registered blueprints, and every action type must be registered.
    pub async fn register_blueprint(&self, blueprint: Blueprint) -> Result<(), EngineError> {
        validate_blueprint(&blueprint)?;
        self.check_action_types(&blueprint)?;

        let mut blueprints = self.blueprints.write().await;
        for other in blueprints.values().filter(|b| b.id != blueprint.id) {
            if let Some(t) = blueprint
                .transitions
                .iter()
                .find(|t| other.transition(t.id).is_some())
            {
                return Err(EngineError::Conflict(format!(
                    "transition {} already belongs to blueprint {}",
                    t.id, other.id
                )));
            }
        }
        tracing::info!(
            blueprint_id = blueprint.id,
            states = blueprint.states.len(),
            transitions = blueprint.transitions.len(),
            slas = blueprint.slas.len(),
            "blueprint registered"
        );
        blueprints.insert(blueprint.id, Arc::new(blueprint));
        Ok(())
    }

    /// Decode a stored JSON configuration and register it.
    pub async fn register_blueprint_config(&self, config: &Value) -> Result<BlueprintId, EngineError> {
        let blueprint = from_config(config)?;
        let id = blueprint.id;
        self.register_blueprint(blueprint).await?;
        Ok(id)
    }

    pub async fn blueprint(&self, blueprint_id: BlueprintId) -> Result<Arc<Blueprint>, EngineError> {
        self.blueprints
            .read()
            .await
            .get(&blueprint_id)
            .cloned()
            .ok_or(EngineError::NotFound {
                kind: "blueprint",
                id: blueprint_id,
            })
    }

    pub async fn blueprints(&self) -> Vec<Arc<Blueprint>> {
        self.blueprints.read().await.values().cloned().collect()
    }

    pub async fn set_blueprint_active(
        &self,
        blueprint_id: BlueprintId,
        active: bool,
    ) -> Result<(), EngineError> {
        self.edit_blueprint(blueprint_id, |bp| {
            bp.is_active = active;
            Ok(())
        })
        .await?;
        tracing::info!(blueprint_id, active, "blueprint activation changed");
        Ok(())
    }

    /// Attach an SLA to a state that has none.
    pub async fn add_sla(&self, blueprint_id: BlueprintId, sla: Sla) -> Result<(), EngineError> {
        validate_sla(&sla).map_err(|e| EngineError::validation(e.to_string()))?;
        for escalation in &sla.escalations {
            self.check_action_type(&escalation.action_type, "escalation", escalation.id)?;
        }
        self.edit_blueprint(blueprint_id, move |bp| {
            if bp.state(sla.state_id).is_none() {
                return Err(EngineError::NotFound {
                    kind: "state",
                    id: sla.state_id,
                });
            }
            if let Some(existing) = bp.sla_for_state(sla.state_id) {
                return Err(EngineError::Conflict(format!(
                    "state {} already has SLA {}",
                    sla.state_id, existing.id
                )));
            }
            if bp.sla(sla.id).is_some() {
                return Err(EngineError::Conflict(format!("SLA {} already exists", sla.id)));
            }
            bp.slas.push(sla);
            Ok(())
        })
        .await
    }

    /// Append an escalation to an existing SLA.
    pub async fn add_escalation(
        &self,
        blueprint_id: BlueprintId,
        sla_id: SlaId,
        escalation: SlaEscalation,
    ) -> Result<(), EngineError> {
        validate_escalation(&escalation).map_err(|e| EngineError::validation(e.to_string()))?;
        self.check_action_type(&escalation.action_type, "escalation", escalation.id)?;
        self.edit_blueprint(blueprint_id, move |bp| {
            let sla = bp
                .slas
                .iter_mut()
                .find(|s| s.id == sla_id)
                .ok_or(EngineError::NotFound {
                    kind: "SLA",
                    id: sla_id,
                })?;
            if sla.escalations.iter().any(|e| e.id == escalation.id) {
                return Err(EngineError::Conflict(format!(
                    "escalation {} already exists on SLA {}",
                    escalation.id, sla_id
                )));
            }
            sla.escalations.push(escalation);
            Ok(())
        })
        .await
    }

    async fn edit_blueprint(
        &self,
        blueprint_id: BlueprintId,
        edit: impl FnOnce(&mut Blueprint) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let mut blueprints = self.blueprints.write().await;
        let current = blueprints.get(&blueprint_id).ok_or(EngineError::NotFound {
            kind: "blueprint",
            id: blueprint_id,
        })?;
        let mut updated = Blueprint::clone(current);
        edit(&mut updated)?;
        blueprints.insert(blueprint_id, Arc::new(updated));
        Ok(())
    }

    fn check_action_types(&self, blueprint: &Blueprint) -> Result<(), EngineError> {
        for transition in &blueprint.transitions {
            for action in transition.actions.iter().filter(|a| a.is_active) {
                self.check_action_type(&action.action_type, "action", action.id)?;
            }
        }
        for sla in &blueprint.slas {
            for escalation in &sla.escalations {
                self.check_action_type(&escalation.action_type, "escalation", escalation.id)?;
            }
        }
        Ok(())
    }

    fn check_action_type(&self, action_type: &str, owner: &str, id: i64) -> Result<(), EngineError> {
        if self.actions.contains(action_type) {
            Ok(())
        } else {
            Err(EngineError::validation(format!(
                "{} {}: action type '{}' is not registered",
                owner, id, action_type
            )))
        }
    }

    async fn blueprint_for_transition(
        &self,
        transition_id: TransitionId,
    ) -> Result<Arc<Blueprint>, EngineError> {
        self.blueprints
            .read()
            .await
            .values()
            .find(|b| b.transition(transition_id).is_some())
            .cloned()
            .ok_or(EngineError::NotFound {
                kind: "transition",
                id: transition_id,
            })
    }

    // ── Snapshot plumbing ────────────────────────────────────────────

    async fn finish<T>(
        &self,
        snapshot: S::Snapshot,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        match result {
            Ok(value) => {
                self.storage.commit_snapshot(snapshot).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = self.storage.abort_snapshot(snapshot).await {
                    tracing::warn!(error = %abort, "snapshot abort failed");
                }
                Err(e)
            }
        }
    }

    /// The record's state, creating it from the seed state if absent.
    async fn record_state_in(
        &self,
        snapshot: &mut S::Snapshot,
        blueprint: &Blueprint,
        record_id: RecordId,
        record_data: &Value,
    ) -> Result<RecordStateRecord, EngineError> {
        match self
            .storage
            .get_record_state_for_update(snapshot, blueprint.id, record_id)
            .await
        {
            Ok(state) => Ok(state),
            Err(StorageError::RecordStateNotFound { .. }) => {
                let seed = seed_state(blueprint, record_data).ok_or_else(|| {
                    EngineError::validation(format!("blueprint {} has no states", blueprint.id))
                })?;
                let state = self
                    .storage
                    .initialize_record_state(
                        snapshot,
                        blueprint.id,
                        record_id,
                        seed.id,
                        self.clock.now(),
                    )
                    .await?;
                tracing::info!(
                    blueprint_id = blueprint.id,
                    record_id,
                    state_id = seed.id,
                    "record state initialized"
                );
                Ok(state)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Availability ─────────────────────────────────────────────────

    /// Transitions the record can take from its current state. Initializes
    /// the record state on first contact.
    pub async fn list_available_transitions(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
        record_data: &Value,
    ) -> Result<Vec<TransitionSummary>, EngineError> {
        let blueprint = self.blueprint(blueprint_id).await?;
        if !blueprint.is_active {
            return Ok(Vec::new());
        }
        let state = match self.storage.get_record_state(blueprint_id, record_id).await {
            Ok(state) => state,
            Err(StorageError::RecordStateNotFound { .. }) => {
                let mut snapshot = self.storage.begin_snapshot().await?;
                let result = self
                    .record_state_in(&mut snapshot, &blueprint, record_id, record_data)
                    .await;
                self.finish(snapshot, result).await?
            }
            Err(e) => return Err(e.into()),
        };
        Ok(
            available_transitions(&blueprint, state.current_state_id, record_data)
                .into_iter()
                .map(|t| TransitionSummary::new(&blueprint, t))
                .collect(),
        )
    }

    // ── Execution lifecycle ──────────────────────────────────────────

    /// Begin traversing `transition_id` for a record. At most one
    /// non-terminal execution may exist per record.
    pub async fn start_transition(
        &self,
        record_id: RecordId,
        transition_id: TransitionId,
        user_id: UserId,
        record_data: Value,
    ) -> Result<ExecutionOutcome, EngineError> {
        let blueprint = self.blueprint_for_transition(transition_id).await?;

        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .start_in(&mut snapshot, &blueprint, transition_id, record_id, user_id, record_data)
            .await;
        let (outcome, transition) = self.finish(snapshot, result).await?;

        tracing::info!(
            execution_id = outcome.execution.id,
            blueprint_id = blueprint.id,
            record_id,
            transition_id,
            status = %outcome.execution.status,
            "transition started"
        );
        if let Some(request) = &outcome.approval_request {
            self.announce_approval_request(transition, request);
        }
        Ok(outcome)
    }

    /// An open execution on the record is reported before an inactive
    /// blueprint or transition.
    async fn start_in<'b>(
        &self,
        snapshot: &mut S::Snapshot,
        blueprint: &'b Blueprint,
        transition_id: TransitionId,
        record_id: RecordId,
        user_id: UserId,
        record_data: Value,
    ) -> Result<(ExecutionOutcome, &'b Transition), EngineError> {
        self.storage
            .lock_record(snapshot, blueprint.id, record_id)
            .await?;
        if let Some(active) = self
            .storage
            .find_active_execution(snapshot, blueprint.id, record_id)
            .await?
        {
            return Err(EngineError::Conflict(format!(
                "record {} already has execution {} in status {}",
                record_id, active.id, active.status
            )));
        }
        if !blueprint.is_active {
            return Err(EngineError::NotFound {
                kind: "blueprint",
                id: blueprint.id,
            });
        }
        let transition = blueprint
            .transition(transition_id)
            .filter(|t| t.is_active)
            .ok_or(EngineError::NotFound {
                kind: "transition",
                id: transition_id,
            })?;

        let state = self
            .record_state_in(snapshot, blueprint, record_id, &record_data)
            .await?;
        if let Some(from) = transition.from_state_id {
            if from != state.current_state_id {
                return Err(EngineError::Guard {
                    transition_id: transition.id,
                    reasons: vec![format!(
                        "record is in state '{}', transition starts from '{}'",
                        blueprint.state_name(state.current_state_id).unwrap_or("?"),
                        blueprint.state_name(from).unwrap_or("?")
                    )],
                });
            }
        }
        let failed = condition::failed_conditions(&transition.conditions, &record_data);
        if !failed.is_empty() {
            return Err(EngineError::Guard {
                transition_id: transition.id,
                reasons: failed,
            });
        }

        let now = self.clock.now();
        let mut execution = self
            .storage
            .insert_execution(
                snapshot,
                NewExecution {
                    blueprint_id: blueprint.id,
                    transition_id: transition.id,
                    record_id,
                    from_state_id: state.current_state_id,
                    to_state_id: transition.to_state_id,
                    status: ExecutionStatus::Started,
                    executed_by: user_id,
                    started_at: now,
                    record_data,
                },
            )
            .await?;

        let pending: Vec<Requirement> = requirement::pending_requirements(transition)
            .into_iter()
            .cloned()
            .collect();
        let mut approval_request = None;
        if !pending.is_empty() {
            execution.status = ExecutionStatus::PendingRequirements;
        } else if transition.approval.is_some() {
            approval_request = Some(self.open_approval(snapshot, transition, &execution).await?);
            execution.status = ExecutionStatus::PendingApproval;
        } else {
            execution.status = ExecutionStatus::Pending;
        }
        self.storage
            .update_execution(snapshot, execution.clone())
            .await?;

        Ok((
            ExecutionOutcome {
                execution,
                pending_requirements: pending,
                approval_request,
            },
            transition,
        ))
    }

    /// Accept the requirement submission of a `PENDING_REQUIREMENTS`
    /// execution. On missing items the execution is left untouched.
    pub async fn submit_requirements(
        &self,
        execution_id: i64,
        submission: Submission,
    ) -> Result<ExecutionOutcome, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .submit_in(&mut snapshot, execution_id, submission)
            .await;
        let (outcome, transition) = self.finish(snapshot, result).await?;

        tracing::info!(
            execution_id,
            record_id = outcome.execution.record_id,
            status = %outcome.execution.status,
            "requirements accepted"
        );
        if let Some(request) = &outcome.approval_request {
            self.announce_approval_request(&transition, request);
        }
        Ok(outcome)
    }

    async fn submit_in(
        &self,
        snapshot: &mut S::Snapshot,
        execution_id: i64,
        submission: Submission,
    ) -> Result<(ExecutionOutcome, Transition), EngineError> {
        let mut execution = self
            .storage
            .get_execution_for_update(snapshot, execution_id)
            .await?;
        if execution.status != ExecutionStatus::PendingRequirements {
            return Err(EngineError::State {
                execution_id,
                status: execution.status,
                operation: "submit requirements for",
            });
        }
        let blueprint = self.blueprint(execution.blueprint_id).await?;
        let transition = blueprint
            .transition(execution.transition_id)
            .ok_or(EngineError::NotFound {
                kind: "transition",
                id: execution.transition_id,
            })?;

        let check = requirement::validate_submission(&transition.requirements, &submission);
        if !check.is_satisfied() {
            return Err(EngineError::Validation {
                message: format!("missing required items: {}", check.missing_labels().join(", ")),
                missing: check.missing_ids(),
            });
        }

        execution.requirements_data = Some(submission.to_json());
        let mut approval_request = None;
        if transition.approval.is_some() {
            approval_request = Some(self.open_approval(snapshot, transition, &execution).await?);
            execution.status = ExecutionStatus::PendingApproval;
        } else {
            execution.status = ExecutionStatus::Pending;
        }
        self.storage
            .update_execution(snapshot, execution.clone())
            .await?;

        Ok((
            ExecutionOutcome {
                execution,
                pending_requirements: Vec::new(),
                approval_request,
            },
            transition.clone(),
        ))
    }

    /// Move the record to the transition's target state. Only legal from
    /// `PENDING`. Actions are dispatched after the commit.
    pub async fn complete_transition(&self, execution_id: i64) -> Result<ExecutionRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.complete_in(&mut snapshot, execution_id).await;
        let (execution, blueprint) = self.finish(snapshot, result).await?;

        tracing::info!(
            execution_id,
            blueprint_id = execution.blueprint_id,
            record_id = execution.record_id,
            from_state_id = execution.from_state_id,
            to_state_id = execution.to_state_id,
            "transition completed"
        );
        self.dispatch_transition_actions(&blueprint, &execution);
        Ok(execution)
    }

    async fn complete_in(
        &self,
        snapshot: &mut S::Snapshot,
        execution_id: i64,
    ) -> Result<(ExecutionRecord, Arc<Blueprint>), EngineError> {
        let mut execution = self
            .storage
            .get_execution_for_update(snapshot, execution_id)
            .await?;
        if execution.status != ExecutionStatus::Pending {
            return Err(EngineError::State {
                execution_id,
                status: execution.status,
                operation: "complete",
            });
        }
        let blueprint = self.blueprint(execution.blueprint_id).await?;

        let now = self.clock.now();
        match self
            .storage
            .get_record_state_for_update(snapshot, execution.blueprint_id, execution.record_id)
            .await
        {
            Ok(state) => {
                self.storage
                    .update_record_state(
                        snapshot,
                        execution.blueprint_id,
                        execution.record_id,
                        state.version,
                        execution.to_state_id,
                        now,
                    )
                    .await?;
            }
            Err(StorageError::RecordStateNotFound { .. }) => {
                self.storage
                    .initialize_record_state(
                        snapshot,
                        execution.blueprint_id,
                        execution.record_id,
                        execution.to_state_id,
                        now,
                    )
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(now);
        self.storage
            .update_execution(snapshot, execution.clone())
            .await?;
        Ok((execution, blueprint))
    }

    /// Abort a non-terminal execution. The record state is untouched; a
    /// pending approval request is rejected with the cancellation reason.
    pub async fn cancel_transition(&self, execution_id: i64, reason: &str) -> Result<(), EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.cancel_in(&mut snapshot, execution_id, reason).await;
        let record_id = self.finish(snapshot, result).await?;
        tracing::info!(execution_id, record_id, reason, "transition cancelled");
        Ok(())
    }

    async fn cancel_in(
        &self,
        snapshot: &mut S::Snapshot,
        execution_id: i64,
        reason: &str,
    ) -> Result<RecordId, EngineError> {
        let mut execution = self
            .storage
            .get_execution_for_update(snapshot, execution_id)
            .await?;
        if execution.status.is_terminal() {
            return Err(EngineError::State {
                execution_id,
                status: execution.status,
                operation: "cancel",
            });
        }
        let now = self.clock.now();
        if let Some(mut request) = self
            .storage
            .find_pending_approval_for_execution(snapshot, execution_id)
            .await?
        {
            request.status = ApprovalStatus::Rejected;
            request.resolved_at = Some(now);
            request.reason = Some(format!("execution cancelled: {}", reason));
            self.storage
                .update_approval_request(snapshot, request)
                .await?;
        }
        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(now);
        execution.error_message = Some(reason.to_string());
        let record_id = execution.record_id;
        self.storage.update_execution(snapshot, execution).await?;
        Ok(record_id)
    }

    // ── Approvals ────────────────────────────────────────────────────

    async fn open_approval(
        &self,
        snapshot: &mut S::Snapshot,
        transition: &Transition,
        execution: &ExecutionRecord,
    ) -> Result<ApprovalRequestRecord, EngineError> {
        let Some(approval) = &transition.approval else {
            return Err(EngineError::Approval(format!(
                "transition {} has no approval configured",
                transition.id
            )));
        };
        let record_data = effective_record_data(execution);
        let resolved = self.resolvers.resolve(approval, &record_data).await?;
        let now = self.clock.now();
        let expires_at = approval::expiry(approval, now)?;

        let mut approvers = Vec::with_capacity(resolved.len());
        let mut delegations = Vec::new();
        for user in resolved {
            match self.directory.delegate_of(user, execution.blueprint_id).await? {
                Some(delegate) => {
                    delegations.push(Delegation {
                        delegator_id: user,
                        delegate_id: delegate,
                    });
                    approvers.push(delegate);
                }
                None => approvers.push(user),
            }
        }
        approvers.sort_unstable();
        approvers.dedup();

        let request = self
            .storage
            .insert_approval_request(
                snapshot,
                NewApprovalRequest {
                    approval_id: approval.id,
                    transition_id: transition.id,
                    execution_id: execution.id,
                    blueprint_id: execution.blueprint_id,
                    record_id: execution.record_id,
                    requested_by: execution.executed_by,
                    approvers,
                    delegations,
                    created_at: now,
                    expires_at,
                },
            )
            .await?;
        Ok(request)
    }

    pub async fn approve(
        &self,
        request_id: i64,
        user_id: UserId,
        comments: Option<String>,
    ) -> Result<ApprovalRequestRecord, EngineError> {
        self.respond(request_id, user_id, Decision::Approved, comments)
            .await
    }

    pub async fn reject(
        &self,
        request_id: i64,
        user_id: UserId,
        comments: Option<String>,
    ) -> Result<ApprovalRequestRecord, EngineError> {
        self.respond(request_id, user_id, Decision::Rejected, comments)
            .await
    }

    async fn respond(
        &self,
        request_id: i64,
        user_id: UserId,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<ApprovalRequestRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .respond_in(&mut snapshot, request_id, user_id, decision, comments)
            .await;
        let (request, notify) = self.finish(snapshot, result).await?;

        tracing::info!(
            request_id,
            approver_id = user_id,
            decision = ?decision,
            status = request.status.as_str(),
            "approval response recorded"
        );
        if notify {
            self.announce_approval_outcome(&request);
        }
        Ok(request)
    }

    async fn respond_in(
        &self,
        snapshot: &mut S::Snapshot,
        request_id: i64,
        user_id: UserId,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<(ApprovalRequestRecord, bool), EngineError> {
        let mut request = self
            .storage
            .get_approval_request_for_update(snapshot, request_id)
            .await?;
        let config = self.approval_config(&request).await;
        let require_all = config.as_ref().map_or(true, |a| a.require_all);
        let notify_on_complete = config.as_ref().map_or(true, |a| a.notify_on_complete);

        let status = approval::record_response(
            &mut request,
            require_all,
            user_id,
            decision,
            comments,
            self.clock.now(),
        )?;
        if status != ApprovalStatus::Pending {
            let mut execution = self
                .storage
                .get_execution_for_update(snapshot, request.execution_id)
                .await?;
            if execution.status != ExecutionStatus::PendingApproval {
                return Err(EngineError::State {
                    execution_id: execution.id,
                    status: execution.status,
                    operation: "resolve approval for",
                });
            }
            if status == ApprovalStatus::Approved {
                execution.status = ExecutionStatus::Pending;
            } else {
                execution.status = ExecutionStatus::Cancelled;
                execution.completed_at = request.resolved_at;
                execution.error_message = Some(APPROVAL_REJECTED_REASON.to_string());
            }
            self.storage.update_execution(snapshot, execution).await?;
        }
        self.storage
            .update_approval_request(snapshot, request.clone())
            .await?;
        Ok((request, status != ApprovalStatus::Pending && notify_on_complete))
    }

    /// Reject an expired pending request and cancel its execution. Returns
    /// `false` if the request was resolved in the meantime.
    pub(crate) async fn auto_reject(
        &self,
        request_id: i64,
        now: OffsetDateTime,
    ) -> Result<bool, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.auto_reject_in(&mut snapshot, request_id, now).await;
        let Some(request) = self.finish(snapshot, result).await? else {
            return Ok(false);
        };

        tracing::info!(
            request_id,
            execution_id = request.execution_id,
            record_id = request.record_id,
            "approval request auto-rejected"
        );
        let notify = self
            .approval_config(&request)
            .await
            .map_or(true, |a| a.notify_on_complete);
        if notify {
            self.announce_approval_outcome(&request);
        }
        Ok(true)
    }

    async fn auto_reject_in(
        &self,
        snapshot: &mut S::Snapshot,
        request_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<ApprovalRequestRecord>, EngineError> {
        let mut request = self
            .storage
            .get_approval_request_for_update(snapshot, request_id)
            .await?;
        if !approval::is_expired(&request, now) {
            return Ok(None);
        }
        request.status = ApprovalStatus::Rejected;
        request.resolved_at = Some(now);
        request.reason = Some(AUTO_REJECT_REASON.to_string());

        let mut execution = self
            .storage
            .get_execution_for_update(snapshot, request.execution_id)
            .await?;
        if !execution.status.is_terminal() {
            execution.status = ExecutionStatus::Cancelled;
            execution.completed_at = Some(now);
            execution.error_message = Some(AUTO_REJECT_REASON.to_string());
            self.storage.update_execution(snapshot, execution).await?;
        }
        self.storage
            .update_approval_request(snapshot, request.clone())
            .await?;
        Ok(Some(request))
    }

    /// The approval configuration a request was opened under, if its
    /// blueprint and transition are still registered.
    pub(crate) async fn approval_config(&self, request: &ApprovalRequestRecord) -> Option<Approval> {
        self.blueprint(request.blueprint_id)
            .await
            .ok()
            .and_then(|bp| bp.transition(request.transition_id).and_then(|t| t.approval.clone()))
    }

    /// Swap approver `from` for `to` on a pending request and notify `to`.
    pub async fn reassign_approval(
        &self,
        request_id: i64,
        from: UserId,
        to: UserId,
        reassigned_by: UserId,
        reason: &str,
    ) -> Result<ApprovalRequestRecord, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .reassign_in(&mut snapshot, request_id, from, to, reassigned_by, reason)
            .await;
        let request = self.finish(snapshot, result).await?;

        tracing::info!(
            request_id,
            from_user_id = from,
            to_user_id = to,
            reassigned_by,
            "approval request reassigned"
        );
        let notification = Notification {
            kind: NotificationKind::ApprovalReassigned,
            record_id: request.record_id,
            subject: "Approval request reassigned".to_string(),
            body: format!(
                "Approval request {} for record {} was reassigned to you: {}.",
                request.id, request.record_id, reason
            ),
        };
        self.notify(vec![to], notification);
        Ok(request)
    }

    async fn reassign_in(
        &self,
        snapshot: &mut S::Snapshot,
        request_id: i64,
        from: UserId,
        to: UserId,
        reassigned_by: UserId,
        reason: &str,
    ) -> Result<ApprovalRequestRecord, EngineError> {
        let mut request = self
            .storage
            .get_approval_request_for_update(snapshot, request_id)
            .await?;
        approval::reassign(&mut request, from, to, reassigned_by, reason, self.clock.now())?;
        self.storage
            .update_approval_request(snapshot, request.clone())
            .await?;
        Ok(request)
    }

    /// Hand a stalled request to its escalation target. Returns `false` when
    /// the request no longer qualifies or no target can be found.
    pub(crate) async fn escalate_approval(
        &self,
        request_id: i64,
        now: OffsetDateTime,
    ) -> Result<bool, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.escalate_in(&mut snapshot, request_id, now).await;
        let Some(request) = self.finish(snapshot, result).await? else {
            return Ok(false);
        };
        let Some(target) = request.escalated_to else {
            return Ok(false);
        };

        tracing::info!(
            request_id,
            record_id = request.record_id,
            escalated_to = target,
            "approval request escalated"
        );
        let notification = Notification {
            kind: NotificationKind::ApprovalEscalated,
            record_id: request.record_id,
            subject: "Approval request escalated to you".to_string(),
            body: format!(
                "Approval request {} for record {} has waited since {} and now needs your decision.",
                request.id, request.record_id, request.created_at
            ),
        };
        self.notify(vec![target], notification);
        Ok(true)
    }

    async fn escalate_in(
        &self,
        snapshot: &mut S::Snapshot,
        request_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<ApprovalRequestRecord>, EngineError> {
        let mut request = self
            .storage
            .get_approval_request_for_update(snapshot, request_id)
            .await?;
        let Some(config) = self.approval_config(&request).await else {
            return Ok(None);
        };
        let Some(escalation) = config.escalation.as_ref() else {
            return Ok(None);
        };
        if !approval::escalation_due(&request, &config, now) {
            return Ok(None);
        }
        let target =
            approval::escalation_target(&escalation.target, &request, self.directory.as_ref())
                .await?;
        let Some(target) = target else {
            tracing::warn!(
                request_id,
                escalation_type = escalation.target.as_str(),
                "no escalation target found for approval request"
            );
            return Ok(None);
        };
        approval::escalate(&mut request, target, now);
        self.storage
            .update_approval_request(snapshot, request.clone())
            .await?;
        Ok(Some(request))
    }

    /// Record a reminder and notify the approvers who have not answered.
    /// Returns `false` when no reminder is due.
    pub(crate) async fn remind_approval(
        &self,
        request_id: i64,
        now: OffsetDateTime,
    ) -> Result<bool, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.remind_in(&mut snapshot, request_id, now).await;
        let Some(request) = self.finish(snapshot, result).await? else {
            return Ok(false);
        };

        tracing::info!(
            request_id,
            reminder_count = request.reminder_count,
            "approval reminder sent"
        );
        let notification = Notification {
            kind: NotificationKind::ApprovalReminder,
            record_id: request.record_id,
            subject: "Approval reminder".to_string(),
            body: format!(
                "Approval request {} for record {} is still waiting for your decision.",
                request.id, request.record_id
            ),
        };
        self.notify(approval::silent_approvers(&request), notification);
        Ok(true)
    }

    async fn remind_in(
        &self,
        snapshot: &mut S::Snapshot,
        request_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<ApprovalRequestRecord>, EngineError> {
        let mut request = self
            .storage
            .get_approval_request_for_update(snapshot, request_id)
            .await?;
        let Some(config) = self.approval_config(&request).await else {
            return Ok(None);
        };
        if !approval::reminder_due(&request, &config, now) {
            return Ok(None);
        }
        request.reminder_count += 1;
        request.last_reminder_at = Some(now);
        self.storage
            .update_approval_request(snapshot, request.clone())
            .await?;
        Ok(Some(request))
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn get_record_state(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
    ) -> Result<RecordStateRecord, EngineError> {
        Ok(self.storage.get_record_state(blueprint_id, record_id).await?)
    }

    /// Status of the active SLA on the record's current state, if any.
    pub async fn get_sla_status(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
    ) -> Result<Option<SlaStatus>, EngineError> {
        let blueprint = self.blueprint(blueprint_id).await?;
        let state = self.storage.get_record_state(blueprint_id, record_id).await?;
        blueprint
            .active_sla_for_state(state.current_state_id)
            .map(|s| sla::status(s, state.state_entered_at, self.clock.now(), &self.calendar))
            .transpose()
    }

    pub async fn get_execution(&self, execution_id: i64) -> Result<ExecutionRecord, EngineError> {
        Ok(self.storage.get_execution(execution_id).await?)
    }

    /// Every execution of a record, newest first.
    pub async fn get_transition_history(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
    ) -> Result<Vec<ExecutionRecord>, EngineError> {
        let mut history = self.storage.list_executions(blueprint_id, record_id).await?;
        history.reverse();
        Ok(history)
    }

    pub async fn get_approval_request(
        &self,
        request_id: i64,
    ) -> Result<ApprovalRequestRecord, EngineError> {
        Ok(self.storage.get_approval_request(request_id).await?)
    }

    /// Pending requests `user_id` may still respond to.
    pub async fn pending_approvals_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ApprovalRequestRecord>, EngineError> {
        Ok(self
            .storage
            .list_approval_requests(Some(ApprovalStatus::Pending))
            .await?
            .into_iter()
            .filter(|r| r.approvers.contains(&user_id))
            .filter(|r| r.responses.iter().all(|resp| resp.approver_id != user_id))
            .collect())
    }

    // ── Side effects ─────────────────────────────────────────────────

    fn dispatch_transition_actions(&self, blueprint: &Blueprint, execution: &ExecutionRecord) {
        let Some(transition) = blueprint.transition(execution.transition_id) else {
            return;
        };
        let mut actions: Vec<_> = transition.actions.iter().filter(|a| a.is_active).collect();
        if actions.is_empty() {
            return;
        }
        actions.sort_by_key(|a| (a.display_order, a.id));
        let context = ActionContext {
            blueprint_id: blueprint.id,
            module_id: blueprint.module_id,
            record_id: execution.record_id,
            record_data: effective_record_data(execution),
            trigger: ActionTrigger::Transition {
                execution_id: execution.id,
                transition_id: transition.id,
                transition_name: transition.name.clone(),
                from_state: blueprint
                    .state_name(execution.from_state_id)
                    .map(str::to_string),
                to_state: blueprint
                    .state_name(execution.to_state_id)
                    .unwrap_or_default()
                    .to_string(),
                executed_by: execution.executed_by,
                requirements_data: execution.requirements_data.clone(),
            },
        };
        self.actions.dispatch(
            actions
                .into_iter()
                .map(|a| (a.action_type.clone(), a.config.clone()))
                .collect(),
            context,
        );
    }

    fn announce_approval_request(&self, transition: &Transition, request: &ApprovalRequestRecord) {
        if !transition
            .approval
            .as_ref()
            .is_some_and(|a| a.notify_on_pending)
        {
            return;
        }
        let notification = Notification {
            kind: NotificationKind::ApprovalPending,
            record_id: request.record_id,
            subject: format!("Approval needed: {}", transition.label()),
            body: format!(
                "User {} requested approval of '{}' for record {}.",
                request.requested_by, transition.name, request.record_id
            ),
        };
        self.notify(request.approvers.clone(), notification);

        for delegation in &request.delegations {
            let notification = Notification {
                kind: NotificationKind::ApprovalDelegated,
                record_id: request.record_id,
                subject: format!("Approval delegated: {}", transition.label()),
                body: format!(
                    "User {} received the approval request for record {} on your behalf.",
                    delegation.delegate_id, request.record_id
                ),
            };
            self.notify(vec![delegation.delegator_id], notification);
        }
    }

    fn announce_approval_outcome(&self, request: &ApprovalRequestRecord) {
        let (kind, verb) = match request.status {
            ApprovalStatus::Approved => (NotificationKind::ApprovalApproved, "approved"),
            _ => (NotificationKind::ApprovalRejected, "rejected"),
        };
        let mut body = format!("Approval request {} was {}.", request.id, verb);
        if let Some(reason) = &request.reason {
            body.push_str(&format!(" Reason: {}.", reason));
        }
        let notification = Notification {
            kind,
            record_id: request.record_id,
            subject: format!("Approval {}", verb),
            body,
        };
        self.notify(vec![request.requested_by], notification);
    }

    fn notify(&self, users: Vec<UserId>, notification: Notification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_users(&users, &notification).await {
                tracing::warn!(
                    record_id = notification.record_id,
                    kind = ?notification.kind,
                    error = %e,
                    "notification failed"
                );
            }
        });
    }
}

/// The record data captured at start, overlaid with submitted
/// mandatory-field values.
pub fn effective_record_data(execution: &ExecutionRecord) -> Value {
    let mut data = match &execution.record_data {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    if let Some(fields) = execution
        .requirements_data
        .as_ref()
        .and_then(|r| r.get("fields"))
        .and_then(Value::as_object)
    {
        for (name, value) in fields {
            data.insert(name.clone(), value.clone());
        }
    }
    Value::Object(data)
}
