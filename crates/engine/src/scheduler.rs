//! Escalation scheduler.
//!
//! One sweep ([`EscalationScheduler::tick`]) evaluates the SLA of every
//! record state and fires escalations whose trigger holds, at most once per
//! `(blueprint, escalation, record, state entry)`, then follows up on
//! pending approval requests: an expired request is auto-rejected, else a
//! stalled one is escalated, else a reminder goes out if one is due.
//! Failures are logged per record and never stop the sweep.

use std::future::Future;
use std::sync::Arc;

use blueprint_interchange::{Blueprint, Sla, SlaEscalation};
use blueprint_storage::{ApprovalStatus, BlueprintStorage, EscalationFiringRecord, RecordStateRecord};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;

use crate::action::{ActionContext, ActionTrigger};
use crate::approval;
use crate::engine::BlueprintEngine;
use crate::error::EngineError;
use crate::record_data::RecordDataProvider;
use crate::sla::{self, SlaStatus};

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Record states with an active SLA that were evaluated.
    pub checked: usize,
    pub escalations_fired: usize,
    /// Evaluated records past their due time.
    pub breached: usize,
    pub approvals_auto_rejected: usize,
    pub approvals_escalated: usize,
    pub approval_reminders: usize,
    pub errors: usize,
}

pub struct EscalationScheduler<S: BlueprintStorage> {
    engine: Arc<BlueprintEngine<S>>,
    record_data: Option<Arc<dyn RecordDataProvider>>,
}

impl<S: BlueprintStorage> EscalationScheduler<S> {
    pub fn new(engine: Arc<BlueprintEngine<S>>) -> Self {
        EscalationScheduler {
            engine,
            record_data: None,
        }
    }

    /// Source of record fields for escalation action contexts. Without one
    /// the context carries no record data.
    pub fn with_record_data(mut self, provider: Arc<dyn RecordDataProvider>) -> Self {
        self.record_data = Some(provider);
        self
    }

    pub async fn tick(&self, now: OffsetDateTime) -> TickSummary {
        let mut summary = TickSummary::default();

        for blueprint in self.engine.blueprints().await {
            if !blueprint.is_active || blueprint.slas.iter().all(|s| !s.is_active) {
                continue;
            }
            let states = match self
                .engine
                .storage()
                .list_record_states(Some(blueprint.id))
                .await
            {
                Ok(states) => states,
                Err(e) => {
                    tracing::error!(blueprint_id = blueprint.id, error = %e, "listing record states failed");
                    summary.errors += 1;
                    continue;
                }
            };
            for state in states {
                let Some(sla) = blueprint.active_sla_for_state(state.current_state_id) else {
                    continue;
                };
                summary.checked += 1;
                match self.sweep_record(&blueprint, sla, &state, now).await {
                    Ok((fired, breached)) => {
                        summary.escalations_fired += fired;
                        summary.breached += usize::from(breached);
                    }
                    Err(e) => {
                        tracing::error!(
                            blueprint_id = blueprint.id,
                            record_id = state.record_id,
                            error = %e,
                            "escalation sweep failed for record"
                        );
                        summary.errors += 1;
                    }
                }
            }
        }

        self.sweep_approvals(now, &mut summary).await;
        summary
    }

    /// Returns the number of escalations fired and whether the SLA is
    /// breached.
    async fn sweep_record(
        &self,
        blueprint: &Blueprint,
        sla: &Sla,
        state: &RecordStateRecord,
        now: OffsetDateTime,
    ) -> Result<(usize, bool), EngineError> {
        let status = sla::status(sla, state.state_entered_at, now, self.engine.calendar())?;
        let mut fired = 0;
        for escalation in sla.ordered_escalations() {
            if !status.triggers(&escalation.trigger) {
                continue;
            }
            let inserted = self
                .engine
                .storage()
                .record_escalation_firing(EscalationFiringRecord {
                    escalation_id: escalation.id,
                    blueprint_id: blueprint.id,
                    record_id: state.record_id,
                    state_entered_at: state.state_entered_at,
                    fired_at: now,
                })
                .await?;
            if !inserted {
                continue;
            }
            fired += 1;
            tracing::info!(
                blueprint_id = blueprint.id,
                record_id = state.record_id,
                sla_id = sla.id,
                escalation_id = escalation.id,
                trigger = escalation.trigger.as_str(),
                action_type = %escalation.action_type,
                "escalation fired"
            );
            let context = self.context(blueprint, state, &status, escalation).await;
            self.engine.actions().dispatch(
                vec![(escalation.action_type.clone(), escalation.config.clone())],
                context,
            );
        }
        Ok((fired, status.is_breached))
    }

    async fn context(
        &self,
        blueprint: &Blueprint,
        state: &RecordStateRecord,
        status: &SlaStatus,
        escalation: &SlaEscalation,
    ) -> ActionContext {
        let record_data = match &self.record_data {
            Some(provider) => match provider.fetch_record_fields(state.record_id).await {
                Ok(fields) => fields,
                Err(e) => {
                    tracing::warn!(record_id = state.record_id, error = %e, "record fetch failed");
                    Value::Object(Default::default())
                }
            },
            None => Value::Object(Default::default()),
        };
        ActionContext {
            blueprint_id: blueprint.id,
            module_id: blueprint.module_id,
            record_id: state.record_id,
            record_data,
            trigger: ActionTrigger::Escalation {
                escalation_id: escalation.id,
                sla_id: status.sla_id,
                sla_name: status.sla_name.clone(),
                state_name: blueprint
                    .state_name(state.current_state_id)
                    .unwrap_or_default()
                    .to_string(),
                trigger: escalation.trigger.as_str().to_string(),
                duration_hours: status.duration_hours,
                state_entered_at: status.state_entered_at,
                due_at: status.due_at,
                percent_elapsed: status.percent_elapsed,
                remaining_seconds: status.remaining_seconds,
                is_breached: status.is_breached,
            },
        }
    }

    async fn sweep_approvals(&self, now: OffsetDateTime, summary: &mut TickSummary) {
        let pending = match self
            .engine
            .storage()
            .list_approval_requests(Some(ApprovalStatus::Pending))
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "listing pending approvals failed");
                summary.errors += 1;
                return;
            }
        };
        for request in &pending {
            if approval::is_expired(request, now) {
                match self.engine.auto_reject(request.id, now).await {
                    Ok(true) => summary.approvals_auto_rejected += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(request_id = request.id, error = %e, "auto-reject failed");
                        summary.errors += 1;
                    }
                }
                continue;
            }
            let Some(config) = self.engine.approval_config(request).await else {
                continue;
            };
            if approval::escalation_due(request, &config, now) {
                match self.engine.escalate_approval(request.id, now).await {
                    Ok(true) => {
                        summary.approvals_escalated += 1;
                        continue;
                    }
                    // no target: a reminder may still be due
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(request_id = request.id, error = %e, "approval escalation failed");
                        summary.errors += 1;
                        continue;
                    }
                }
            }
            if approval::reminder_due(request, &config, now) {
                match self.engine.remind_approval(request.id, now).await {
                    Ok(true) => summary.approval_reminders += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(request_id = request.id, error = %e, "approval reminder failed");
                        summary.errors += 1;
                    }
                }
            }
        }
    }

    /// Tick on `interval` until `shutdown` resolves.
    pub async fn run(&self, interval: std::time::Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        tracing::info!(interval_secs = interval.as_secs(), "escalation scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let summary = self.tick(self.engine.clock().now()).await;
                    tracing::info!(
                        checked = summary.checked,
                        fired = summary.escalations_fired,
                        breached = summary.breached,
                        auto_rejected = summary.approvals_auto_rejected,
                        approvals_escalated = summary.approvals_escalated,
                        reminders = summary.approval_reminders,
                        errors = summary.errors,
                        "scheduler tick"
                    );
                }
            }
        }
        tracing::info!("escalation scheduler stopped");
    }
}
