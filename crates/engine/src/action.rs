//! Action dispatch.
//!
//! Transition actions and escalation firings are side effects: one spawned
//! task hands each action to the handler registered for its `action_type`,
//! one after another in the given order. Failures are logged, never
//! propagated, and do not stop the actions after them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use blueprint_interchange::{BlueprintId, RecordId, UserId};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::CollaboratorError;
use crate::notify::{Notification, NotificationKind, Notifier};

// ──────────────────────────────────────────────
// ActionContext
// ──────────────────────────────────────────────

/// What caused an action to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionTrigger {
    Transition {
        execution_id: i64,
        transition_id: i64,
        transition_name: String,
        from_state: Option<String>,
        to_state: String,
        executed_by: UserId,
        requirements_data: Option<Value>,
    },
    Escalation {
        escalation_id: i64,
        sla_id: i64,
        sla_name: String,
        state_name: String,
        trigger: String,
        duration_hours: u32,
        #[serde(with = "time::serde::rfc3339")]
        state_entered_at: time::OffsetDateTime,
        #[serde(with = "time::serde::rfc3339")]
        due_at: time::OffsetDateTime,
        percent_elapsed: rust_decimal::Decimal,
        remaining_seconds: i64,
        is_breached: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionContext {
    pub blueprint_id: BlueprintId,
    pub module_id: i64,
    pub record_id: RecordId,
    pub record_data: Value,
    pub trigger: ActionTrigger,
}

impl ActionContext {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ──────────────────────────────────────────────
// ActionHandler
// ──────────────────────────────────────────────

/// Performs one kind of side effect.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(&self, config: &Value, context: &ActionContext) -> Result<(), CollaboratorError>;
}

/// Action type string to handler.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `notify_user` and `send_email`, both routed through `notifier`.
    pub fn with_builtin(notifier: Arc<dyn Notifier>) -> Self {
        let mut registry = Self::new();
        registry.register(
            "notify_user",
            Arc::new(NotifyUserAction {
                notifier: notifier.clone(),
            }),
        );
        registry.register("send_email", Arc::new(SendEmailAction { notifier }));
        registry
    }

    /// Replaces any handler already registered for `action_type`.
    pub fn register(&mut self, action_type: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type.into(), handler);
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run `actions` sequentially on one spawned task. Returns `None` when
    /// no action has a registered handler. The handle is only useful to
    /// callers that want to wait for the side effects (tests).
    pub fn dispatch(
        &self,
        actions: Vec<(String, Value)>,
        context: ActionContext,
    ) -> Option<JoinHandle<()>> {
        let mut runnable = Vec::with_capacity(actions.len());
        for (action_type, config) in actions {
            match self.handlers.get(&action_type) {
                Some(handler) => runnable.push((action_type, config, handler.clone())),
                None => tracing::warn!(
                    action_type = %action_type,
                    record_id = context.record_id,
                    "no handler registered for action type"
                ),
            }
        }
        if runnable.is_empty() {
            return None;
        }
        Some(tokio::spawn(async move {
            for (action_type, config, handler) in runnable {
                if let Err(e) = handler.invoke(&config, &context).await {
                    tracing::warn!(
                        action_type = %action_type,
                        record_id = context.record_id,
                        error = %e,
                        "action failed"
                    );
                }
            }
        }))
    }
}

// ──────────────────────────────────────────────
// Templates
// ──────────────────────────────────────────────

/// Replace `{{path}}` placeholders with values from the context. A path is
/// looked up in the serialized context first (`record_id`,
/// `trigger.to_state`, ...) and then in the record fields. Unknown paths
/// render as the empty string.
pub fn render_template(template: &str, context: &ActionContext) -> String {
    let json = context.to_json();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let path = after[..end].trim();
        let value = lookup(&json, path).or_else(|| lookup(&context.record_data, path));
        if let Some(v) = value {
            out.push_str(&display(v));
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |v, segment| v.get(segment))
        .filter(|v| !v.is_null())
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ──────────────────────────────────────────────
// Built-in handlers
// ──────────────────────────────────────────────

/// `notify_user`: `{"user_ids": [..]}` and/or `{"user_field": "owner_id"}`,
/// with `title` and `message` templates.
pub struct NotifyUserAction {
    notifier: Arc<dyn Notifier>,
}

impl NotifyUserAction {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        NotifyUserAction { notifier }
    }
}

#[async_trait]
impl ActionHandler for NotifyUserAction {
    async fn invoke(&self, config: &Value, context: &ActionContext) -> Result<(), CollaboratorError> {
        let mut users: Vec<UserId> = config
            .get("user_ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        if let Some(field) = config.get("user_field").and_then(Value::as_str) {
            if let Some(id) = context.record_data.get(field).and_then(user_id) {
                users.push(id);
            }
        }
        users.sort_unstable();
        users.dedup();
        if users.is_empty() {
            return Err(CollaboratorError::new("notify_user: no recipients"));
        }
        let notification = notification(config, context, "title", "message");
        self.notifier.notify_users(&users, &notification).await
    }
}

/// `send_email`: `{"to": "a@b" | [..]}` and/or `{"to_field": "email"}`,
/// with `subject` and `body` templates.
pub struct SendEmailAction {
    notifier: Arc<dyn Notifier>,
}

impl SendEmailAction {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        SendEmailAction { notifier }
    }
}

#[async_trait]
impl ActionHandler for SendEmailAction {
    async fn invoke(&self, config: &Value, context: &ActionContext) -> Result<(), CollaboratorError> {
        let mut to: Vec<String> = match config.get("to") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if let Some(field) = config.get("to_field").and_then(Value::as_str) {
            if let Some(addr) = context.record_data.get(field).and_then(Value::as_str) {
                to.push(addr.to_string());
            }
        }
        to.retain(|a| !a.trim().is_empty());
        if to.is_empty() {
            return Err(CollaboratorError::new("send_email: no recipients"));
        }
        let notification = notification(config, context, "subject", "body");
        self.notifier.send_email(&to, &notification).await
    }
}

fn notification(
    config: &Value,
    context: &ActionContext,
    subject_key: &str,
    body_key: &str,
) -> Notification {
    let template = |key: &str| {
        config
            .get(key)
            .and_then(Value::as_str)
            .map(|t| render_template(t, context))
            .unwrap_or_default()
    };
    let kind = match context.trigger {
        ActionTrigger::Transition { .. } => NotificationKind::Action,
        ActionTrigger::Escalation { .. } => NotificationKind::Escalation,
    };
    Notification {
        kind,
        record_id: context.record_id,
        subject: template(subject_key),
        body: template(body_key),
    }
}

/// A user id held in a record field, as a number or numeric string.
pub(crate) fn user_id(value: &Value) -> Option<UserId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
