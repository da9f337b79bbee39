//! Notification dispatch.

use async_trait::async_trait;
use blueprint_interchange::{RecordId, UserId};
use serde::Serialize;

use crate::error::CollaboratorError;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalPending,
    ApprovalApproved,
    ApprovalRejected,
    ApprovalReminder,
    ApprovalEscalated,
    ApprovalReassigned,
    /// Tells a delegator that their delegate received a request.
    ApprovalDelegated,
    Action,
    Escalation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub record_id: RecordId,
    pub subject: String,
    pub body: String,
}

/// Delivers in-app notifications and emails. Callers never wait on
/// delivery outcome beyond logging it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_users(
        &self,
        users: &[UserId],
        notification: &Notification,
    ) -> Result<(), CollaboratorError>;

    async fn send_email(
        &self,
        to: &[String],
        notification: &Notification,
    ) -> Result<(), CollaboratorError>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_users(
        &self,
        users: &[UserId],
        notification: &Notification,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            kind = ?notification.kind,
            record_id = notification.record_id,
            ?users,
            subject = %notification.subject,
            "notification"
        );
        Ok(())
    }

    async fn send_email(
        &self,
        to: &[String],
        notification: &Notification,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            kind = ?notification.kind,
            record_id = notification.record_id,
            ?to,
            subject = %notification.subject,
            "email"
        );
        Ok(())
    }
}
