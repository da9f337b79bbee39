//! Shared fixtures for engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blueprint_engine::{
    ActionContext, ActionHandler, BlueprintEngine, CollaboratorError, ManualClock, Notification,
    Notifier, StaticDirectory,
};
use blueprint_storage::InMemoryStorage;
use serde_json::Value;
use time::macros::datetime;
use time::OffsetDateTime;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Monday morning, inside the business window.
pub const T0: OffsetDateTime = datetime!(2025-01-06 09:00 UTC);

// ──────────────────────────────────────────────
// Collaborators
// ──────────────────────────────────────────────

/// Forwards every invocation to the test.
pub struct Recorder {
    tx: UnboundedSender<(Value, ActionContext)>,
}

#[async_trait]
impl ActionHandler for Recorder {
    async fn invoke(&self, config: &Value, context: &ActionContext) -> Result<(), CollaboratorError> {
        let _ = self.tx.send((config.clone(), context.clone()));
        Ok(())
    }
}

/// Fails every invocation.
pub struct Exploding;

#[async_trait]
impl ActionHandler for Exploding {
    async fn invoke(&self, _config: &Value, _context: &ActionContext) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::new("detonated"))
    }
}

pub struct CaptureNotifier {
    tx: UnboundedSender<(Vec<i64>, Notification)>,
}

#[async_trait]
impl Notifier for CaptureNotifier {
    async fn notify_users(
        &self,
        users: &[i64],
        notification: &Notification,
    ) -> Result<(), CollaboratorError> {
        let _ = self.tx.send((users.to_vec(), notification.clone()));
        Ok(())
    }

    async fn send_email(
        &self,
        _to: &[String],
        _notification: &Notification,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Harness
// ──────────────────────────────────────────────

pub struct Harness {
    pub engine: Arc<BlueprintEngine<InMemoryStorage>>,
    pub clock: Arc<ManualClock>,
    pub actions: UnboundedReceiver<(Value, ActionContext)>,
    pub notifications: UnboundedReceiver<(Vec<i64>, Notification)>,
}

impl Harness {
    pub async fn new(config: Value) -> Harness {
        Harness::with_directory(config, StaticDirectory::new()).await
    }

    /// Engine with a manual clock at [`T0`], a `record` action type, an
    /// always-failing `explode` action type, and `config` registered.
    pub async fn with_directory(config: Value, directory: StaticDirectory) -> Harness {
        let clock = Arc::new(ManualClock::new(T0));
        let (action_tx, actions) = unbounded_channel();
        let (notify_tx, notifications) = unbounded_channel();
        let engine = BlueprintEngine::builder(Arc::new(InMemoryStorage::new()))
            .clock(clock.clone())
            .notifier(Arc::new(CaptureNotifier { tx: notify_tx }))
            .directory(Arc::new(directory))
            .action("record", Arc::new(Recorder { tx: action_tx }))
            .action("explode", Arc::new(Exploding))
            .build();
        engine.register_blueprint_config(&config).await.unwrap();
        Harness {
            engine: Arc::new(engine),
            clock,
            actions,
            notifications,
        }
    }

    pub async fn next_action(&mut self) -> (Value, ActionContext) {
        tokio::time::timeout(Duration::from_secs(2), self.actions.recv())
            .await
            .expect("timed out waiting for action")
            .expect("action channel closed")
    }

    pub async fn next_notification(&mut self) -> (Vec<i64>, Notification) {
        tokio::time::timeout(Duration::from_secs(2), self.notifications.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("notification channel closed")
    }

    /// Let spawned side effects run, then report whether any action fired.
    pub async fn no_more_actions(&mut self) -> bool {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        self.actions.try_recv().is_err()
    }
}
