//! Identity directory: roles to users, owners to managers.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use blueprint_interchange::UserId;

use crate::error::CollaboratorError;

/// Looks up users for approver resolution.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Active users holding any of `roles`, ascending by id.
    async fn users_with_roles(&self, roles: &[String]) -> Result<Vec<UserId>, CollaboratorError>;

    /// The manager of `user`, if they have one.
    async fn manager_of(&self, user: UserId) -> Result<Option<UserId>, CollaboratorError>;

    /// Who currently answers approvals on `blueprint_id` in place of `user`.
    async fn delegate_of(
        &self,
        _user: UserId,
        _blueprint_id: i64,
    ) -> Result<Option<UserId>, CollaboratorError> {
        Ok(None)
    }
}

// ──────────────────────────────────────────────
// StaticDirectory
// ──────────────────────────────────────────────

/// In-memory directory for tests and the CLI host.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    roles: BTreeMap<String, BTreeSet<UserId>>,
    managers: BTreeMap<UserId, UserId>,
    delegates: BTreeMap<UserId, UserId>,
    inactive: BTreeSet<UserId>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: impl Into<String>, user: UserId) -> Self {
        self.roles.entry(role.into()).or_default().insert(user);
        self
    }

    pub fn with_manager(mut self, user: UserId, manager: UserId) -> Self {
        self.managers.insert(user, manager);
        self
    }

    /// `delegate` answers for `user` on every blueprint.
    pub fn with_delegate(mut self, user: UserId, delegate: UserId) -> Self {
        self.delegates.insert(user, delegate);
        self
    }

    /// Inactive users keep their roles but are never resolved.
    pub fn with_inactive(mut self, user: UserId) -> Self {
        self.inactive.insert(user);
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn users_with_roles(&self, roles: &[String]) -> Result<Vec<UserId>, CollaboratorError> {
        let users: BTreeSet<UserId> = roles
            .iter()
            .filter_map(|r| self.roles.get(r))
            .flatten()
            .copied()
            .filter(|u| !self.inactive.contains(u))
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn manager_of(&self, user: UserId) -> Result<Option<UserId>, CollaboratorError> {
        Ok(self.managers.get(&user).copied())
    }

    async fn delegate_of(
        &self,
        user: UserId,
        _blueprint_id: i64,
    ) -> Result<Option<UserId>, CollaboratorError> {
        Ok(self
            .delegates
            .get(&user)
            .copied()
            .filter(|d| *d != user && !self.inactive.contains(d)))
    }
}
