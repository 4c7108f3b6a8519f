use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use tallyerp_core::{RoleId, UserId};

use crate::{Role, RoleRef};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("role directory unavailable: {0}")]
    Unavailable(String),
}

/// Read-only lookup of roles and user memberships.
///
/// Backed by whatever identity system the deployment uses; the ledger core
/// never writes through this trait.
pub trait RoleDirectory: Send + Sync {
    /// Whether `user` is a member of `role`.
    fn user_has_role(&self, user: UserId, role: RoleId) -> Result<bool, DirectoryError>;

    /// Resolve a role by its exact name.
    fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DirectoryError>;

    /// Whether `user` holds the referenced role.
    ///
    /// The id is checked first; if it does not grant membership, the name is
    /// resolved and checked as a fallback.
    fn holds(&self, user: UserId, role: &RoleRef) -> Result<bool, DirectoryError> {
        if let Some(role_id) = role.role_id {
            if self.user_has_role(user, role_id)? {
                return Ok(true);
            }
        }

        if let Some(name) = role.role_name.as_deref().filter(|n| !n.trim().is_empty()) {
            if let Some(found) = self.find_role_by_name(name)? {
                return self.user_has_role(user, found.id);
            }
        }

        Ok(false)
    }
}

impl<D> RoleDirectory for Arc<D>
where
    D: RoleDirectory + ?Sized,
{
    fn user_has_role(&self, user: UserId, role: RoleId) -> Result<bool, DirectoryError> {
        (**self).user_has_role(user, role)
    }

    fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DirectoryError> {
        (**self).find_role_by_name(name)
    }
}

/// In-memory role directory for tests/dev.
///
/// Writes take `&mut self`: the directory is filled while it is still owned
/// and only shared (behind an `Arc`) once complete, so no lock is needed.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRoleDirectory {
    roles: HashMap<RoleId, Role>,
    memberships: HashSet<(UserId, RoleId)>,
}

impl InMemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_role(&mut self, role: Role) {
        self.roles.insert(role.id, role);
    }

    pub fn grant(&mut self, user: UserId, role: RoleId) {
        self.memberships.insert((user, role));
    }

    pub fn revoke(&mut self, user: UserId, role: RoleId) {
        self.memberships.remove(&(user, role));
    }
}

impl RoleDirectory for InMemoryRoleDirectory {
    fn user_has_role(&self, user: UserId, role: RoleId) -> Result<bool, DirectoryError> {
        Ok(self.memberships.contains(&(user, role)))
    }

    fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DirectoryError> {
        // Duplicate names resolve to the lowest id so lookups stay deterministic.
        Ok(self
            .roles
            .values()
            .filter(|r| r.as_str() == name)
            .min_by_key(|r| r.id)
            .cloned())
    }
}
