use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PermissionId, RoleId};

/// Identity of an authenticated principal (human user, service account, etc).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A principal with its directly assigned roles and permissions.
///
/// Implied roles/permissions are not stored here; they are derived from the
/// hierarchies at check time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub roles: Vec<RoleId>,
    pub permissions: Vec<PermissionId>,
}

impl Principal {
    pub fn new(principal_id: PrincipalId) -> Self {
        Self {
            principal_id,
            roles: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.push(role);
        self
    }

    pub fn with_permission(mut self, permission: PermissionId) -> Self {
        self.permissions.push(permission);
        self
    }
}
