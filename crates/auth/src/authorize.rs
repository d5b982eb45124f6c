use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use trellis_core::{NodeId, NodeKind};

use crate::{Permission, PermissionId, Principal, PrincipalId, Role, RoleId};

/// Read access to one hierarchy, as needed by authorization.
///
/// Implemented by the hierarchy engine in `trellis-infra`; tests use plain maps.
pub trait HierarchyView<K: NodeKind> {
    type Error: core::fmt::Display;

    /// Resolve an active node by its code.
    fn id_by_code(&self, code: &str) -> Result<Option<NodeId<K>>, Self::Error>;

    /// Every descendant (depth >= 1) of any of `ids`, each listed once.
    fn descendant_ids(&self, ids: &[NodeId<K>]) -> Result<Vec<NodeId<K>>, Self::Error>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("unknown permission '{0}'")]
    UnknownPermission(String),

    #[error("hierarchy lookup failed: {0}")]
    Hierarchy(String),
}

/// Every permission the principal holds, directly or by implication.
///
/// Roles expand to their descendant roles, each role contributes the
/// permissions `role_permissions` grants it, and every permission then
/// expands to its descendant permissions.
pub fn effective_permissions<R, P, F>(
    principal: &Principal,
    roles: &R,
    permissions: &P,
    role_permissions: F,
) -> Result<BTreeSet<PermissionId>, AuthzError>
where
    R: HierarchyView<Role>,
    P: HierarchyView<Permission>,
    F: Fn(RoleId) -> Vec<PermissionId>,
{
    let mut held_roles: BTreeSet<RoleId> = principal.roles.iter().copied().collect();
    held_roles.extend(
        roles
            .descendant_ids(&principal.roles)
            .map_err(|e| AuthzError::Hierarchy(e.to_string()))?,
    );

    let mut granted: BTreeSet<PermissionId> = principal.permissions.iter().copied().collect();
    for role in &held_roles {
        granted.extend(role_permissions(*role));
    }

    let direct: Vec<PermissionId> = granted.iter().copied().collect();
    granted.extend(
        permissions
            .descendant_ids(&direct)
            .map_err(|e| AuthzError::Hierarchy(e.to_string()))?,
    );

    Ok(granted)
}

/// Authorize a principal for the permission with code `required`.
///
/// - No writes
/// - No panics
/// - Unknown (or archived) permission codes are rejected, never granted
pub fn authorize<R, P, F>(
    principal: &Principal,
    required: &str,
    roles: &R,
    permissions: &P,
    role_permissions: F,
) -> Result<(), AuthzError>
where
    R: HierarchyView<Role>,
    P: HierarchyView<Permission>,
    F: Fn(RoleId) -> Vec<PermissionId>,
{
    let explanation = explain_authorization(principal, required, roles, permissions, role_permissions)?;
    if explanation.granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.to_string()))
    }
}

/// Detailed explanation of an authorization decision, for audit logs.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub principal_id: PrincipalId,
    pub required_permission: String,
    pub granted: bool,
    pub reason: String,
    pub effective_permissions: Vec<i64>,
}

/// Explain why a check against `required` would be allowed or denied.
pub fn explain_authorization<R, P, F>(
    principal: &Principal,
    required: &str,
    roles: &R,
    permissions: &P,
    role_permissions: F,
) -> Result<AuthorizationExplanation, AuthzError>
where
    R: HierarchyView<Role>,
    P: HierarchyView<Permission>,
    F: Fn(RoleId) -> Vec<PermissionId>,
{
    let required_id = permissions
        .id_by_code(required)
        .map_err(|e| AuthzError::Hierarchy(e.to_string()))?
        .ok_or_else(|| AuthzError::UnknownPermission(required.to_string()))?;

    let effective = effective_permissions(principal, roles, permissions, role_permissions)?;
    let granted = effective.contains(&required_id);

    let reason = if principal.permissions.contains(&required_id) {
        format!("permission '{required}' is assigned directly")
    } else if granted {
        format!("permission '{required}' is implied by a held role or permission")
    } else {
        format!("no held role or permission implies '{required}'")
    };

    tracing::debug!(
        principal_id = %principal.principal_id,
        permission = required,
        granted,
        "authorization evaluated"
    );

    Ok(AuthorizationExplanation {
        principal_id: principal.principal_id,
        required_permission: required.to_string(),
        granted,
        reason,
        effective_permissions: effective.into_iter().map(NodeId::get).collect(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    /// Direct edges only; descendants are found by walking them.
    #[derive(Default)]
    struct MapView<K: NodeKind> {
        codes: HashMap<String, NodeId<K>>,
        children: HashMap<NodeId<K>, Vec<NodeId<K>>>,
    }

    impl<K: NodeKind> MapView<K> {
        fn node(mut self, code: &str, id: i64) -> Self {
            self.codes.insert(code.to_string(), NodeId::new(id));
            self
        }

        fn edge(mut self, ancestor: i64, descendant: i64) -> Self {
            self.children
                .entry(NodeId::new(ancestor))
                .or_default()
                .push(NodeId::new(descendant));
            self
        }
    }

    impl<K: NodeKind> HierarchyView<K> for MapView<K> {
        type Error = String;

        fn id_by_code(&self, code: &str) -> Result<Option<NodeId<K>>, String> {
            Ok(self.codes.get(code).copied())
        }

        fn descendant_ids(&self, ids: &[NodeId<K>]) -> Result<Vec<NodeId<K>>, String> {
            let mut seen = BTreeSet::new();
            let mut stack: Vec<NodeId<K>> = ids.to_vec();
            while let Some(id) = stack.pop() {
                for child in self.children.get(&id).into_iter().flatten() {
                    if seen.insert(*child) {
                        stack.push(*child);
                    }
                }
            }
            Ok(seen.into_iter().collect())
        }
    }

    struct Broken;

    impl<K: NodeKind> HierarchyView<K> for Broken {
        type Error = String;

        fn id_by_code(&self, _code: &str) -> Result<Option<NodeId<K>>, String> {
            Err("store unavailable".into())
        }

        fn descendant_ids(&self, _ids: &[NodeId<K>]) -> Result<Vec<NodeId<K>>, String> {
            Err("store unavailable".into())
        }
    }

    fn permissions() -> MapView<Permission> {
        // inventory.* -> inventory.write -> inventory.read
        MapView::default()
            .node("inventory.*", 1)
            .node("inventory.write", 2)
            .node("inventory.read", 3)
            .node("billing.read", 4)
            .edge(1, 2)
            .edge(2, 3)
    }

    fn roles() -> MapView<Role> {
        // super_admin -> admin -> editor
        MapView::default().edge(10, 11).edge(11, 12)
    }

    fn grants(role: RoleId) -> Vec<PermissionId> {
        match role.get() {
            12 => vec![PermissionId::new(2)],
            _ => Vec::new(),
        }
    }

    #[test]
    fn ancestor_permission_implies_descendants() {
        let p = Principal::new(PrincipalId::new()).with_permission(PermissionId::new(1));
        assert!(authorize(&p, "inventory.read", &roles(), &permissions(), grants).is_ok());
        assert!(authorize(&p, "inventory.write", &roles(), &permissions(), grants).is_ok());
    }

    #[test]
    fn descendant_permission_does_not_imply_ancestor() {
        let p = Principal::new(PrincipalId::new()).with_permission(PermissionId::new(3));
        assert_eq!(
            authorize(&p, "inventory.write", &roles(), &permissions(), grants),
            Err(AuthzError::Forbidden("inventory.write".into()))
        );
    }

    #[test]
    fn grants_flow_down_the_role_hierarchy() {
        let p = Principal::new(PrincipalId::new()).with_role(RoleId::new(10));
        let effective = effective_permissions(&p, &roles(), &permissions(), grants).unwrap();
        assert_eq!(
            effective,
            BTreeSet::from([PermissionId::new(2), PermissionId::new(3)])
        );
        assert!(authorize(&p, "billing.read", &roles(), &permissions(), grants).is_err());
    }

    #[test]
    fn unknown_code_is_rejected() {
        let p = Principal::new(PrincipalId::new()).with_permission(PermissionId::new(1));
        assert_eq!(
            authorize(&p, "nope", &roles(), &permissions(), grants),
            Err(AuthzError::UnknownPermission("nope".into()))
        );
    }

    #[test]
    fn lookup_failures_surface_as_hierarchy_errors() {
        let p = Principal::new(PrincipalId::new());
        let err = authorize(&p, "inventory.read", &roles(), &Broken, grants).unwrap_err();
        assert!(matches!(err, AuthzError::Hierarchy(msg) if msg.contains("unavailable")));
    }

    #[test]
    fn explanation_distinguishes_direct_and_implied() {
        let p = Principal::new(PrincipalId::new())
            .with_permission(PermissionId::new(1))
            .with_permission(PermissionId::new(4));
        let direct =
            explain_authorization(&p, "billing.read", &roles(), &permissions(), grants).unwrap();
        assert!(direct.granted);
        assert!(direct.reason.contains("directly"));

        let implied =
            explain_authorization(&p, "inventory.read", &roles(), &permissions(), grants).unwrap();
        assert!(implied.granted);
        assert!(implied.reason.contains("implied"));
        assert_eq!(implied.effective_permissions, vec![1, 2, 3, 4]);
    }
}
