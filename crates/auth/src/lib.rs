//! `trellis-auth`: the role and permission hierarchies and the
//! authorization check built on top of them.
//!
//! This crate is intentionally decoupled from storage: hierarchies are
//! reached through the [`HierarchyView`] trait.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{
    AuthorizationExplanation, AuthzError, HierarchyView, authorize, effective_permissions,
    explain_authorization,
};
pub use permissions::{Permission, PermissionId};
pub use principal::{Principal, PrincipalId};
pub use roles::{Role, RoleId};
