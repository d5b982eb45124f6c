use serde::{Deserialize, Serialize};

use trellis_core::{NodeId, NodeKind};

/// Role hierarchy tag.
///
/// An ancestor role implies every descendant role ("super_admin" implies
/// "admin" implies "editor").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Role;

impl NodeKind for Role {
    const NAME: &'static str = "role";
}

pub type RoleId = NodeId<Role>;
