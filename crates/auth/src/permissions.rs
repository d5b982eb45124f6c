use serde::{Deserialize, Serialize};

use trellis_core::{NodeId, NodeKind};

/// Permission hierarchy tag.
///
/// Permissions are addressed by code (e.g. "inventory.read"); holding an
/// ancestor permission grants all of its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Permission;

impl NodeKind for Permission {
    const NAME: &'static str = "permission";
}

pub type PermissionId = NodeId<Permission>;
