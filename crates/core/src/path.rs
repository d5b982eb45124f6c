//! Closure-table rows.

use serde::{Deserialize, Serialize};

use crate::id::{NodeId, NodeKind};

/// One reachable `(ancestor → descendant)` pair.
///
/// `depth` is the length of the shortest chain of direct edges between the
/// two nodes: 0 for the self row, 1 for a direct edge. Each pair is stored
/// at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Path<K: NodeKind> {
    pub ancestor: NodeId<K>,
    pub descendant: NodeId<K>,
    pub depth: u32,
}

impl<K: NodeKind> Path<K> {
    pub fn new(ancestor: NodeId<K>, descendant: NodeId<K>, depth: u32) -> Self {
        Self {
            ancestor,
            descendant,
            depth,
        }
    }

    /// The depth-0 row every node owns.
    pub fn self_path(id: NodeId<K>) -> Self {
        Self::new(id, id, 0)
    }

    pub fn direct(ancestor: NodeId<K>, descendant: NodeId<K>) -> Self {
        Self::new(ancestor, descendant, 1)
    }

    pub fn pair(&self) -> (NodeId<K>, NodeId<K>) {
        (self.ancestor, self.descendant)
    }

    pub fn is_self(&self) -> bool {
        self.depth == 0
    }

    pub fn is_direct(&self) -> bool {
        self.depth == 1
    }
}
