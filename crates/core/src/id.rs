//! Strongly-typed node identifiers.

use core::fmt::Debug;
use core::hash::Hash;
use core::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker for one instantiation of the hierarchy (roles, permissions, ...).
///
/// Implementors are zero-sized tags; they keep ids of different hierarchies
/// from being mixed up at compile time.
pub trait NodeKind:
    Copy + Eq + Ord + Hash + Debug + Default + Send + Sync + 'static
{
    /// Singular lowercase name used in logs, errors, cache keys, job routes
    /// and table names.
    const NAME: &'static str;
}

/// Identifier of a node within the hierarchy of kind `K`.
///
/// Ids are 64-bit integers handed out by an external [`IdGenerator`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId<K: NodeKind>(i64, PhantomData<K>);

impl<K: NodeKind> NodeId<K> {
    pub const fn new(raw: i64) -> Self {
        Self(raw, PhantomData)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl<K: NodeKind> Debug for NodeId<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", K::NAME, self.0)
    }
}

impl<K: NodeKind> core::fmt::Display for NodeId<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl<K: NodeKind> From<i64> for NodeId<K> {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl<K: NodeKind> From<NodeId<K>> for i64 {
    fn from(value: NodeId<K>) -> Self {
        value.0
    }
}

impl<K: NodeKind> Serialize for NodeId<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, K: NodeKind> Deserialize<'de> for NodeId<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Self::new)
    }
}

/// Source of globally unique 64-bit ids.
///
/// Monotonicity is not required by the hierarchy, only uniqueness.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> i64;
}
