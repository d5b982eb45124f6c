//! Cache tier for resolved node views.
//!
//! Read-through and write-invalidate: the engine fills entries on read
//! misses and deletes them after a committed write. Entries are never
//! updated in place. The cache is best-effort; its errors are logged by the
//! engine and never fail an operation.

use std::sync::Arc;

use thiserror::Error;

use trellis_core::{NodeId, NodeKind, NodeView};

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::MokaNodeCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisNodeCache;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization failed: {0}")]
    Serialization(String),
}

/// Cached views of one hierarchy, addressable by id and by code.
pub trait NodeCache<K: NodeKind>: Send + Sync {
    fn get(&self, id: NodeId<K>) -> Result<Option<NodeView<K>>, CacheError>;

    /// Look up by code. Implementations must not return a view whose code
    /// no longer matches.
    fn get_by_code(&self, code: &str) -> Result<Option<NodeView<K>>, CacheError>;

    fn put(&self, view: &NodeView<K>) -> Result<(), CacheError>;

    fn delete_by_id(&self, id: NodeId<K>) -> Result<(), CacheError>;
}

impl<K, C> NodeCache<K> for Arc<C>
where
    K: NodeKind,
    C: NodeCache<K> + ?Sized,
{
    fn get(&self, id: NodeId<K>) -> Result<Option<NodeView<K>>, CacheError> {
        (**self).get(id)
    }

    fn get_by_code(&self, code: &str) -> Result<Option<NodeView<K>>, CacheError> {
        (**self).get_by_code(code)
    }

    fn put(&self, view: &NodeView<K>) -> Result<(), CacheError> {
        (**self).put(view)
    }

    fn delete_by_id(&self, id: NodeId<K>) -> Result<(), CacheError> {
        (**self).delete_by_id(id)
    }
}

pub(crate) fn id_key(kind: &str, id: i64) -> String {
    format!("trellis:{kind}:id:{id}")
}

pub(crate) fn code_key(kind: &str, code: &str) -> String {
    format!("trellis:{kind}:code:{code}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_kind() {
        assert_eq!(id_key("role", 42), "trellis:role:id:42");
        assert_eq!(code_key("permission", "inventory.read"), "trellis:permission:code:inventory.read");
    }
}
