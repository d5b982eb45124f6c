use std::time::Duration;

use moka::sync::Cache;

use trellis_core::{NodeId, NodeKind, NodeView};

use super::{CacheError, NodeCache};
use crate::config::HierarchyConfig;

/// In-process view cache backed by moka, with TTL and bounded capacity.
#[derive(Clone)]
pub struct MokaNodeCache<K: NodeKind> {
    by_id: Cache<NodeId<K>, NodeView<K>>,
    by_code: Cache<String, NodeId<K>>,
}

impl<K: NodeKind> MokaNodeCache<K> {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            by_id: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
            by_code: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    pub fn from_config(config: &HierarchyConfig) -> Self {
        Self::new(config.cache_ttl, config.cache_max_capacity)
    }
}

impl<K: NodeKind> std::fmt::Debug for MokaNodeCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaNodeCache")
            .field("kind", &K::NAME)
            .field("entries", &self.by_id.entry_count())
            .finish()
    }
}

impl<K: NodeKind> NodeCache<K> for MokaNodeCache<K> {
    fn get(&self, id: NodeId<K>) -> Result<Option<NodeView<K>>, CacheError> {
        Ok(self.by_id.get(&id))
    }

    fn get_by_code(&self, code: &str) -> Result<Option<NodeView<K>>, CacheError> {
        let Some(id) = self.by_code.get(code) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).filter(|view| view.node.code == code))
    }

    fn put(&self, view: &NodeView<K>) -> Result<(), CacheError> {
        self.by_code.insert(view.node.code.clone(), view.node.id);
        self.by_id.insert(view.node.id, view.clone());
        Ok(())
    }

    fn delete_by_id(&self, id: NodeId<K>) -> Result<(), CacheError> {
        if let Some(view) = self.by_id.remove(&id) {
            if self.by_code.get(&view.node.code) == Some(id) {
                self.by_code.invalidate(&view.node.code);
            }
        }
        Ok(())
    }
}
