//! Redis-backed view cache (optional, `redis` feature).
//!
//! Views are stored as JSON under `trellis:{kind}:id:{id}` with a TTL; a
//! second key `trellis:{kind}:code:{code}` maps codes to ids.

use std::marker::PhantomData;
use std::time::Duration;

use redis::Commands;

use trellis_core::{NodeId, NodeKind, NodeView};

use super::{CacheError, NodeCache, code_key, id_key};
use crate::config::HierarchyConfig;

#[derive(Debug, Clone)]
pub struct RedisNodeCache<K: NodeKind> {
    client: redis::Client,
    ttl_secs: u64,
    _kind: PhantomData<K>,
}

impl<K: NodeKind> RedisNodeCache<K> {
    pub fn new(redis_url: impl AsRef<str>, ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            ttl_secs: ttl.as_secs().max(1),
            _kind: PhantomData,
        })
    }

    /// Cache at `REDIS_URL` with the configured TTL.
    pub fn from_config(config: &HierarchyConfig) -> Result<Self, CacheError> {
        let url = config
            .redis_url
            .as_deref()
            .ok_or_else(|| CacheError::Backend("REDIS_URL is not set".to_string()))?;
        Self::new(url, config.cache_ttl)
    }

    fn connection(&self) -> Result<redis::Connection, CacheError> {
        self.client
            .get_connection()
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}

impl<K: NodeKind> NodeCache<K> for RedisNodeCache<K> {
    fn get(&self, id: NodeId<K>) -> Result<Option<NodeView<K>>, CacheError> {
        let mut conn = self.connection()?;
        let payload: Option<String> = conn
            .get(id_key(K::NAME, id.get()))
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(|e| CacheError::Serialization(e.to_string())))
            .transpose()
    }

    fn get_by_code(&self, code: &str) -> Result<Option<NodeView<K>>, CacheError> {
        let mut conn = self.connection()?;
        let id: Option<i64> = conn
            .get(code_key(K::NAME, code))
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let Some(id) = id else {
            return Ok(None);
        };
        Ok(self.get(NodeId::new(id))?.filter(|view| view.node.code == code))
    }

    fn put(&self, view: &NodeView<K>) -> Result<(), CacheError> {
        let payload =
            serde_json::to_string(view).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let mut conn = self.connection()?;
        let _: () = conn
            .set_ex(id_key(K::NAME, view.node.id.get()), payload, self.ttl_secs)
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let _: () = conn
            .set_ex(
                code_key(K::NAME, &view.node.code),
                view.node.id.get(),
                self.ttl_secs,
            )
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    fn delete_by_id(&self, id: NodeId<K>) -> Result<(), CacheError> {
        let cached = self.get(id)?;
        let mut conn = self.connection()?;
        let _: i64 = conn
            .del(id_key(K::NAME, id.get()))
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        if let Some(view) = cached {
            let _: i64 = conn
                .del(code_key(K::NAME, &view.node.code))
                .map_err(|e| CacheError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    struct Badge;

    impl NodeKind for Badge {
        const NAME: &'static str = "badge";
    }

    #[test]
    fn from_config_uses_url_and_ttl() {
        let err = RedisNodeCache::<Badge>::from_config(&HierarchyConfig::default()).unwrap_err();
        assert_eq!(err, CacheError::Backend("REDIS_URL is not set".into()));

        let config = HierarchyConfig {
            redis_url: Some("redis://127.0.0.1:6379".into()),
            cache_ttl: Duration::from_secs(90),
            ..HierarchyConfig::default()
        };
        let cache = RedisNodeCache::<Badge>::from_config(&config).unwrap();
        assert_eq!(cache.ttl_secs, 90);
    }
}
