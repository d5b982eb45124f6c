//! Usage guards: who still references a node.
//!
//! Archiving, hard deletion and the deferred purge ask the guard first and
//! refuse while consumers remain.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use trellis_core::{NodeId, NodeKind};

/// An entity referencing a node (e.g. a role holding a permission).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Consumer {
    pub code: String,
    pub display_name: String,
}

impl Consumer {
    pub fn new(code: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("reference check failed: {0}")]
    Unavailable(String),
}

pub trait UsageGuard<K: NodeKind>: Send + Sync {
    fn find_consumers_of(&self, id: NodeId<K>) -> Result<Vec<Consumer>, GuardError>;
}

impl<K, G> UsageGuard<K> for Arc<G>
where
    K: NodeKind,
    G: UsageGuard<K> + ?Sized,
{
    fn find_consumers_of(&self, id: NodeId<K>) -> Result<Vec<Consumer>, GuardError> {
        (**self).find_consumers_of(id)
    }
}

/// Guard for hierarchies nothing else references.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConsumers;

impl<K: NodeKind> UsageGuard<K> for NoConsumers {
    fn find_consumers_of(&self, _id: NodeId<K>) -> Result<Vec<Consumer>, GuardError> {
        Ok(Vec::new())
    }
}

/// In-memory reference registry.
///
/// Consumers `attach` to the nodes they hold and `release` them when done.
/// Intended for tests/dev and single-process deployments.
#[derive(Debug)]
pub struct InMemoryReferenceRegistry<K: NodeKind> {
    references: RwLock<BTreeMap<NodeId<K>, BTreeSet<Consumer>>>,
}

impl<K: NodeKind> InMemoryReferenceRegistry<K> {
    pub fn new() -> Self {
        Self {
            references: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn attach(&self, id: NodeId<K>, consumer: Consumer) -> Result<(), GuardError> {
        let mut refs = self
            .references
            .write()
            .map_err(|_| GuardError::Unavailable("lock poisoned".to_string()))?;
        refs.entry(id).or_default().insert(consumer);
        Ok(())
    }

    /// Remove the consumer with `code` from `id`. Returns whether it was attached.
    pub fn release(&self, id: NodeId<K>, code: &str) -> Result<bool, GuardError> {
        let mut refs = self
            .references
            .write()
            .map_err(|_| GuardError::Unavailable("lock poisoned".to_string()))?;
        let Some(consumers) = refs.get_mut(&id) else {
            return Ok(false);
        };
        let before = consumers.len();
        consumers.retain(|c| c.code != code);
        let released = consumers.len() != before;
        if consumers.is_empty() {
            refs.remove(&id);
        }
        Ok(released)
    }
}

impl<K: NodeKind> Default for InMemoryReferenceRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: NodeKind> UsageGuard<K> for InMemoryReferenceRegistry<K> {
    fn find_consumers_of(&self, id: NodeId<K>) -> Result<Vec<Consumer>, GuardError> {
        let refs = self
            .references
            .read()
            .map_err(|_| GuardError::Unavailable("lock poisoned".to_string()))?;
        Ok(refs
            .get(&id)
            .map(|consumers| consumers.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    struct Feature;

    impl NodeKind for Feature {
        const NAME: &'static str = "feature";
    }

    #[test]
    fn attach_and_release() {
        let registry = InMemoryReferenceRegistry::<Feature>::new();
        let id = NodeId::new(5);
        registry.attach(id, Consumer::new("admin", "Administrator")).unwrap();
        registry.attach(id, Consumer::new("ops", "Operations")).unwrap();

        let codes: Vec<String> = registry
            .find_consumers_of(id)
            .unwrap()
            .into_iter()
            .map(|c| c.code)
            .collect();
        assert_eq!(codes, vec!["admin", "ops"]);

        assert!(registry.release(id, "admin").unwrap());
        assert!(!registry.release(id, "admin").unwrap());
        assert!(registry.release(id, "ops").unwrap());
        assert!(registry.find_consumers_of(id).unwrap().is_empty());
    }

    #[test]
    fn no_consumers_is_always_empty() {
        assert!(UsageGuard::<Feature>::find_consumers_of(&NoConsumers, NodeId::new(1))
            .unwrap()
            .is_empty());
    }
}
