//! The hierarchy engine.
//!
//! One generic engine serves every node kind. It composes:
//!
//! - a transactional [`HierarchyStore`] (node rows + closure rows)
//! - a best-effort [`NodeCache`] of resolved views
//! - a [`UsageGuard`] consulted before archive, purge and hard delete
//! - a [`PurgeScheduler`] for the delayed removal of archived nodes
//! - an [`IdGenerator`] for nodes registered without an id
//!
//! ```text
//! operation
//!   ↓
//! 1. begin store transaction
//!   ↓
//! 2. validate against rows read inside the transaction
//!   ↓
//! 3. write node / closure rows
//!   ↓
//! 4. commit (any error before this point rolls everything back)
//!   ↓
//! 5. invalidate cache entries of the touched ids
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, instrument, warn};

use trellis_core::closure::{link_candidates, plan_link, reconcile};
use trellis_core::{
    HierarchyError, HierarchyResult, IdGenerator, NewNode, Node, NodeId, NodeKind, Path, StoreError,
};

use crate::cache::{MokaNodeCache, NodeCache};
use crate::config::HierarchyConfig;
use crate::guard::{GuardError, NoConsumers, UsageGuard};
use crate::ids::SnowflakeIdGenerator;
use crate::jobs::PurgeScheduler;
use crate::store::{HierarchyStore, NodeStore, PathStore, Transaction};

mod lifecycle;
mod query;

pub use lifecycle::PurgeOutcome;

/// Generic hierarchy engine for node kind `K` over store `S`.
pub struct Hierarchy<K: NodeKind, S: HierarchyStore<K>> {
    store: S,
    cache: Arc<dyn NodeCache<K>>,
    guard: Arc<dyn UsageGuard<K>>,
    scheduler: Arc<dyn PurgeScheduler>,
    ids: Arc<dyn IdGenerator>,
    config: HierarchyConfig,
    /// Bumped before every post-commit invalidation.
    writes: AtomicU64,
}

impl<K: NodeKind, S: HierarchyStore<K>> fmt::Debug for Hierarchy<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hierarchy")
            .field("kind", &K::NAME)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Hierarchy`].
///
/// Only the store and the purge scheduler are required. Defaults: an
/// in-process moka cache sized from the config, no consumers, and a
/// Snowflake generator using the configured worker id.
pub struct HierarchyBuilder<K: NodeKind, S: HierarchyStore<K>> {
    store: S,
    scheduler: Arc<dyn PurgeScheduler>,
    cache: Option<Arc<dyn NodeCache<K>>>,
    guard: Option<Arc<dyn UsageGuard<K>>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: HierarchyConfig,
}

impl<K: NodeKind, S: HierarchyStore<K>> HierarchyBuilder<K, S> {
    pub fn config(mut self, config: HierarchyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn NodeCache<K>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn guard(mut self, guard: Arc<dyn UsageGuard<K>>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Hierarchy<K, S> {
        let config = self.config;
        let cache: Arc<dyn NodeCache<K>> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(MokaNodeCache::<K>::from_config(&config)),
        };
        let guard: Arc<dyn UsageGuard<K>> = match self.guard {
            Some(guard) => guard,
            None => Arc::new(NoConsumers),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(SnowflakeIdGenerator::new(config.worker_id)),
        };
        Hierarchy {
            store: self.store,
            cache,
            guard,
            scheduler: self.scheduler,
            ids,
            config,
            writes: AtomicU64::new(0),
        }
    }
}

impl<K: NodeKind, S: HierarchyStore<K>> Hierarchy<K, S> {
    pub fn builder(store: S, scheduler: Arc<dyn PurgeScheduler>) -> HierarchyBuilder<K, S> {
        HierarchyBuilder {
            store,
            scheduler,
            cache: None,
            guard: None,
            ids: None,
            config: HierarchyConfig::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// Register a node with its depth-0 self row.
    ///
    /// A missing id is taken from the id generator. Id and code must be free
    /// among active and archived nodes.
    #[instrument(skip(self, new), fields(kind = K::NAME, code = %new.code), err)]
    pub fn add_node(&self, new: NewNode<K>) -> HierarchyResult<Node<K>> {
        new.validate()?;
        let id = new.id.unwrap_or_else(|| NodeId::new(self.ids.next_id()));
        let node = new.into_node(id);

        let mut tx = self.store.begin()?;
        if tx.id_exists(id)? {
            return Err(HierarchyError::conflict::<K>(format!("id {id}")));
        }
        if tx.code_owner(&node.code)?.is_some() {
            return Err(HierarchyError::conflict::<K>(format!("code '{}'", node.code)));
        }
        tx.insert_node(&node).map_err(conflict_on_constraint::<K>)?;
        tx.insert_paths(&[Path::self_path(id)])?;
        tx.commit().map_err(conflict_on_constraint::<K>)?;

        self.invalidate(&[id]);
        debug!(kind = K::NAME, id = id.get(), "node added");
        Ok(node)
    }

    /// Overwrite name, description and extensions of an active node.
    ///
    /// The code may change if no other node holds the new one.
    #[instrument(skip(self, node), fields(kind = K::NAME, id = node.id.get()), err)]
    pub fn update_by_id(&self, node: Node<K>) -> HierarchyResult<Node<K>> {
        node.validate()?;

        let mut tx = self.store.begin()?;
        let Some(current) = tx.find_node(node.id)? else {
            return Err(HierarchyError::not_found::<K>(node.id.to_string()));
        };
        if current.code != node.code {
            if let Some(owner) = tx.code_owner(&node.code)? {
                if owner != node.id {
                    return Err(HierarchyError::conflict::<K>(format!("code '{}'", node.code)));
                }
            }
        }
        if !tx.update_node(&node)? {
            return Err(HierarchyError::not_found::<K>(node.id.to_string()));
        }
        tx.commit().map_err(conflict_on_constraint::<K>)?;

        self.invalidate(&[node.id]);
        Ok(node)
    }

    /// Make `ancestor` an ancestor of `descendant`.
    ///
    /// Every ancestor of `ancestor` becomes an ancestor of every descendant
    /// of `descendant`, each pair at its minimal depth.
    #[instrument(
        skip(self),
        fields(kind = K::NAME, descendant = descendant.get(), ancestor = ancestor.get()),
        err
    )]
    pub fn add_ancestor_edge(&self, descendant: NodeId<K>, ancestor: NodeId<K>) -> HierarchyResult<()> {
        let mut tx = self.store.begin()?;
        for id in [descendant, ancestor] {
            if tx.find_node(id)?.is_none() {
                return Err(HierarchyError::not_found::<K>(id.to_string()));
            }
        }

        let upper = tx.ancestors_of(ancestor)?;
        if upper.iter().any(|p| p.ancestor == descendant) {
            return Err(HierarchyError::cycle::<K>(ancestor.get(), descendant.get()));
        }
        if tx.find_path(ancestor, descendant)?.is_some_and(|p| p.is_direct()) {
            return Err(HierarchyError::duplicate_path::<K>(ancestor.get(), descendant.get()));
        }

        let lower = tx.descendants_of(descendant)?;
        let uppers: Vec<NodeId<K>> = upper.iter().map(|p| p.ancestor).collect();
        let lowers: Vec<NodeId<K>> = lower.iter().map(|p| p.descendant).collect();
        let existing = tx.paths_between(&uppers, &lowers)?;
        let plan = plan_link(link_candidates(&upper, &lower), &existing);

        tx.insert_paths(&plan.insert)?;
        tx.update_depths(&plan.shorten)?;
        tx.commit()?;

        debug!(
            kind = K::NAME,
            inserted = plan.insert.len(),
            shortened = plan.shorten.len(),
            "ancestor edge added"
        );
        self.invalidate(&[ancestor, descendant]);
        Ok(())
    }

    /// Re-derive the closure from the remaining direct edges and fix the
    /// stored rows to match.
    fn prune<T>(tx: &mut T) -> HierarchyResult<()>
    where
        T: PathStore<K>,
    {
        let fix = reconcile(&tx.all_paths()?);
        if fix.is_empty() {
            return Ok(());
        }
        tx.delete_paths(&fix.stale)?;
        tx.insert_paths(&fix.missing)?;
        tx.update_depths(&fix.redepth)?;
        debug!(
            kind = K::NAME,
            stale = fix.stale.len(),
            missing = fix.missing.len(),
            redepth = fix.redepth.len(),
            "closure reconciled"
        );
        Ok(())
    }

    /// Codes of the consumers still referencing `id`.
    fn consumers_of(&self, id: NodeId<K>) -> HierarchyResult<Vec<String>> {
        let consumers = self.guard.find_consumers_of(id).map_err(guard_unavailable)?;
        Ok(consumers.into_iter().map(|c| c.code).collect())
    }

    /// Drop cached views of `ids`. Only called after a commit.
    fn invalidate(&self, ids: &[NodeId<K>]) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        for &id in ids {
            self.evict(id);
        }
    }

    fn evict(&self, id: NodeId<K>) {
        if let Err(e) = self.cache.delete_by_id(id) {
            warn!(kind = K::NAME, id = id.get(), error = %e, "cache invalidation failed");
        }
    }

    fn write_generation(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

fn conflict_on_constraint<K: NodeKind>(err: StoreError) -> HierarchyError {
    match err {
        StoreError::Constraint(detail) => HierarchyError::conflict::<K>(detail),
        other => other.into(),
    }
}

fn guard_unavailable(err: GuardError) -> HierarchyError {
    StoreError::Unavailable(err.to_string()).into()
}

impl<K, S> trellis_auth::HierarchyView<K> for Hierarchy<K, S>
where
    K: NodeKind,
    S: HierarchyStore<K>,
{
    type Error = HierarchyError;

    fn id_by_code(&self, code: &str) -> Result<Option<NodeId<K>>, Self::Error> {
        match self.find_by_code(code) {
            Ok(view) => Ok(Some(view.node.id)),
            Err(HierarchyError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn descendant_ids(&self, ids: &[NodeId<K>]) -> Result<Vec<NodeId<K>>, Self::Error> {
        self.find_descendant_ids(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequenceIdGenerator;
    use crate::jobs::{InMemoryJobStore, JobQueueScheduler};
    use crate::store::InMemoryHierarchyStore;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    struct Unit;

    impl NodeKind for Unit {
        const NAME: &'static str = "unit";
    }

    fn engine() -> Hierarchy<Unit, InMemoryHierarchyStore<Unit>> {
        Hierarchy::builder(
            InMemoryHierarchyStore::new(),
            Arc::new(JobQueueScheduler::new(InMemoryJobStore::arc())),
        )
        .id_generator(Arc::new(SequenceIdGenerator::starting_at(100)))
        .build()
    }

    fn paths(h: &Hierarchy<Unit, InMemoryHierarchyStore<Unit>>) -> Vec<(i64, i64, u32)> {
        let mut tx = h.store().begin().unwrap();
        tx.all_paths()
            .unwrap()
            .into_iter()
            .map(|p| (p.ancestor.get(), p.descendant.get(), p.depth))
            .collect()
    }

    #[test]
    fn generated_ids_are_used_when_absent() {
        let h = engine();
        let a = h.add_node(NewNode::new("a", "A")).unwrap();
        let b = h.add_node(NewNode::new("b", "B").with_id(7)).unwrap();
        assert_eq!(a.id.get(), 100);
        assert_eq!(b.id.get(), 7);
        assert_eq!(paths(&h), vec![(7, 7, 0), (100, 100, 0)]);
    }

    #[test]
    fn duplicate_id_or_code_conflicts() {
        let h = engine();
        h.add_node(NewNode::new("a", "A").with_id(1)).unwrap();

        let err = h.add_node(NewNode::new("other", "O").with_id(1)).unwrap_err();
        assert!(matches!(err, HierarchyError::Conflict { .. }));
        let err = h.add_node(NewNode::new("a", "Again")).unwrap_err();
        assert!(matches!(err, HierarchyError::Conflict { .. }));
    }

    #[test]
    fn invalid_nodes_are_rejected() {
        let h = engine();
        let err = h.add_node(NewNode::new("", "Nameless")).unwrap_err();
        assert!(matches!(err, HierarchyError::Validation(_)));
    }

    #[test]
    fn linking_a_missing_node_is_not_found() {
        let h = engine();
        h.add_node(NewNode::new("a", "A").with_id(1)).unwrap();
        let err = h.add_ancestor_edge(NodeId::new(2), NodeId::new(1)).unwrap_err();
        assert!(matches!(err, HierarchyError::NotFound { .. }));
    }

    #[test]
    fn linking_joins_both_subtrees() {
        let h = engine();
        for (id, code) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            h.add_node(NewNode::new(code, code).with_id(id)).unwrap();
        }
        h.add_ancestor_edge(NodeId::new(2), NodeId::new(1)).unwrap();
        h.add_ancestor_edge(NodeId::new(4), NodeId::new(3)).unwrap();
        h.add_ancestor_edge(NodeId::new(3), NodeId::new(2)).unwrap();

        let rows = paths(&h);
        assert!(rows.contains(&(1, 4, 3)));
        assert!(rows.contains(&(2, 4, 2)));
        assert!(rows.contains(&(1, 3, 2)));
        assert_eq!(rows.len(), 4 + 6);
    }

    #[test]
    fn reverse_edge_is_a_cycle() {
        let h = engine();
        h.add_node(NewNode::new("a", "A").with_id(1)).unwrap();
        h.add_node(NewNode::new("b", "B").with_id(2)).unwrap();
        h.add_ancestor_edge(NodeId::new(2), NodeId::new(1)).unwrap();

        let err = h.add_ancestor_edge(NodeId::new(1), NodeId::new(2)).unwrap_err();
        assert!(matches!(err, HierarchyError::Cycle { ancestor: 2, descendant: 1, .. }));
    }

    #[test]
    fn update_changes_attributes_and_checks_code() {
        let h = engine();
        let mut a = h.add_node(NewNode::new("a", "A").with_id(1)).unwrap();
        h.add_node(NewNode::new("b", "B").with_id(2)).unwrap();
        h.find_by_id(NodeId::new(1)).unwrap();

        a.name = "Renamed".to_string();
        h.update_by_id(a.clone()).unwrap();
        assert_eq!(h.find_by_id(NodeId::new(1)).unwrap().node.name, "Renamed");

        a.code = "b".to_string();
        let err = h.update_by_id(a).unwrap_err();
        assert!(matches!(err, HierarchyError::Conflict { .. }));

        let ghost = NewNode::new("ghost", "G").into_node(NodeId::new(9));
        assert!(matches!(h.update_by_id(ghost), Err(HierarchyError::NotFound { .. })));
    }
}
