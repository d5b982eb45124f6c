//! Read operations.
//!
//! Single-node lookups go through the cache (read-through). Listings read
//! the store directly and derive `has_descendant` in one batch.

use std::collections::BTreeSet;

use tracing::{debug, instrument, warn};

use trellis_core::{
    HierarchyError, HierarchyResult, Node, NodeFilter, NodeId, NodeKind, NodeView, Page, Pagination, Slice,
};

use super::Hierarchy;
use crate::store::{HierarchyStore, Lifecycle, NodeStore, PathStore};

impl<K: NodeKind, S: HierarchyStore<K>> Hierarchy<K, S> {
    /// Active node by id.
    #[instrument(skip(self), fields(kind = K::NAME, id = id.get()))]
    pub fn find_by_id(&self, id: NodeId<K>) -> HierarchyResult<NodeView<K>> {
        match self.cache.get(id) {
            Ok(Some(view)) => {
                debug!(kind = K::NAME, id = id.get(), "cache hit");
                return Ok(view);
            }
            Ok(None) => debug!(kind = K::NAME, id = id.get(), "cache miss"),
            Err(e) => warn!(kind = K::NAME, id = id.get(), error = %e, "cache read failed"),
        }

        let seen = self.write_generation();
        let view = {
            let mut tx = self.store.begin()?;
            let node = tx
                .find_node(id)?
                .ok_or_else(|| HierarchyError::not_found::<K>(id.to_string()))?;
            Self::view_of(&mut tx, node)?
        };
        self.fill(&view, seen);
        Ok(view)
    }

    /// Active node by code.
    #[instrument(skip(self), fields(kind = K::NAME))]
    pub fn find_by_code(&self, code: &str) -> HierarchyResult<NodeView<K>> {
        match self.cache.get_by_code(code) {
            Ok(Some(view)) => {
                debug!(kind = K::NAME, code, "cache hit");
                return Ok(view);
            }
            Ok(None) => debug!(kind = K::NAME, code, "cache miss"),
            Err(e) => warn!(kind = K::NAME, code, error = %e, "cache read failed"),
        }

        let seen = self.write_generation();
        let view = {
            let mut tx = self.store.begin()?;
            let node = tx
                .find_node_by_code(code)?
                .ok_or_else(|| HierarchyError::not_found::<K>(format!("code '{code}'")))?;
            Self::view_of(&mut tx, node)?
        };
        self.fill(&view, seen);
        Ok(view)
    }

    /// Active nodes matching `filter`, ordered by id, with the total count.
    #[instrument(skip(self), fields(kind = K::NAME))]
    pub fn find_all(&self, filter: &NodeFilter, pagination: Pagination) -> HierarchyResult<Page<NodeView<K>>> {
        self.page_of(Lifecycle::Active, filter, pagination)
    }

    /// Like [`find_all`](Self::find_all) without counting; reports whether
    /// another slice follows.
    #[instrument(skip(self), fields(kind = K::NAME))]
    pub fn find_all_slice(&self, filter: &NodeFilter, pagination: Pagination) -> HierarchyResult<Slice<NodeView<K>>> {
        self.slice_of(Lifecycle::Active, filter, pagination)
    }

    /// Archived nodes matching `filter`, ordered by id.
    #[instrument(skip(self), fields(kind = K::NAME))]
    pub fn find_archived(&self, filter: &NodeFilter, pagination: Pagination) -> HierarchyResult<Page<NodeView<K>>> {
        self.page_of(Lifecycle::Archived, filter, pagination)
    }

    #[instrument(skip(self), fields(kind = K::NAME))]
    pub fn find_archived_slice(
        &self,
        filter: &NodeFilter,
        pagination: Pagination,
    ) -> HierarchyResult<Slice<NodeView<K>>> {
        self.slice_of(Lifecycle::Archived, filter, pagination)
    }

    /// Active nodes that are nobody's descendant, ordered by id.
    #[instrument(skip(self), fields(kind = K::NAME))]
    pub fn find_root_nodes(&self, pagination: Pagination) -> HierarchyResult<Page<NodeView<K>>> {
        let (ids, total) = {
            let mut tx = self.store.begin()?;
            (tx.root_ids(pagination)?, tx.count_roots()?)
        };
        Ok(Page::new(self.resolve(ids)?, total, pagination))
    }

    /// Active nodes exactly one edge below `ancestor`, ordered by id.
    #[instrument(skip(self), fields(kind = K::NAME, ancestor = ancestor.get()))]
    pub fn find_direct_descendants(
        &self,
        ancestor: NodeId<K>,
        pagination: Pagination,
    ) -> HierarchyResult<Page<NodeView<K>>> {
        let (ids, total) = {
            let mut tx = self.store.begin()?;
            if tx.find_node(ancestor)?.is_none() {
                return Err(HierarchyError::not_found::<K>(ancestor.to_string()));
            }
            (
                tx.direct_descendant_ids(ancestor, pagination)?,
                tx.count_direct_descendants(ancestor)?,
            )
        };
        Ok(Page::new(self.resolve(ids)?, total, pagination))
    }

    /// Active nodes reachable from any of `ids` through at least one edge.
    #[instrument(skip(self, ids), fields(kind = K::NAME, sources = ids.len()))]
    pub fn find_descendant_ids(&self, ids: &[NodeId<K>]) -> HierarchyResult<Vec<NodeId<K>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.store.begin()?;
        let reachable = tx.descendant_ids(ids)?;
        Ok(tx.find_nodes(&reachable)?.into_iter().map(|n| n.id).collect())
    }

    /// The subset of `ids` with at least one descendant.
    #[instrument(skip(self, ids), fields(kind = K::NAME, candidates = ids.len()))]
    pub fn find_ancestors_with_descendants(&self, ids: &[NodeId<K>]) -> HierarchyResult<Vec<NodeId<K>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.store.begin()?;
        Ok(tx.ancestors_with_descendants(ids)?)
    }

    fn page_of(
        &self,
        lifecycle: Lifecycle,
        filter: &NodeFilter,
        pagination: Pagination,
    ) -> HierarchyResult<Page<NodeView<K>>> {
        let mut tx = self.store.begin()?;
        let nodes = tx.list_nodes(lifecycle, filter, pagination)?;
        let total = tx.count_nodes(lifecycle, filter)?;
        let views = Self::views_of(&mut tx, nodes)?;
        Ok(Page::new(views, total, pagination))
    }

    fn slice_of(
        &self,
        lifecycle: Lifecycle,
        filter: &NodeFilter,
        pagination: Pagination,
    ) -> HierarchyResult<Slice<NodeView<K>>> {
        let mut tx = self.store.begin()?;
        let nodes = tx.list_nodes(lifecycle, filter, pagination.look_ahead())?;
        let views = Self::views_of(&mut tx, nodes)?;
        Ok(Slice::from_look_ahead(views, pagination))
    }

    /// Resolve ids through the cache, skipping nodes deleted in the meantime.
    ///
    /// Callers must not hold a transaction.
    fn resolve(&self, ids: Vec<NodeId<K>>) -> HierarchyResult<Vec<NodeView<K>>> {
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            match self.find_by_id(id) {
                Ok(view) => views.push(view),
                Err(HierarchyError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(views)
    }

    /// Cache a view read at write generation `seen`. A write that committed
    /// meanwhile may have invalidated before the put landed, so the entry is
    /// dropped again when the generation moved.
    fn fill(&self, view: &NodeView<K>, seen: u64) {
        if let Err(e) = self.cache.put(view) {
            warn!(kind = K::NAME, id = view.node.id.get(), error = %e, "cache fill failed");
            return;
        }
        if self.write_generation() != seen {
            debug!(kind = K::NAME, id = view.node.id.get(), "write raced cache fill");
            self.evict(view.node.id);
        }
    }

    fn view_of<T>(tx: &mut T, node: Node<K>) -> HierarchyResult<NodeView<K>>
    where
        T: PathStore<K>,
    {
        let has_descendant = !tx.ancestors_with_descendants(&[node.id])?.is_empty();
        Ok(NodeView { node, has_descendant })
    }

    fn views_of<T>(tx: &mut T, nodes: Vec<Node<K>>) -> HierarchyResult<Vec<NodeView<K>>>
    where
        T: PathStore<K>,
    {
        let ids: Vec<NodeId<K>> = nodes.iter().map(|n| n.id).collect();
        let parents: BTreeSet<NodeId<K>> = tx.ancestors_with_descendants(&ids)?.into_iter().collect();
        Ok(nodes
            .into_iter()
            .map(|node| {
                let has_descendant = parents.contains(&node.id);
                NodeView { node, has_descendant }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::jobs::{InMemoryJobStore, JobQueueScheduler};
    use crate::store::InMemoryHierarchyStore;
    use trellis_core::NewNode;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    struct Scope;

    impl NodeKind for Scope {
        const NAME: &'static str = "scope";
    }

    fn engine_with(codes: &[(i64, &str)]) -> Hierarchy<Scope, InMemoryHierarchyStore<Scope>> {
        let h = Hierarchy::builder(
            InMemoryHierarchyStore::new(),
            Arc::new(JobQueueScheduler::new(InMemoryJobStore::arc())),
        )
        .build();
        for &(id, code) in codes {
            h.add_node(NewNode::new(code, code.to_uppercase()).with_id(id)).unwrap();
        }
        h
    }

    fn id(raw: i64) -> NodeId<Scope> {
        NodeId::new(raw)
    }

    #[test]
    fn has_descendant_is_invalidated_by_new_edges() {
        let h = engine_with(&[(1, "parent"), (2, "child")]);
        assert!(!h.find_by_id(id(1)).unwrap().has_descendant);

        h.add_ancestor_edge(id(2), id(1)).unwrap();
        assert!(h.find_by_id(id(1)).unwrap().has_descendant);
        assert!(h.find_by_code("parent").unwrap().has_descendant);
        assert!(!h.find_by_code("child").unwrap().has_descendant);
    }

    #[test]
    fn unknown_lookups_are_not_found() {
        let h = engine_with(&[]);
        assert!(matches!(h.find_by_id(id(1)), Err(HierarchyError::NotFound { .. })));
        assert!(matches!(h.find_by_code("nope"), Err(HierarchyError::NotFound { .. })));
        assert!(matches!(
            h.find_direct_descendants(id(1), Pagination::default()),
            Err(HierarchyError::NotFound { .. })
        ));
    }

    #[test]
    fn listings_filter_and_page() {
        let h = engine_with(&[(1, "inventory.read"), (2, "inventory.write"), (3, "sales.read"), (4, "sales.write")]);
        h.add_ancestor_edge(id(1), id(2)).unwrap();

        let page = h
            .find_all(&NodeFilter::by_code("inventory"), Pagination::new(Some(1), None))
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.has_more);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].node.code, "inventory.read");

        let all = h.find_all(&NodeFilter::default(), Pagination::default()).unwrap();
        let flags: Vec<bool> = all.items.iter().map(|v| v.has_descendant).collect();
        assert_eq!(flags, vec![false, true, false, false]);

        let slice = h
            .find_all_slice(&NodeFilter::by_name("READ"), Pagination::new(Some(1), Some(1)))
            .unwrap();
        assert_eq!(slice.items[0].node.code, "sales.read");
        assert!(!slice.has_next);
    }

    #[test]
    fn roots_and_direct_descendants_page_by_id() {
        let h = engine_with(&[(1, "a"), (2, "b"), (3, "c"), (4, "d")]);
        h.add_ancestor_edge(id(2), id(1)).unwrap();
        h.add_ancestor_edge(id(3), id(1)).unwrap();
        h.add_ancestor_edge(id(4), id(3)).unwrap();

        let roots = h.find_root_nodes(Pagination::default()).unwrap();
        assert_eq!(roots.total, 1);
        assert_eq!(roots.items[0].node.id, id(1));

        let first = h.find_direct_descendants(id(1), Pagination::new(Some(1), None)).unwrap();
        assert_eq!(first.total, 2);
        assert_eq!(first.items[0].node.id, id(2));
        let second = h
            .find_direct_descendants(id(1), Pagination::new(Some(1), Some(1)))
            .unwrap();
        assert_eq!(second.items[0].node.id, id(3));
        assert!(!second.has_more);
    }

    #[test]
    fn descendant_ids_span_every_depth() {
        let h = engine_with(&[(1, "a"), (2, "b"), (3, "c"), (4, "d")]);
        h.add_ancestor_edge(id(2), id(1)).unwrap();
        h.add_ancestor_edge(id(3), id(2)).unwrap();

        assert_eq!(h.find_descendant_ids(&[id(1)]).unwrap(), vec![id(2), id(3)]);
        assert_eq!(h.find_descendant_ids(&[id(2), id(4)]).unwrap(), vec![id(3)]);
        assert_eq!(
            h.find_ancestors_with_descendants(&[id(1), id(2), id(3), id(4)]).unwrap(),
            vec![id(1), id(2)]
        );
    }

    #[test]
    fn fills_raced_by_a_write_are_dropped() {
        let h = engine_with(&[(1, "parent"), (2, "child")]);

        let seen = h.write_generation();
        let before = {
            let mut tx = h.store().begin().unwrap();
            let node = tx.find_node(id(1)).unwrap().unwrap();
            Hierarchy::<Scope, InMemoryHierarchyStore<Scope>>::view_of(&mut tx, node).unwrap()
        };
        assert!(!before.has_descendant);

        h.add_ancestor_edge(id(2), id(1)).unwrap();
        h.fill(&before, seen);

        assert!(h.find_by_id(id(1)).unwrap().has_descendant);
        assert!(h.find_by_code("parent").unwrap().has_descendant);
    }
}
