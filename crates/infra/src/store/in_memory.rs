use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use trellis_core::{Node, NodeFilter, NodeId, NodeKind, Pagination, Path, StoreError};

use super::r#trait::{HierarchyStore, Lifecycle, NodeStore, PathStore, Transaction};

#[derive(Debug, Clone, Default)]
struct State<K: NodeKind> {
    active: BTreeMap<NodeId<K>, Node<K>>,
    archived: BTreeMap<NodeId<K>, Node<K>>,
    /// `(ancestor, descendant)` → depth.
    paths: BTreeMap<(NodeId<K>, NodeId<K>), u32>,
}

impl<K: NodeKind> State<K> {
    fn table(&self, lifecycle: Lifecycle) -> &BTreeMap<NodeId<K>, Node<K>> {
        match lifecycle {
            Lifecycle::Active => &self.active,
            Lifecycle::Archived => &self.archived,
        }
    }

    fn rows(&self) -> impl Iterator<Item = Path<K>> + '_ {
        self.paths
            .iter()
            .map(|(&(a, d), &depth)| Path::new(a, d, depth))
    }
}

/// In-memory hierarchy store.
///
/// Intended for tests/dev. Transactions are serialized by a single mutex and
/// stage their writes on a private copy of the state.
#[derive(Debug)]
pub struct InMemoryHierarchyStore<K: NodeKind> {
    state: Mutex<State<K>>,
}

impl<K: NodeKind> InMemoryHierarchyStore<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl<K: NodeKind> Default for InMemoryHierarchyStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: NodeKind> HierarchyStore<K> for InMemoryHierarchyStore<K> {
    type Tx<'a>
        = InMemoryTx<'a, K>
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        let guard = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(InMemoryTx {
            guard,
            staged: None,
        })
    }
}

/// Transaction over [`InMemoryHierarchyStore`].
///
/// Reads see the staged copy once a write happened; `commit` swaps it in.
pub struct InMemoryTx<'a, K: NodeKind> {
    guard: MutexGuard<'a, State<K>>,
    staged: Option<State<K>>,
}

impl<K: NodeKind> InMemoryTx<'_, K> {
    fn state(&self) -> &State<K> {
        self.staged.as_ref().unwrap_or(&*self.guard)
    }

    fn state_mut(&mut self) -> &mut State<K> {
        let committed = &self.guard;
        self.staged.get_or_insert_with(|| (**committed).clone())
    }
}

impl<K: NodeKind> Transaction for InMemoryTx<'_, K> {
    fn commit(mut self) -> Result<(), StoreError> {
        if let Some(staged) = self.staged.take() {
            *self.guard = staged;
        }
        Ok(())
    }
}

fn page<T>(items: impl Iterator<Item = T>, pagination: Pagination) -> Vec<T> {
    items
        .skip(pagination.start())
        .take(pagination.limit as usize)
        .collect()
}

impl<K: NodeKind> NodeStore<K> for InMemoryTx<'_, K> {
    fn insert_node(&mut self, node: &Node<K>) -> Result<(), StoreError> {
        let state = self.state_mut();
        if state.active.contains_key(&node.id) || state.archived.contains_key(&node.id) {
            return Err(StoreError::Constraint(format!(
                "{} id {} already exists",
                K::NAME,
                node.id
            )));
        }
        if state
            .active
            .values()
            .chain(state.archived.values())
            .any(|n| n.code == node.code)
        {
            return Err(StoreError::Constraint(format!(
                "{} code '{}' already exists",
                K::NAME,
                node.code
            )));
        }
        state.active.insert(node.id, node.clone());
        Ok(())
    }

    fn update_node(&mut self, node: &Node<K>) -> Result<bool, StoreError> {
        if !self.state().active.contains_key(&node.id) {
            return Ok(false);
        }
        self.state_mut().active.insert(node.id, node.clone());
        Ok(true)
    }

    fn find_node(&mut self, id: NodeId<K>) -> Result<Option<Node<K>>, StoreError> {
        Ok(self.state().active.get(&id).cloned())
    }

    fn find_node_by_code(&mut self, code: &str) -> Result<Option<Node<K>>, StoreError> {
        Ok(self
            .state()
            .active
            .values()
            .find(|n| n.code == code)
            .cloned())
    }

    fn find_nodes(&mut self, ids: &[NodeId<K>]) -> Result<Vec<Node<K>>, StoreError> {
        let wanted: BTreeSet<NodeId<K>> = ids.iter().copied().collect();
        let active = &self.state().active;
        Ok(wanted
            .into_iter()
            .filter_map(|id| active.get(&id).cloned())
            .collect())
    }

    fn find_archived_node(&mut self, id: NodeId<K>) -> Result<Option<Node<K>>, StoreError> {
        Ok(self.state().archived.get(&id).cloned())
    }

    fn id_exists(&mut self, id: NodeId<K>) -> Result<bool, StoreError> {
        let state = self.state();
        Ok(state.active.contains_key(&id) || state.archived.contains_key(&id))
    }

    fn code_owner(&mut self, code: &str) -> Result<Option<NodeId<K>>, StoreError> {
        let state = self.state();
        Ok(state
            .active
            .values()
            .chain(state.archived.values())
            .find(|n| n.code == code)
            .map(|n| n.id))
    }

    fn list_nodes(
        &mut self,
        lifecycle: Lifecycle,
        filter: &NodeFilter,
        pagination: Pagination,
    ) -> Result<Vec<Node<K>>, StoreError> {
        let table = self.state().table(lifecycle);
        Ok(page(
            table.values().filter(|n| filter.matches(n)).cloned(),
            pagination,
        ))
    }

    fn count_nodes(&mut self, lifecycle: Lifecycle, filter: &NodeFilter) -> Result<u64, StoreError> {
        let table = self.state().table(lifecycle);
        Ok(table.values().filter(|n| filter.matches(n)).count() as u64)
    }

    fn delete_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError> {
        if !self.state().active.contains_key(&id) {
            return Ok(false);
        }
        Ok(self.state_mut().active.remove(&id).is_some())
    }

    fn archive_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError> {
        if !self.state().active.contains_key(&id) {
            return Ok(false);
        }
        let state = self.state_mut();
        match state.active.remove(&id) {
            Some(node) => {
                state.archived.insert(id, node);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn restore_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError> {
        if !self.state().archived.contains_key(&id) {
            return Ok(false);
        }
        let state = self.state_mut();
        match state.archived.remove(&id) {
            Some(node) => {
                state.active.insert(id, node);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_archived_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError> {
        if !self.state().archived.contains_key(&id) {
            return Ok(false);
        }
        Ok(self.state_mut().archived.remove(&id).is_some())
    }
}

impl<K: NodeKind> PathStore<K> for InMemoryTx<'_, K> {
    fn insert_paths(&mut self, paths: &[Path<K>]) -> Result<(), StoreError> {
        if paths.is_empty() {
            return Ok(());
        }
        let state = self.state_mut();
        for p in paths {
            if state.paths.contains_key(&p.pair()) {
                return Err(StoreError::Constraint(format!(
                    "{} path {} -> {} already exists",
                    K::NAME,
                    p.ancestor,
                    p.descendant
                )));
            }
            state.paths.insert(p.pair(), p.depth);
        }
        Ok(())
    }

    fn update_depths(&mut self, paths: &[Path<K>]) -> Result<(), StoreError> {
        if paths.is_empty() {
            return Ok(());
        }
        let state = self.state_mut();
        for p in paths {
            if let Some(depth) = state.paths.get_mut(&p.pair()) {
                *depth = p.depth;
            }
        }
        Ok(())
    }

    fn delete_paths(&mut self, paths: &[Path<K>]) -> Result<u64, StoreError> {
        if paths.is_empty() {
            return Ok(0);
        }
        let state = self.state_mut();
        Ok(paths
            .iter()
            .filter(|p| state.paths.remove(&p.pair()).is_some())
            .count() as u64)
    }

    fn delete_paths_of(&mut self, id: NodeId<K>) -> Result<u64, StoreError> {
        let touching = self
            .state()
            .paths
            .keys()
            .any(|&(a, d)| a == id || d == id);
        if !touching {
            return Ok(0);
        }
        let state = self.state_mut();
        let before = state.paths.len();
        state.paths.retain(|&(a, d), _| a != id && d != id);
        Ok((before - state.paths.len()) as u64)
    }

    fn find_path(
        &mut self,
        ancestor: NodeId<K>,
        descendant: NodeId<K>,
    ) -> Result<Option<Path<K>>, StoreError> {
        Ok(self
            .state()
            .paths
            .get(&(ancestor, descendant))
            .map(|&depth| Path::new(ancestor, descendant, depth)))
    }

    fn ancestors_of(&mut self, id: NodeId<K>) -> Result<Vec<Path<K>>, StoreError> {
        Ok(self.state().rows().filter(|p| p.descendant == id).collect())
    }

    fn descendants_of(&mut self, id: NodeId<K>) -> Result<Vec<Path<K>>, StoreError> {
        Ok(self.state().rows().filter(|p| p.ancestor == id).collect())
    }

    fn paths_between(
        &mut self,
        ancestors: &[NodeId<K>],
        descendants: &[NodeId<K>],
    ) -> Result<Vec<Path<K>>, StoreError> {
        let ancestors: BTreeSet<NodeId<K>> = ancestors.iter().copied().collect();
        let descendants: BTreeSet<NodeId<K>> = descendants.iter().copied().collect();
        Ok(self
            .state()
            .rows()
            .filter(|p| ancestors.contains(&p.ancestor) && descendants.contains(&p.descendant))
            .collect())
    }

    fn all_paths(&mut self) -> Result<Vec<Path<K>>, StoreError> {
        Ok(self.state().rows().collect())
    }

    fn root_ids(&mut self, pagination: Pagination) -> Result<Vec<NodeId<K>>, StoreError> {
        Ok(page(roots(self.state()), pagination))
    }

    fn count_roots(&mut self) -> Result<u64, StoreError> {
        Ok(roots(self.state()).count() as u64)
    }

    fn direct_descendant_ids(
        &mut self,
        ancestor: NodeId<K>,
        pagination: Pagination,
    ) -> Result<Vec<NodeId<K>>, StoreError> {
        Ok(page(direct_descendants(self.state(), ancestor), pagination))
    }

    fn count_direct_descendants(&mut self, ancestor: NodeId<K>) -> Result<u64, StoreError> {
        Ok(direct_descendants(self.state(), ancestor).count() as u64)
    }

    fn descendant_ids(&mut self, ids: &[NodeId<K>]) -> Result<Vec<NodeId<K>>, StoreError> {
        let sources: BTreeSet<NodeId<K>> = ids.iter().copied().collect();
        let found: BTreeSet<NodeId<K>> = self
            .state()
            .rows()
            .filter(|p| p.depth >= 1 && sources.contains(&p.ancestor))
            .map(|p| p.descendant)
            .collect();
        Ok(found.into_iter().collect())
    }

    fn ancestors_with_descendants(
        &mut self,
        ids: &[NodeId<K>],
    ) -> Result<Vec<NodeId<K>>, StoreError> {
        let wanted: BTreeSet<NodeId<K>> = ids.iter().copied().collect();
        let found: BTreeSet<NodeId<K>> = self
            .state()
            .rows()
            .filter(|p| p.is_direct() && wanted.contains(&p.ancestor))
            .map(|p| p.ancestor)
            .collect();
        Ok(found.into_iter().collect())
    }
}

fn roots<K: NodeKind>(state: &State<K>) -> impl Iterator<Item = NodeId<K>> + '_ {
    let below: BTreeSet<NodeId<K>> = state
        .rows()
        .filter(|p| p.depth >= 1)
        .map(|p| p.descendant)
        .collect();
    state
        .active
        .keys()
        .copied()
        .filter(move |id| state.paths.contains_key(&(*id, *id)) && !below.contains(id))
}

fn direct_descendants<K: NodeKind>(
    state: &State<K>,
    ancestor: NodeId<K>,
) -> impl Iterator<Item = NodeId<K>> + '_ {
    state
        .paths
        .range((ancestor, NodeId::new(i64::MIN))..=(ancestor, NodeId::new(i64::MAX)))
        .filter(|&(_, &depth)| depth == 1)
        .map(|(&(_, d), _)| d)
        .filter(|d| state.active.contains_key(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    struct Team;

    impl NodeKind for Team {
        const NAME: &'static str = "team";
    }

    fn node(id: i64, code: &str) -> Node<Team> {
        Node {
            id: NodeId::new(id),
            code: code.to_string(),
            name: code.to_uppercase(),
            description: String::new(),
            extensions: Default::default(),
        }
    }

    #[test]
    fn uncommitted_writes_are_discarded() {
        let store = InMemoryHierarchyStore::<Team>::new();
        {
            let mut tx = store.begin().unwrap();
            tx.insert_node(&node(1, "a")).unwrap();
            assert!(tx.find_node(NodeId::new(1)).unwrap().is_some());
        }
        let mut tx = store.begin().unwrap();
        assert!(tx.find_node(NodeId::new(1)).unwrap().is_none());
    }

    #[test]
    fn committed_writes_are_visible() {
        let store = InMemoryHierarchyStore::<Team>::new();
        let mut tx = store.begin().unwrap();
        tx.insert_node(&node(1, "a")).unwrap();
        tx.insert_paths(&[Path::self_path(NodeId::new(1))]).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.find_node_by_code("a").unwrap().unwrap().id.get(), 1);
        assert_eq!(tx.all_paths().unwrap().len(), 1);
    }

    #[test]
    fn code_is_unique_across_archived_rows() {
        let store = InMemoryHierarchyStore::<Team>::new();
        let mut tx = store.begin().unwrap();
        tx.insert_node(&node(1, "a")).unwrap();
        assert!(tx.archive_node(NodeId::new(1)).unwrap());
        assert_eq!(tx.code_owner("a").unwrap(), Some(NodeId::new(1)));
        assert!(matches!(
            tx.insert_node(&node(2, "a")),
            Err(StoreError::Constraint(_))
        ));
    }

    #[test]
    fn roots_skip_archived_and_descendant_nodes() {
        let store = InMemoryHierarchyStore::<Team>::new();
        let mut tx = store.begin().unwrap();
        for (id, code) in [(1, "a"), (2, "b"), (3, "c")] {
            tx.insert_node(&node(id, code)).unwrap();
            tx.insert_paths(&[Path::self_path(NodeId::new(id))]).unwrap();
        }
        tx.insert_paths(&[Path::direct(NodeId::new(1), NodeId::new(2))])
            .unwrap();
        tx.archive_node(NodeId::new(3)).unwrap();

        assert_eq!(
            tx.root_ids(Pagination::default()).unwrap(),
            vec![NodeId::new(1)]
        );
        assert_eq!(tx.count_roots().unwrap(), 1);
        assert_eq!(
            tx.direct_descendant_ids(NodeId::new(1), Pagination::default())
                .unwrap(),
            vec![NodeId::new(2)]
        );
    }
}
