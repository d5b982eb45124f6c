use trellis_core::{Node, NodeFilter, NodeId, NodeKind, Pagination, Path, StoreError};

/// Which node table a listing reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Active,
    Archived,
}

/// Node rows of one hierarchy, active and archived.
///
/// All methods run inside the transaction that implements them; nothing is
/// visible to other transactions before `commit`.
pub trait NodeStore<K: NodeKind> {
    fn insert_node(&mut self, node: &Node<K>) -> Result<(), StoreError>;

    /// Overwrite an active node. Returns `false` if no active row has that id.
    fn update_node(&mut self, node: &Node<K>) -> Result<bool, StoreError>;

    fn find_node(&mut self, id: NodeId<K>) -> Result<Option<Node<K>>, StoreError>;

    fn find_node_by_code(&mut self, code: &str) -> Result<Option<Node<K>>, StoreError>;

    /// Active nodes among `ids`, ordered by id.
    fn find_nodes(&mut self, ids: &[NodeId<K>]) -> Result<Vec<Node<K>>, StoreError>;

    fn find_archived_node(&mut self, id: NodeId<K>) -> Result<Option<Node<K>>, StoreError>;

    /// Whether the id is taken by an active or archived node.
    fn id_exists(&mut self, id: NodeId<K>) -> Result<bool, StoreError>;

    /// Owner of `code` among active and archived nodes.
    fn code_owner(&mut self, code: &str) -> Result<Option<NodeId<K>>, StoreError>;

    /// Filtered listing ordered by id.
    fn list_nodes(
        &mut self,
        lifecycle: Lifecycle,
        filter: &NodeFilter,
        pagination: Pagination,
    ) -> Result<Vec<Node<K>>, StoreError>;

    fn count_nodes(&mut self, lifecycle: Lifecycle, filter: &NodeFilter) -> Result<u64, StoreError>;

    /// Remove an active node row. Paths are left to the caller.
    fn delete_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError>;

    /// Move an active row to the archived table.
    fn archive_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError>;

    /// Move an archived row back to the active table.
    fn restore_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError>;

    fn delete_archived_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError>;
}

/// Closure rows of one hierarchy: one row per reachable pair at its minimal depth.
pub trait PathStore<K: NodeKind> {
    fn insert_paths(&mut self, paths: &[Path<K>]) -> Result<(), StoreError>;

    /// Set the depth of already stored pairs.
    fn update_depths(&mut self, paths: &[Path<K>]) -> Result<(), StoreError>;

    /// Delete stored rows by pair; depths in `paths` are ignored.
    fn delete_paths(&mut self, paths: &[Path<K>]) -> Result<u64, StoreError>;

    /// Delete every row that has `id` as ancestor or descendant.
    fn delete_paths_of(&mut self, id: NodeId<K>) -> Result<u64, StoreError>;

    fn find_path(
        &mut self,
        ancestor: NodeId<K>,
        descendant: NodeId<K>,
    ) -> Result<Option<Path<K>>, StoreError>;

    /// Rows ending at `id`, self row included.
    fn ancestors_of(&mut self, id: NodeId<K>) -> Result<Vec<Path<K>>, StoreError>;

    /// Rows starting at `id`, self row included.
    fn descendants_of(&mut self, id: NodeId<K>) -> Result<Vec<Path<K>>, StoreError>;

    /// Stored rows whose ancestor is in `ancestors` and descendant in `descendants`.
    fn paths_between(
        &mut self,
        ancestors: &[NodeId<K>],
        descendants: &[NodeId<K>],
    ) -> Result<Vec<Path<K>>, StoreError>;

    fn all_paths(&mut self) -> Result<Vec<Path<K>>, StoreError>;

    /// Active nodes that are no node's descendant, ordered by id.
    fn root_ids(&mut self, pagination: Pagination) -> Result<Vec<NodeId<K>>, StoreError>;

    fn count_roots(&mut self) -> Result<u64, StoreError>;

    /// Active nodes one hop below `ancestor`, ordered by id.
    fn direct_descendant_ids(
        &mut self,
        ancestor: NodeId<K>,
        pagination: Pagination,
    ) -> Result<Vec<NodeId<K>>, StoreError>;

    fn count_direct_descendants(&mut self, ancestor: NodeId<K>) -> Result<u64, StoreError>;

    /// Distinct nodes reachable at depth >= 1 from any of `ids`, ordered by id.
    fn descendant_ids(&mut self, ids: &[NodeId<K>]) -> Result<Vec<NodeId<K>>, StoreError>;

    /// The subset of `ids` that are the ancestor of at least one other node.
    fn ancestors_with_descendants(
        &mut self,
        ids: &[NodeId<K>],
    ) -> Result<Vec<NodeId<K>>, StoreError>;
}

/// A unit of work against a store. Dropping it without `commit` rolls back.
pub trait Transaction {
    fn commit(self) -> Result<(), StoreError>;
}

/// Transactional storage for one hierarchy.
pub trait HierarchyStore<K: NodeKind>: Send + Sync {
    type Tx<'a>: NodeStore<K> + PathStore<K> + Transaction
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError>;
}

impl<K, S> HierarchyStore<K> for std::sync::Arc<S>
where
    K: NodeKind,
    S: HierarchyStore<K>,
{
    type Tx<'a>
        = S::Tx<'a>
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        (**self).begin()
    }
}
