//! Postgres-backed hierarchy store.
//!
//! Each hierarchy owns three tables named after its kind (`role` →
//! `roles`, `roles_archived`, `role_paths`). [`PostgresHierarchyStore::migrate`]
//! creates them.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Constraint` |
//! | Database (foreign key / check violation) | `23503` / `23514` | `Constraint` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | ColumnDecode / Decode | N/A | `Serialization` |
//! | Other | N/A | `Backend` |
//!
//! ## Runtime
//!
//! The store traits are synchronous and every call blocks on a tokio runtime:
//!
//! | Calling thread | Strategy |
//! |----------------|----------|
//! | worker of a multi-threaded runtime | `block_in_place` on that runtime |
//! | worker of a current-thread runtime | refused with `Unavailable` |
//! | outside any runtime (e.g. the job executor) | `Handle::block_on` on the handle captured at construction |

use std::future::Future;
use std::marker::PhantomData;

use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::instrument;

use trellis_core::{Node, NodeFilter, NodeId, NodeKind, Pagination, Path, StoreError};

use crate::config::HierarchyConfig;
use super::r#trait::{HierarchyStore, Lifecycle, NodeStore, PathStore, Transaction};

/// Table names for one hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub nodes: String,
    pub archived: String,
    pub paths: String,
}

impl Tables {
    pub fn for_kind<K: NodeKind>() -> Self {
        Self {
            nodes: format!("{}s", K::NAME),
            archived: format!("{}s_archived", K::NAME),
            paths: format!("{}_paths", K::NAME),
        }
    }

    fn table(&self, lifecycle: Lifecycle) -> &str {
        match lifecycle {
            Lifecycle::Active => &self.nodes,
            Lifecycle::Archived => &self.archived,
        }
    }

    /// DDL for the three tables, one statement per entry.
    pub fn schema(&self) -> Vec<String> {
        let node_columns = r#"
                id BIGINT PRIMARY KEY,
                code VARCHAR(100) NOT NULL UNIQUE,
                name VARCHAR(200) NOT NULL,
                description VARCHAR(500) NOT NULL DEFAULT '',
                extensions JSONB NOT NULL DEFAULT '{}'::jsonb,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()"#;
        vec![
            format!("CREATE TABLE IF NOT EXISTS {} ({node_columns})", self.nodes),
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({node_columns},
                archived BOOLEAN NOT NULL DEFAULT TRUE,
                archived_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
                self.archived
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                ancestor_id BIGINT NOT NULL,
                descendant_id BIGINT NOT NULL,
                depth INTEGER NOT NULL CHECK (depth >= 0),
                PRIMARY KEY (ancestor_id, descendant_id))",
                self.paths
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {0}_descendant_idx ON {0} (descendant_id, depth)",
                self.paths
            ),
        ]
    }
}

/// Postgres-backed store for the hierarchy of kind `K`.
#[derive(Debug, Clone)]
pub struct PostgresHierarchyStore<K: NodeKind> {
    pool: PgPool,
    tables: Tables,
    /// Runtime used by callers outside any runtime.
    runtime: Option<Handle>,
    _kind: PhantomData<K>,
}

impl<K: NodeKind> PostgresHierarchyStore<K> {
    /// Wrap `pool`, remembering the runtime this is called from (if any).
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables: Tables::for_kind::<K>(),
            runtime: Handle::try_current().ok(),
            _kind: PhantomData,
        }
    }

    /// Use `runtime` for calls made outside any runtime. A current-thread
    /// runtime only makes progress here while another thread drives it.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Connect to `DATABASE_URL` from the config.
    #[instrument(skip(config), fields(kind = K::NAME), err)]
    pub async fn from_config(config: &HierarchyConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not set".to_string()))?;
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Create the hierarchy tables if they do not exist.
    #[instrument(skip(self), fields(kind = K::NAME), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in self.tables.schema() {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }
}

impl<K: NodeKind> HierarchyStore<K> for PostgresHierarchyStore<K> {
    type Tx<'a>
        = PostgresTx<'a, K>
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        let bridge = Bridge::resolve(self.runtime.as_ref())?;
        let tx = bridge
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresTx {
            tx,
            bridge,
            tables: &self.tables,
            _kind: PhantomData,
        })
    }
}

/// How the calling thread waits on async sqlx calls.
#[derive(Debug, Clone)]
struct Bridge {
    handle: Handle,
    in_place: bool,
}

impl Bridge {
    fn resolve(fallback: Option<&Handle>) -> Result<Self, StoreError> {
        match Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::CurrentThread => Err(StoreError::Unavailable(
                    "PostgresHierarchyStore cannot block a current-thread runtime; \
                     use a multi-threaded runtime or call it from a plain thread"
                        .to_string(),
                )),
                _ => Ok(Self {
                    handle,
                    in_place: true,
                }),
            },
            Err(_) => fallback
                .map(|handle| Self {
                    handle: handle.clone(),
                    in_place: false,
                })
                .ok_or_else(|| {
                    StoreError::Unavailable(
                        "PostgresHierarchyStore has no tokio runtime; create it inside one \
                         or pass one with with_runtime"
                            .to_string(),
                    )
                }),
        }
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        if self.in_place {
            tokio::task::block_in_place(|| self.handle.block_on(future))
        } else {
            self.handle.block_on(future)
        }
    }
}

/// Open transaction against [`PostgresHierarchyStore`]. Dropping it rolls back.
pub struct PostgresTx<'a, K: NodeKind> {
    tx: sqlx::Transaction<'static, Postgres>,
    bridge: Bridge,
    tables: &'a Tables,
    _kind: PhantomData<K>,
}

impl<K: NodeKind> Transaction for PostgresTx<'_, K> {
    fn commit(self) -> Result<(), StoreError> {
        self.bridge
            .block_on(self.tx.commit())
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn raw_ids<K: NodeKind>(ids: &[NodeId<K>]) -> Vec<i64> {
    ids.iter().map(|id| id.get()).collect()
}

fn like_pattern(needle: &Option<String>) -> Option<String> {
    needle.as_ref().map(|n| {
        let escaped = n
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{escaped}%")
    })
}

const FILTER_CLAUSE: &str =
    "($1::TEXT IS NULL OR code ILIKE $1) AND ($2::TEXT IS NULL OR name ILIKE $2)";

impl<K: NodeKind> PostgresTx<'_, K> {
    async fn fetch_nodes(&mut self, sql: &str, ids: Vec<i64>) -> Result<Vec<Node<K>>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_nodes", e))?;
        rows.iter().map(node_from_row).collect()
    }

    async fn fetch_paths(&mut self, sql: &str, ids: Vec<i64>) -> Result<Vec<Path<K>>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_paths", e))?;
        rows.iter().map(path_from_row).collect()
    }

    async fn fetch_ids(&mut self, sql: &str, ids: Vec<i64>) -> Result<Vec<NodeId<K>>, StoreError> {
        let rows: Vec<i64> = sqlx::query_scalar(sql)
            .bind(ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_ids", e))?;
        Ok(rows.into_iter().map(NodeId::new).collect())
    }

    async fn execute(&mut self, operation: &str, sql: &str, id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(sql)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(result.rows_affected())
    }

    async fn count(&mut self, sql: &str, id: i64) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(sql)
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count", e))?;
        Ok(count.max(0) as u64)
    }

    async fn move_node(&mut self, from: &str, to: &str, id: i64) -> Result<bool, StoreError> {
        let sql = format!(
            "WITH moved AS (DELETE FROM {from} WHERE id = $1
                RETURNING id, code, name, description, extensions)
             INSERT INTO {to} (id, code, name, description, extensions)
             SELECT id, code, name, description, extensions FROM moved"
        );
        Ok(self.execute("move_node", &sql, id).await? > 0)
    }

    async fn write_paths(&mut self, operation: &str, sql: &str, paths: &[Path<K>]) -> Result<u64, StoreError> {
        if paths.is_empty() {
            return Ok(0);
        }
        let ancestors: Vec<i64> = paths.iter().map(|p| p.ancestor.get()).collect();
        let descendants: Vec<i64> = paths.iter().map(|p| p.descendant.get()).collect();
        let depths: Vec<i32> = paths.iter().map(|p| p.depth as i32).collect();
        let result = sqlx::query(sql)
            .bind(ancestors)
            .bind(descendants)
            .bind(depths)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(result.rows_affected())
    }
}

impl<K: NodeKind> NodeStore<K> for PostgresTx<'_, K> {
    #[instrument(skip(self, node), fields(kind = K::NAME, id = node.id.get()), err)]
    fn insert_node(&mut self, node: &Node<K>) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (id, code, name, description, extensions) VALUES ($1, $2, $3, $4, $5)",
            self.tables.nodes
        );
        let bridge = self.bridge.clone();
        bridge.block_on(async {
            sqlx::query(&sql)
                .bind(node.id.get())
                .bind(&node.code)
                .bind(&node.name)
                .bind(&node.description)
                .bind(JsonValue::Object(node.extensions.clone()))
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("insert_node", e))
        })?;
        Ok(())
    }

    #[instrument(skip(self, node), fields(kind = K::NAME, id = node.id.get()), err)]
    fn update_node(&mut self, node: &Node<K>) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET code = $2, name = $3, description = $4, extensions = $5, updated_at = NOW()
             WHERE id = $1",
            self.tables.nodes
        );
        let bridge = self.bridge.clone();
        let result = bridge.block_on(async {
            sqlx::query(&sql)
                .bind(node.id.get())
                .bind(&node.code)
                .bind(&node.name)
                .bind(&node.description)
                .bind(JsonValue::Object(node.extensions.clone()))
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("update_node", e))
        })?;
        Ok(result.rows_affected() > 0)
    }

    fn find_node(&mut self, id: NodeId<K>) -> Result<Option<Node<K>>, StoreError> {
        Ok(self.find_nodes(&[id])?.pop())
    }

    fn find_node_by_code(&mut self, code: &str) -> Result<Option<Node<K>>, StoreError> {
        let sql = format!(
            "SELECT id, code, name, description, extensions FROM {} WHERE code = $1",
            self.tables.nodes
        );
        let bridge = self.bridge.clone();
        let row = bridge.block_on(async {
            sqlx::query(&sql)
                .bind(code)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("find_node_by_code", e))
        })?;
        row.as_ref().map(node_from_row).transpose()
    }

    fn find_nodes(&mut self, ids: &[NodeId<K>]) -> Result<Vec<Node<K>>, StoreError> {
        let sql = format!(
            "SELECT id, code, name, description, extensions FROM {} WHERE id = ANY($1) ORDER BY id",
            self.tables.nodes
        );
        let bridge = self.bridge.clone();
        bridge.block_on(self.fetch_nodes(&sql, raw_ids(ids)))
    }

    fn find_archived_node(&mut self, id: NodeId<K>) -> Result<Option<Node<K>>, StoreError> {
        let sql = format!(
            "SELECT id, code, name, description, extensions FROM {} WHERE id = ANY($1)",
            self.tables.archived
        );
        let bridge = self.bridge.clone();
        Ok(bridge.block_on(self.fetch_nodes(&sql, vec![id.get()]))?.pop())
    }

    fn id_exists(&mut self, id: NodeId<K>) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM (SELECT id FROM {} WHERE id = $1
             UNION ALL SELECT id FROM {} WHERE id = $1) AS taken",
            self.tables.nodes, self.tables.archived
        );
        let bridge = self.bridge.clone();
        Ok(bridge.block_on(self.count(&sql, id.get()))? > 0)
    }

    fn code_owner(&mut self, code: &str) -> Result<Option<NodeId<K>>, StoreError> {
        let sql = format!(
            "SELECT id FROM {} WHERE code = $1 UNION ALL SELECT id FROM {} WHERE code = $1 LIMIT 1",
            self.tables.nodes, self.tables.archived
        );
        let bridge = self.bridge.clone();
        let owner: Option<i64> = bridge.block_on(async {
            sqlx::query_scalar(&sql)
                .bind(code)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("code_owner", e))
        })?;
        Ok(owner.map(NodeId::new))
    }

    fn list_nodes(
        &mut self,
        lifecycle: Lifecycle,
        filter: &NodeFilter,
        pagination: Pagination,
    ) -> Result<Vec<Node<K>>, StoreError> {
        let sql = format!(
            "SELECT id, code, name, description, extensions FROM {} WHERE {FILTER_CLAUSE}
             ORDER BY id LIMIT $3 OFFSET $4",
            self.tables.table(lifecycle)
        );
        let bridge = self.bridge.clone();
        let rows = bridge.block_on(async {
            sqlx::query(&sql)
                .bind(like_pattern(&filter.code))
                .bind(like_pattern(&filter.name))
                .bind(i64::from(pagination.limit))
                .bind(i64::from(pagination.offset))
                .fetch_all(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("list_nodes", e))
        })?;
        rows.iter().map(node_from_row).collect()
    }

    fn count_nodes(&mut self, lifecycle: Lifecycle, filter: &NodeFilter) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {FILTER_CLAUSE}",
            self.tables.table(lifecycle)
        );
        let bridge = self.bridge.clone();
        let count: i64 = bridge.block_on(async {
            sqlx::query_scalar(&sql)
                .bind(like_pattern(&filter.code))
                .bind(like_pattern(&filter.name))
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("count_nodes", e))
        })?;
        Ok(count.max(0) as u64)
    }

    fn delete_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.nodes);
        let bridge = self.bridge.clone();
        Ok(bridge.block_on(self.execute("delete_node", &sql, id.get()))? > 0)
    }

    #[instrument(skip(self), fields(kind = K::NAME), err)]
    fn archive_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError> {
        let (from, to) = (self.tables.nodes.clone(), self.tables.archived.clone());
        let bridge = self.bridge.clone();
        bridge.block_on(self.move_node(&from, &to, id.get()))
    }

    #[instrument(skip(self), fields(kind = K::NAME), err)]
    fn restore_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError> {
        let (from, to) = (self.tables.archived.clone(), self.tables.nodes.clone());
        let bridge = self.bridge.clone();
        bridge.block_on(self.move_node(&from, &to, id.get()))
    }

    fn delete_archived_node(&mut self, id: NodeId<K>) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.archived);
        let bridge = self.bridge.clone();
        Ok(bridge.block_on(self.execute("delete_archived_node", &sql, id.get()))? > 0)
    }
}

impl<K: NodeKind> PathStore<K> for PostgresTx<'_, K> {
    #[instrument(skip(self, paths), fields(kind = K::NAME, count = paths.len()), err)]
    fn insert_paths(&mut self, paths: &[Path<K>]) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (ancestor_id, descendant_id, depth)
             SELECT * FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::INTEGER[])",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        bridge.block_on(self.write_paths("insert_paths", &sql, paths))?;
        Ok(())
    }

    fn update_depths(&mut self, paths: &[Path<K>]) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {0} AS p SET depth = u.depth
             FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::INTEGER[]) AS u(ancestor_id, descendant_id, depth)
             WHERE p.ancestor_id = u.ancestor_id AND p.descendant_id = u.descendant_id",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        bridge.block_on(self.write_paths("update_depths", &sql, paths))?;
        Ok(())
    }

    fn delete_paths(&mut self, paths: &[Path<K>]) -> Result<u64, StoreError> {
        let sql = format!(
            "DELETE FROM {0} AS p
             USING UNNEST($1::BIGINT[], $2::BIGINT[], $3::INTEGER[]) AS u(ancestor_id, descendant_id, depth)
             WHERE p.ancestor_id = u.ancestor_id AND p.descendant_id = u.descendant_id",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        bridge.block_on(self.write_paths("delete_paths", &sql, paths))
    }

    fn delete_paths_of(&mut self, id: NodeId<K>) -> Result<u64, StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE ancestor_id = $1 OR descendant_id = $1",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        bridge.block_on(self.execute("delete_paths_of", &sql, id.get()))
    }

    fn find_path(
        &mut self,
        ancestor: NodeId<K>,
        descendant: NodeId<K>,
    ) -> Result<Option<Path<K>>, StoreError> {
        let sql = format!(
            "SELECT ancestor_id, descendant_id, depth FROM {}
             WHERE ancestor_id = $1 AND descendant_id = $2",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        let row = bridge.block_on(async {
            sqlx::query(&sql)
                .bind(ancestor.get())
                .bind(descendant.get())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("find_path", e))
        })?;
        row.as_ref().map(path_from_row).transpose()
    }

    fn ancestors_of(&mut self, id: NodeId<K>) -> Result<Vec<Path<K>>, StoreError> {
        let sql = format!(
            "SELECT ancestor_id, descendant_id, depth FROM {} WHERE descendant_id = ANY($1)",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        bridge.block_on(self.fetch_paths(&sql, vec![id.get()]))
    }

    fn descendants_of(&mut self, id: NodeId<K>) -> Result<Vec<Path<K>>, StoreError> {
        let sql = format!(
            "SELECT ancestor_id, descendant_id, depth FROM {} WHERE ancestor_id = ANY($1)",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        bridge.block_on(self.fetch_paths(&sql, vec![id.get()]))
    }

    fn paths_between(
        &mut self,
        ancestors: &[NodeId<K>],
        descendants: &[NodeId<K>],
    ) -> Result<Vec<Path<K>>, StoreError> {
        let sql = format!(
            "SELECT ancestor_id, descendant_id, depth FROM {}
             WHERE ancestor_id = ANY($1) AND descendant_id = ANY($2)",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        let rows = bridge.block_on(async {
            sqlx::query(&sql)
                .bind(raw_ids(ancestors))
                .bind(raw_ids(descendants))
                .fetch_all(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("paths_between", e))
        })?;
        rows.iter().map(path_from_row).collect()
    }

    fn all_paths(&mut self) -> Result<Vec<Path<K>>, StoreError> {
        let sql = format!(
            "SELECT ancestor_id, descendant_id, depth FROM {}",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        let rows = bridge.block_on(async {
            sqlx::query(&sql)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("all_paths", e))
        })?;
        rows.iter().map(path_from_row).collect()
    }

    fn root_ids(&mut self, pagination: Pagination) -> Result<Vec<NodeId<K>>, StoreError> {
        let sql = format!(
            "SELECT n.id FROM {nodes} n
             JOIN {paths} s ON s.ancestor_id = n.id AND s.descendant_id = n.id AND s.depth = 0
             WHERE NOT EXISTS (
                SELECT 1 FROM {paths} p WHERE p.descendant_id = n.id AND p.depth >= 1)
             ORDER BY n.id LIMIT $1 OFFSET $2",
            nodes = self.tables.nodes,
            paths = self.tables.paths
        );
        let bridge = self.bridge.clone();
        let rows: Vec<i64> = bridge.block_on(async {
            sqlx::query_scalar(&sql)
                .bind(i64::from(pagination.limit))
                .bind(i64::from(pagination.offset))
                .fetch_all(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("root_ids", e))
        })?;
        Ok(rows.into_iter().map(NodeId::new).collect())
    }

    fn count_roots(&mut self) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {nodes} n
             JOIN {paths} s ON s.ancestor_id = n.id AND s.descendant_id = n.id AND s.depth = 0
             WHERE NOT EXISTS (
                SELECT 1 FROM {paths} p WHERE p.descendant_id = n.id AND p.depth >= 1)",
            nodes = self.tables.nodes,
            paths = self.tables.paths
        );
        let bridge = self.bridge.clone();
        let count: i64 = bridge.block_on(async {
            sqlx::query_scalar(&sql)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("count_roots", e))
        })?;
        Ok(count.max(0) as u64)
    }

    fn direct_descendant_ids(
        &mut self,
        ancestor: NodeId<K>,
        pagination: Pagination,
    ) -> Result<Vec<NodeId<K>>, StoreError> {
        let sql = format!(
            "SELECT p.descendant_id FROM {paths} p JOIN {nodes} n ON n.id = p.descendant_id
             WHERE p.ancestor_id = $1 AND p.depth = 1
             ORDER BY p.descendant_id LIMIT $2 OFFSET $3",
            nodes = self.tables.nodes,
            paths = self.tables.paths
        );
        let bridge = self.bridge.clone();
        let rows: Vec<i64> = bridge.block_on(async {
            sqlx::query_scalar(&sql)
                .bind(ancestor.get())
                .bind(i64::from(pagination.limit))
                .bind(i64::from(pagination.offset))
                .fetch_all(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("direct_descendant_ids", e))
        })?;
        Ok(rows.into_iter().map(NodeId::new).collect())
    }

    fn count_direct_descendants(&mut self, ancestor: NodeId<K>) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {paths} p JOIN {nodes} n ON n.id = p.descendant_id
             WHERE p.ancestor_id = $1 AND p.depth = 1",
            nodes = self.tables.nodes,
            paths = self.tables.paths
        );
        let bridge = self.bridge.clone();
        bridge.block_on(self.count(&sql, ancestor.get()))
    }

    fn descendant_ids(&mut self, ids: &[NodeId<K>]) -> Result<Vec<NodeId<K>>, StoreError> {
        let sql = format!(
            "SELECT DISTINCT descendant_id FROM {} WHERE ancestor_id = ANY($1) AND depth >= 1
             ORDER BY descendant_id",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        bridge.block_on(self.fetch_ids(&sql, raw_ids(ids)))
    }

    fn ancestors_with_descendants(
        &mut self,
        ids: &[NodeId<K>],
    ) -> Result<Vec<NodeId<K>>, StoreError> {
        let sql = format!(
            "SELECT DISTINCT ancestor_id FROM {} WHERE ancestor_id = ANY($1) AND depth = 1
             ORDER BY ancestor_id",
            self.tables.paths
        );
        let bridge = self.bridge.clone();
        bridge.block_on(self.fetch_ids(&sql, raw_ids(ids)))
    }
}

fn node_from_row<K: NodeKind>(row: &PgRow) -> Result<Node<K>, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(format!("failed to decode node row: {e}"));
    let extensions: JsonValue = row.try_get("extensions").map_err(decode)?;
    let extensions = match extensions {
        JsonValue::Object(map) => map,
        JsonValue::Null => Map::new(),
        other => {
            return Err(StoreError::Serialization(format!(
                "extensions must be a JSON object, got {other}"
            )));
        }
    };
    Ok(Node {
        id: NodeId::new(row.try_get("id").map_err(decode)?),
        code: row.try_get("code").map_err(decode)?,
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        extensions,
    })
}

fn path_from_row<K: NodeKind>(row: &PgRow) -> Result<Path<K>, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(format!("failed to decode path row: {e}"));
    let depth: i32 = row.try_get("depth").map_err(decode)?;
    Ok(Path::new(
        NodeId::new(row.try_get("ancestor_id").map_err(decode)?),
        NodeId::new(row.try_get("descendant_id").map_err(decode)?),
        u32::try_from(depth)
            .map_err(|_| StoreError::Serialization(format!("negative path depth {depth}")))?,
    ))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique, foreign key and check violations
                Some("23505") | Some("23503") | Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{} in {}", err, operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("{} in {}", err, operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
