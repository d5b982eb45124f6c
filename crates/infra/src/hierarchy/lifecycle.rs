//! Detaching, archiving, purging and deleting nodes.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use trellis_core::{HierarchyError, HierarchyResult, NodeId, NodeKind, Path};

use super::Hierarchy;
use crate::store::{HierarchyStore, NodeStore, PathStore, Transaction};

/// What a deferred purge did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PurgeOutcome {
    Purged,
    /// Consumers reappeared during the grace period; the node stays archived.
    InUse { codes: Vec<String> },
    /// Recovered, or already purged.
    NotArchived,
}

impl<K: NodeKind, S: HierarchyStore<K>> Hierarchy<K, S> {
    /// Remove the direct edge `ancestor → descendant` and every row that
    /// only existed through it.
    ///
    /// With `leaf_only_detach` (the default) sub-hierarchies are detached
    /// one level at a time: the descendant must not have descendants of its
    /// own.
    #[instrument(
        skip(self),
        fields(kind = K::NAME, ancestor = ancestor.get(), descendant = descendant.get()),
        err
    )]
    pub fn delete_path(&self, ancestor: NodeId<K>, descendant: NodeId<K>) -> HierarchyResult<()> {
        let mut tx = self.store.begin()?;
        if self.config.leaf_only_detach && tx.descendants_of(descendant)?.iter().any(|p| !p.is_self()) {
            return Err(HierarchyError::descendant_has_descendant::<K>(descendant.get()));
        }
        if !tx.find_path(ancestor, descendant)?.is_some_and(|p| p.is_direct()) {
            return Err(HierarchyError::not_found::<K>(format!("path {ancestor} -> {descendant}")));
        }

        tx.delete_paths(&[Path::direct(ancestor, descendant)])?;
        Self::prune(&mut tx)?;
        tx.commit()?;

        self.invalidate(&[ancestor, descendant]);
        Ok(())
    }

    /// Move an unused active node to the archive and schedule its purge
    /// after the grace period. Its closure rows are kept for recovery.
    #[instrument(skip(self), fields(kind = K::NAME, id = id.get()), err)]
    pub fn archive_by_id(&self, id: NodeId<K>) -> HierarchyResult<()> {
        let consumers = self.consumers_of(id)?;
        if !consumers.is_empty() {
            return Err(HierarchyError::in_use::<K>(id.get(), consumers));
        }

        let mut tx = self.store.begin()?;
        if !tx.archive_node(id)? {
            return Err(HierarchyError::not_found::<K>(id.to_string()));
        }
        let grace = chrono::Duration::from_std(self.config.archive_grace_period)
            .map_err(|e| HierarchyError::Scheduler(e.to_string()))?;
        let purge_at = Utc::now() + grace;
        self.scheduler
            .schedule_purge(K::NAME, id.get(), purge_at)
            .map_err(|e| HierarchyError::Scheduler(e.to_string()))?;
        tx.commit()?;

        self.invalidate(&[id]);
        info!(kind = K::NAME, id = id.get(), purge_at = %purge_at, "node archived");
        Ok(())
    }

    /// Bring an archived node back, with the paths it had.
    #[instrument(skip(self), fields(kind = K::NAME, id = id.get()), err)]
    pub fn recover_from_archive_by_id(&self, id: NodeId<K>) -> HierarchyResult<()> {
        let mut tx = self.store.begin()?;
        if !tx.restore_node(id)? {
            return Err(HierarchyError::not_found::<K>(format!("archived {id}")));
        }
        tx.commit()?;

        self.invalidate(&[id]);
        info!(kind = K::NAME, id = id.get(), "node recovered");
        Ok(())
    }

    /// Body of the deferred purge. Safe to run any number of times.
    ///
    /// Preconditions are re-checked: a node that is in use again or no
    /// longer archived is left alone.
    #[instrument(skip(self), fields(kind = K::NAME, id = id.get()), err)]
    pub fn purge_archived(&self, id: NodeId<K>) -> HierarchyResult<PurgeOutcome> {
        let codes = self.consumers_of(id)?;
        if !codes.is_empty() {
            warn!(kind = K::NAME, id = id.get(), consumers = ?codes, "purge skipped, node in use");
            return Ok(PurgeOutcome::InUse { codes });
        }

        let mut tx = self.store.begin()?;
        if tx.find_archived_node(id)?.is_none() {
            debug!(kind = K::NAME, id = id.get(), "purge skipped, node not archived");
            return Ok(PurgeOutcome::NotArchived);
        }
        tx.delete_archived_node(id)?;
        let touched = Self::with_ancestors(&mut tx, id)?;
        let removed = tx.delete_paths_of(id)?;
        Self::prune(&mut tx)?;
        tx.commit()?;

        self.invalidate(&touched);
        info!(kind = K::NAME, id = id.get(), paths = removed, "archived node purged");
        Ok(PurgeOutcome::Purged)
    }

    /// Remove an unused active node right away, with all its paths.
    #[instrument(skip(self), fields(kind = K::NAME, id = id.get()), err)]
    pub fn delete_by_id(&self, id: NodeId<K>) -> HierarchyResult<()> {
        let consumers = self.consumers_of(id)?;
        if !consumers.is_empty() {
            return Err(HierarchyError::in_use::<K>(id.get(), consumers));
        }

        let mut tx = self.store.begin()?;
        if !tx.delete_node(id)? {
            return Err(HierarchyError::not_found::<K>(id.to_string()));
        }
        tx.delete_archived_node(id)?;
        let touched = Self::with_ancestors(&mut tx, id)?;
        tx.delete_paths_of(id)?;
        Self::prune(&mut tx)?;
        tx.commit()?;

        self.invalidate(&touched);
        info!(kind = K::NAME, id = id.get(), "node deleted");
        Ok(())
    }

    /// [`delete_by_id`](Self::delete_by_id) addressed by code. A blank code
    /// does nothing.
    #[instrument(skip(self), fields(kind = K::NAME), err)]
    pub fn delete_by_code(&self, code: &str) -> HierarchyResult<()> {
        if code.trim().is_empty() {
            return Ok(());
        }
        let id = {
            let mut tx = self.store.begin()?;
            tx.find_node_by_code(code)?
                .map(|n| n.id)
                .ok_or_else(|| HierarchyError::not_found::<K>(format!("code '{code}'")))?
        };
        self.delete_by_id(id)
    }

    /// `id` and everything above it. Removing `id` drops the parents'
    /// depth-1 rows, so their cached `has_descendant` goes stale.
    fn with_ancestors<T: PathStore<K>>(tx: &mut T, id: NodeId<K>) -> HierarchyResult<Vec<NodeId<K>>> {
        let mut ids: Vec<NodeId<K>> = tx.ancestors_of(id)?.into_iter().map(|p| p.ancestor).collect();
        if !ids.contains(&id) {
            ids.push(id);
        }
        Ok(ids)
    }
}
