//! Closure-table algorithms.
//!
//! Stores keep one row per reachable `(ancestor, descendant)` pair at its
//! minimal depth. The functions here are pure: they take the rows a store
//! returned and compute the rows it must write, so every backend shares the
//! same semantics.
//!
//! Depth-1 rows are exactly the direct edges. Linking only ever lowers a
//! pair's depth, and a pair has depth 1 iff a direct edge exists, so the
//! direct-edge set can always be read back from the table.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::id::{NodeId, NodeKind};
use crate::path::Path;

/// Minimal depth per `(ancestor, descendant)` pair.
pub type DepthMap<K> = BTreeMap<(NodeId<K>, NodeId<K>), u32>;

/// Rows to write when linking an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPlan<K: NodeKind> {
    /// Pairs that were not connected before.
    pub insert: Vec<Path<K>>,
    /// Pairs already connected through a longer chain.
    pub shorten: Vec<Path<K>>,
}

impl<K: NodeKind> LinkPlan<K> {
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.shorten.is_empty()
    }
}

/// Every pair implied by a new edge `ancestor → descendant`.
///
/// `upper` holds the rows ending at the edge's ancestor (its ancestor set,
/// self row included); `lower` holds the rows starting at the edge's
/// descendant. Each combination `(x, y)` is reachable at `k + 1 + j`.
pub fn link_candidates<K: NodeKind>(upper: &[Path<K>], lower: &[Path<K>]) -> Vec<Path<K>> {
    let mut best: BTreeMap<(NodeId<K>, NodeId<K>), u32> = BTreeMap::new();
    for up in upper {
        for down in lower {
            let depth = up.depth + 1 + down.depth;
            best.entry((up.ancestor, down.descendant))
                .and_modify(|d| *d = (*d).min(depth))
                .or_insert(depth);
        }
    }
    best.into_iter()
        .map(|((a, d), depth)| Path::new(a, d, depth))
        .collect()
}

/// Split candidates against the rows already stored for the same pairs.
///
/// Redundant longer paths to an already-connected pair are skipped; shorter
/// ones replace the stored depth.
pub fn plan_link<K: NodeKind>(candidates: Vec<Path<K>>, existing: &[Path<K>]) -> LinkPlan<K> {
    let known: HashMap<(NodeId<K>, NodeId<K>), u32> =
        existing.iter().map(|p| (p.pair(), p.depth)).collect();

    let mut plan = LinkPlan {
        insert: Vec::new(),
        shorten: Vec::new(),
    };
    for candidate in candidates {
        match known.get(&candidate.pair()) {
            None => plan.insert.push(candidate),
            Some(&depth) if candidate.depth < depth => plan.shorten.push(candidate),
            Some(_) => {}
        }
    }
    plan
}

/// Derive the full closure from the direct edges found in `paths`.
///
/// Nodes are the owners of self rows plus the endpoints of direct edges.
pub fn transitive_closure<K: NodeKind>(paths: &[Path<K>]) -> DepthMap<K> {
    let mut nodes: BTreeSet<NodeId<K>> = BTreeSet::new();
    let mut children: BTreeMap<NodeId<K>, Vec<NodeId<K>>> = BTreeMap::new();
    for p in paths {
        if p.is_self() {
            nodes.insert(p.ancestor);
        } else if p.is_direct() {
            nodes.insert(p.ancestor);
            nodes.insert(p.descendant);
            children.entry(p.ancestor).or_default().push(p.descendant);
        }
    }

    let mut closure = DepthMap::new();
    for &root in &nodes {
        let mut seen: HashMap<NodeId<K>, u32> = HashMap::from([(root, 0)]);
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            let depth = seen[&current];
            for &child in children.get(&current).into_iter().flatten() {
                if !seen.contains_key(&child) {
                    seen.insert(child, depth + 1);
                    queue.push_back(child);
                }
            }
        }
        closure.extend(seen.into_iter().map(|(d, depth)| ((root, d), depth)));
    }
    closure
}

/// Difference between the stored rows and the closure of their direct edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation<K: NodeKind> {
    /// Rows no longer implied by any chain of direct edges.
    pub stale: Vec<Path<K>>,
    /// Implied pairs with no stored row.
    pub missing: Vec<Path<K>>,
    /// Stored pairs whose minimal depth changed (carrying the new depth).
    pub redepth: Vec<Path<K>>,
}

impl<K: NodeKind> Reconciliation<K> {
    pub fn is_empty(&self) -> bool {
        self.stale.is_empty() && self.missing.is_empty() && self.redepth.is_empty()
    }
}

/// Re-derive reachability from the remaining direct edges and diff it
/// against `stored`.
pub fn reconcile<K: NodeKind>(stored: &[Path<K>]) -> Reconciliation<K> {
    let closure = transitive_closure(stored);
    let mut result = Reconciliation {
        stale: Vec::new(),
        missing: Vec::new(),
        redepth: Vec::new(),
    };

    let mut present: HashMap<(NodeId<K>, NodeId<K>), u32> = HashMap::with_capacity(stored.len());
    for p in stored {
        present.insert(p.pair(), p.depth);
        match closure.get(&p.pair()) {
            None => result.stale.push(*p),
            Some(&depth) if depth != p.depth => {
                result.redepth.push(Path::new(p.ancestor, p.descendant, depth))
            }
            Some(_) => {}
        }
    }
    for (&(a, d), &depth) in &closure {
        if !present.contains_key(&(a, d)) {
            result.missing.push(Path::new(a, d, depth));
        }
    }
    result
}
