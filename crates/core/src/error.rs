//! Hierarchy error model.

use thiserror::Error;

use crate::id::NodeKind;

/// Result type used across the hierarchy layer.
pub type HierarchyResult<T> = Result<T, HierarchyError>;

/// Storage-level failure.
///
/// Raised by node/path store implementations. Domain rejections (cycles,
/// conflicts, ...) never travel through this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached (pool closed, lock poisoned, no runtime).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A unique or foreign-key constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A row could not be decoded into a domain record.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Error raised by hierarchy operations.
///
/// Every variant except `Store` and `Scheduler` is a deterministic rejection
/// of the requested change; the surrounding transaction is rolled back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    /// Node id or code already exists (active or archived).
    #[error("{kind} id or code already exists: {detail}")]
    Conflict { kind: &'static str, detail: String },

    /// Linking would make a node its own ancestor.
    #[error("{kind} {descendant} is already an ancestor of {ancestor}; edge would create a cycle")]
    Cycle {
        kind: &'static str,
        ancestor: i64,
        descendant: i64,
    },

    /// The requested direct edge is already recorded.
    #[error("{kind} path {ancestor} -> {descendant} already exists")]
    DuplicatePath {
        kind: &'static str,
        ancestor: i64,
        descendant: i64,
    },

    /// Detaching an edge whose descendant still has descendants of its own.
    #[error("{kind} {descendant} still has descendants; detach them first")]
    DescendantHasDescendant { kind: &'static str, descendant: i64 },

    /// Archive/delete blocked by active consumers.
    #[error("{kind} {id} is in use by: {}", .codes.join(", "))]
    InUse {
        kind: &'static str,
        id: i64,
        codes: Vec<String>,
    },

    /// The addressed node or path does not exist.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Input failed validation (blank code, oversize fields, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The deferred purge could not be scheduled.
    #[error("scheduling failed: {0}")]
    Scheduler(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HierarchyError {
    pub fn conflict<K: NodeKind>(detail: impl Into<String>) -> Self {
        Self::Conflict {
            kind: K::NAME,
            detail: detail.into(),
        }
    }

    pub fn cycle<K: NodeKind>(ancestor: i64, descendant: i64) -> Self {
        Self::Cycle {
            kind: K::NAME,
            ancestor,
            descendant,
        }
    }

    pub fn duplicate_path<K: NodeKind>(ancestor: i64, descendant: i64) -> Self {
        Self::DuplicatePath {
            kind: K::NAME,
            ancestor,
            descendant,
        }
    }

    pub fn descendant_has_descendant<K: NodeKind>(descendant: i64) -> Self {
        Self::DescendantHasDescendant {
            kind: K::NAME,
            descendant,
        }
    }

    pub fn in_use<K: NodeKind>(id: i64, codes: Vec<String>) -> Self {
        Self::InUse {
            kind: K::NAME,
            id,
            codes,
        }
    }

    pub fn not_found<K: NodeKind>(key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: K::NAME,
            key: key.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the error is a business rejection rather than an infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::Scheduler(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    struct Widget;

    impl NodeKind for Widget {
        const NAME: &'static str = "widget";
    }

    #[test]
    fn in_use_lists_consumer_codes() {
        let err = HierarchyError::in_use::<Widget>(7, vec!["admin".into(), "ops".into()]);
        assert_eq!(err.to_string(), "widget 7 is in use by: admin, ops");
        assert!(err.is_rejection());
    }

    #[test]
    fn store_errors_are_not_rejections() {
        let err: HierarchyError = StoreError::Unavailable("lock poisoned".into()).into();
        assert!(!err.is_rejection());
        assert_eq!(err.to_string(), "store unavailable: lock poisoned");
    }
}
