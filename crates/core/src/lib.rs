//! `trellis-core`: hierarchy domain foundation.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed node identifiers, node and path records, paging, the error taxonomy
//! and the closure-table algorithms shared by every store implementation.

pub mod closure;
pub mod error;
pub mod id;
pub mod node;
pub mod page;
pub mod path;

pub use closure::{LinkPlan, Reconciliation};
pub use error::{HierarchyError, HierarchyResult, StoreError};
pub use id::{IdGenerator, NodeId, NodeKind};
pub use node::{NewNode, Node, NodeFilter, NodeView};
pub use page::{Page, Pagination, Slice};
pub use path::Path;
