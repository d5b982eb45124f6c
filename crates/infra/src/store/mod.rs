//! Transactional storage of nodes and closure rows.
//!
//! The engine only talks to [`HierarchyStore`]; a transaction implements both
//! [`NodeStore`] and [`PathStore`] so every mutation sees its own writes and
//! commits atomically.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryHierarchyStore, InMemoryTx};
pub use postgres::{PostgresHierarchyStore, PostgresTx, Tables};
pub use r#trait::{HierarchyStore, Lifecycle, NodeStore, PathStore, Transaction};
