//! Infrastructure layer: storage, cache, jobs, config and the hierarchy engine.

pub mod cache;
pub mod config;
pub mod guard;
pub mod hierarchy;
pub mod ids;
pub mod jobs;
pub mod store;


pub use hierarchy::{Hierarchy, HierarchyBuilder, PurgeOutcome};
