//! Background job system with retry, backoff, and dead-letter handling.
//!
//! ## Components
//!
//! - `Job`: kind, JSON payload, schedule and retry policy
//! - `JobStore`: persistence for jobs (in-memory here)
//! - `JobExecutor`: runs ready jobs through registered handlers
//! - `JobQueueScheduler`: the hierarchy's deferred purge, as queued jobs
//!
//! Failed jobs are retried per their policy and dead-lettered once attempts
//! are exhausted.

pub mod executor;
pub mod scheduler;
pub mod store;
pub mod types;

pub use executor::{ExecutionError, ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle};
pub use scheduler::{JobQueueScheduler, PurgeScheduler, SchedulerError, register_purge_handler};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, Job, JobId, JobKind, JobResult, JobStatus, RetryPolicy, purge_route,
};
