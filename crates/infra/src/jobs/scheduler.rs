//! Deferred purge scheduling on top of the job queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use trellis_core::{NodeId, NodeKind};

use super::executor::JobExecutor;
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobKind, JobResult, RetryPolicy, purge_route};
use crate::hierarchy::{Hierarchy, PurgeOutcome};
use crate::store::HierarchyStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("failed to enqueue purge job: {0}")]
    Enqueue(#[from] JobStoreError),
}

/// Delayed removal of archived nodes.
///
/// Jobs are fire-and-forget and are never cancelled; the purge re-checks its
/// preconditions when it runs.
pub trait PurgeScheduler: Send + Sync {
    fn schedule_purge(&self, kind: &'static str, id: i64, at: DateTime<Utc>) -> Result<(), SchedulerError>;
}

impl<P> PurgeScheduler for Arc<P>
where
    P: PurgeScheduler + ?Sized,
{
    fn schedule_purge(&self, kind: &'static str, id: i64, at: DateTime<Utc>) -> Result<(), SchedulerError> {
        (**self).schedule_purge(kind, id, at)
    }
}

/// Enqueues one `<kind>.purge` job per archived node.
#[derive(Debug, Clone)]
pub struct JobQueueScheduler<S: JobStore> {
    store: S,
    retry_policy: RetryPolicy,
}

impl<S: JobStore> JobQueueScheduler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Failed purges are retried up to `max_attempts` times in total.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry_policy.max_attempts = max_attempts.max(1);
        self
    }
}

impl<S: JobStore> PurgeScheduler for JobQueueScheduler<S> {
    fn schedule_purge(&self, kind: &'static str, id: i64, at: DateTime<Utc>) -> Result<(), SchedulerError> {
        let job = Job::new(JobKind::archive_purge(kind), serde_json::json!({ "id": id }))
            .with_retry_policy(self.retry_policy.clone())
            .scheduled_at(at);
        let job_id = self.store.enqueue(job)?;
        debug!(kind, id, job_id = %job_id, scheduled_at = %at, "purge scheduled");
        Ok(())
    }
}

/// Route `<K>.purge` jobs on `executor` to `hierarchy`.
///
/// Nodes found in use or no longer archived complete the job; storage
/// failures fail it so the queue retries.
pub fn register_purge_handler<J, K, H>(executor: &mut JobExecutor<J>, hierarchy: Arc<Hierarchy<K, H>>)
where
    J: JobStore + 'static,
    K: NodeKind,
    H: HierarchyStore<K> + 'static,
{
    executor.register_handler(purge_route(K::NAME), move |job: &Job| {
        let Some(raw) = job.payload.get("id").and_then(serde_json::Value::as_i64) else {
            return JobResult::Failure(format!("purge payload without id: {}", job.payload));
        };
        match hierarchy.purge_archived(NodeId::new(raw)) {
            // Skips are logged by the hierarchy; retrying would not change them.
            Ok(PurgeOutcome::Purged | PurgeOutcome::InUse { .. } | PurgeOutcome::NotArchived) => {
                JobResult::Success
            }
            Err(e) => {
                warn!(kind = K::NAME, id = raw, error = %e, "purge failed");
                JobResult::Failure(e.to_string())
            }
        }
    });
}
