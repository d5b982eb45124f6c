//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobKind, JobResult, JobStatus};

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&Job) -> JobResult + Send + Sync>;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("job handler failed: {0}")]
    Handler(String),
    #[error("failed to store job state: {0}")]
    Persist(#[from] JobStoreError),
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for ready jobs when the queue is idle
    pub poll_interval: Duration,
    /// Thread name, also used in logs
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for the current job to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        lock_stats(&self.stats).clone()
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub uptime_secs: u64,
}

fn lock_stats(stats: &Mutex<ExecutorStats>) -> MutexGuard<'_, ExecutorStats> {
    stats.lock().unwrap_or_else(|e| e.into_inner())
}

/// Background job executor.
///
/// Polls a job store for ready jobs, executes them with registered handlers,
/// and handles retries and dead-lettering.
pub struct JobExecutor<S: JobStore> {
    store: S,
    handlers: HashMap<String, JobHandler>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a handler for a job kind.
    ///
    /// Patterns match a kind's `type_name` exactly, by prefix (`"role.*"`), or
    /// anything (`"*"`).
    pub fn register_handler<F>(&mut self, kind_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        self.handlers.insert(kind_pattern.into(), Box::new(handler));
    }

    fn get_handler(&self, kind: &JobKind) -> Option<&JobHandler> {
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h);
        }

        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if type_name.starts_with(prefix) {
                    return Some(handler);
                }
            }
        }

        self.handlers.get("*")
    }

    /// Spawn the executor in a background thread.
    pub fn spawn(self, config: JobExecutorConfig) -> io::Result<JobExecutorHandle>
    where
        S: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || executor_loop(self, config, shutdown_rx, stats_clone))?;

        Ok(JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    /// Claim and execute one ready job, if any.
    ///
    /// Returns the job in its post-execution state. A handler failure is
    /// recorded on the job; failing to store that state is an error.
    pub fn run_next(&self) -> Result<Option<Job>, JobStoreError> {
        let Some(mut job) = self.store.claim_next()? else {
            return Ok(None);
        };
        match self.execute_one(&mut job) {
            Ok(()) | Err(ExecutionError::Handler(_)) => Ok(Some(job)),
            Err(ExecutionError::Persist(e)) => Err(e),
        }
    }

    /// Execute an already claimed job and persist its new state.
    pub fn execute_one(&self, job: &mut Job) -> Result<(), ExecutionError> {
        let result = match self.get_handler(&job.kind) {
            Some(handler) => handler(job),
            None => {
                warn!(job_id = %job.id, kind = job.kind.type_name(), "no handler for job");
                JobResult::Failure(format!("no handler for job kind {}", job.kind.type_name()))
            }
        };

        match result {
            JobResult::Success => {
                job.mark_completed();
                self.persist(job, self.store.update(job))?;
                debug!(job_id = %job.id, kind = job.kind.type_name(), "job completed");
                Ok(())
            }
            JobResult::Failure(error) => {
                job.mark_failed(error.clone());
                let stored = match &job.status {
                    JobStatus::DeadLettered { error, .. } => {
                        warn!(job_id = %job.id, error = %error, "job dead-lettered");
                        self.store.dead_letter(job.clone(), error.clone())
                    }
                    _ => self.store.update(job),
                };
                self.persist(job, stored)?;
                Err(ExecutionError::Handler(error))
            }
        }
    }

    fn persist(&self, job: &Job, stored: Result<(), JobStoreError>) -> Result<(), ExecutionError> {
        stored.map_err(|e| {
            warn!(job_id = %job.id, status = ?job.status, error = %e, "failed to store job state");
            ExecutionError::Persist(e)
        })
    }
}

fn executor_loop<S: JobStore + 'static>(
    executor: JobExecutor<S>,
    config: JobExecutorConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, "job executor started");
    let start_time = Instant::now();

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        lock_stats(&stats).uptime_secs = start_time.elapsed().as_secs();

        match executor.store.claim_next() {
            Ok(Some(mut job)) => {
                debug!(
                    executor = %config.name,
                    job_id = %job.id,
                    kind = job.kind.type_name(),
                    "claimed job"
                );

                let result = executor.execute_one(&mut job);

                let mut s = lock_stats(&stats);
                s.jobs_processed += 1;
                match &result {
                    Ok(()) => s.jobs_succeeded += 1,
                    Err(_) => {
                        s.jobs_failed += 1;
                        if matches!(job.status, JobStatus::DeadLettered { .. }) {
                            s.jobs_dead_lettered += 1;
                        }
                    }
                }
                drop(s);

                if let Err(e) = result {
                    debug!(
                        executor = %config.name,
                        job_id = %job.id,
                        error = %e,
                        status = ?job.status,
                        "job execution failed"
                    );
                }
            }
            Ok(None) => {
                if stop_requested(&shutdown_rx, config.poll_interval) {
                    break;
                }
            }
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to claim job");
                if stop_requested(&shutdown_rx, config.poll_interval) {
                    break;
                }
            }
        }
    }

    info!(executor = %config.name, "job executor stopped");
}

/// Wait up to `interval` for a shutdown signal.
fn stop_requested(shutdown_rx: &mpsc::Receiver<()>, interval: Duration) -> bool {
    !matches!(
        shutdown_rx.recv_timeout(interval),
        Err(mpsc::RecvTimeoutError::Timeout)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::{InMemoryJobStore, JobStats};
    use crate::jobs::types::{DeadLetterEntry, JobId, RetryPolicy};

    fn executor_with(handler: impl Fn(&Job) -> JobResult + Send + Sync + 'static) -> JobExecutor<Arc<InMemoryJobStore>> {
        let mut executor = JobExecutor::new(InMemoryJobStore::arc());
        executor.register_handler("test", handler);
        executor
    }

    #[test]
    fn execute_successful_job() {
        let executor = executor_with(|_job| JobResult::Success);
        executor
            .store()
            .enqueue(Job::new(JobKind::custom("test"), serde_json::json!({})))
            .unwrap();

        let job = executor.run_next().unwrap().unwrap();
        assert!(matches!(job.status, JobStatus::Completed));
        assert_eq!(job.attempt, 1);
        assert!(executor.run_next().unwrap().is_none());
    }

    #[test]
    fn failing_job_retries_then_dead_letters() {
        let executor = executor_with(|_job| JobResult::Failure("boom".to_string()));
        let job = Job::new(JobKind::custom("test"), serde_json::json!({}))
            .with_retry_policy(RetryPolicy::fixed(2, Duration::ZERO));
        let job_id = executor.store().enqueue(job).unwrap();

        let first = executor.run_next().unwrap().unwrap();
        assert!(matches!(first.status, JobStatus::Failed { attempt: 1, .. }));

        let second = executor.run_next().unwrap().unwrap();
        assert!(matches!(second.status, JobStatus::DeadLettered { attempts: 2, .. }));
        assert!(executor.store().get(job_id).unwrap().is_none());
        assert_eq!(executor.store().list_dead_letters(10).unwrap().len(), 1);
    }

    #[test]
    fn prefix_and_wildcard_handlers() {
        let mut executor = JobExecutor::new(InMemoryJobStore::arc());
        executor.register_handler("permission.*", |_job| JobResult::Success);
        executor.register_handler("*", |_job| JobResult::Failure("fallback".into()));

        executor
            .store()
            .enqueue(Job::new(JobKind::archive_purge("permission"), serde_json::json!({"id": 1})))
            .unwrap();
        let job = executor.run_next().unwrap().unwrap();
        assert!(matches!(job.status, JobStatus::Completed));

        executor
            .store()
            .enqueue(
                Job::new(JobKind::custom("anything"), serde_json::json!({}))
                    .with_retry_policy(RetryPolicy::no_retry()),
            )
            .unwrap();
        let job = executor.run_next().unwrap().unwrap();
        assert!(matches!(job.status, JobStatus::DeadLettered { .. }));
    }

    #[test]
    fn spawned_executor_drains_queue_and_stops() {
        let executor = executor_with(|_job| JobResult::Success);
        let store = executor.store().clone();
        for _ in 0..3 {
            store
                .enqueue(Job::new(JobKind::custom("test"), serde_json::json!({})))
                .unwrap();
        }

        let handle = executor
            .spawn(JobExecutorConfig::default().with_poll_interval(Duration::from_millis(5)))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().jobs_succeeded < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.stats().jobs_succeeded, 3);
        handle.shutdown();
        assert_eq!(store.stats().unwrap().completed, 3);
    }

    /// Claims work but cannot record outcomes.
    struct ReadOnlyJobStore(InMemoryJobStore);

    impl JobStore for ReadOnlyJobStore {
        fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
            self.0.enqueue(job)
        }
        fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
            self.0.get(job_id)
        }
        fn update(&self, _job: &Job) -> Result<(), JobStoreError> {
            Err(JobStoreError::Storage("read-only".into()))
        }
        fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
            self.0.claim_next()
        }
        fn list_by_status(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
            self.0.list_by_status(status, limit)
        }
        fn list_by_kind(&self, kind: &JobKind, limit: usize) -> Result<Vec<Job>, JobStoreError> {
            self.0.list_by_kind(kind, limit)
        }
        fn dead_letter(&self, _job: Job, _reason: String) -> Result<(), JobStoreError> {
            Err(JobStoreError::Storage("read-only".into()))
        }
        fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
            self.0.list_dead_letters(limit)
        }
        fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
            self.0.retry_dead_letter(job_id)
        }
        fn delete_dead_letter(&self, job_id: JobId) -> Result<(), JobStoreError> {
            self.0.delete_dead_letter(job_id)
        }
        fn stats(&self) -> Result<JobStats, JobStoreError> {
            self.0.stats()
        }
    }

    #[test]
    fn unstored_outcomes_are_reported() {
        let mut executor = JobExecutor::new(ReadOnlyJobStore(InMemoryJobStore::new()));
        executor.register_handler("ok", |_job| JobResult::Success);
        executor.register_handler("broken", |_job| JobResult::Failure("boom".into()));

        executor.store().enqueue(Job::new(JobKind::custom("ok"), serde_json::json!({}))).unwrap();
        assert_eq!(
            executor.run_next().unwrap_err(),
            JobStoreError::Storage("read-only".into())
        );

        let mut job = Job::new(JobKind::custom("broken"), serde_json::json!({}))
            .with_retry_policy(RetryPolicy::no_retry());
        job.mark_running();
        assert!(matches!(
            executor.execute_one(&mut job),
            Err(ExecutionError::Persist(JobStoreError::Storage(_)))
        ));
        assert!(matches!(job.status, JobStatus::DeadLettered { .. }));
    }
}
