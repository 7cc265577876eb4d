//! In-process fallback backend.
//!
//! Records live in a [`LocalJobStore`] shared by every local queue the
//! gateway creates, so status lookups keep working across backend swaps.
//! Each job runs as its own spawned task; there is no pooling, persistence,
//! or retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pixelforge_core::error::AppError;
use pixelforge_core::result::AppResult;
use pixelforge_core::types::job::{
    BackendKind, JobOptions, JobPayload, JobState, JobStatus, QueueCounts,
};
use pixelforge_core::types::operation::OperationType;

use super::JobQueue;
use crate::processor::{JobContext, JobProcessor, ProgressSink, execute_attempt};

/// Prefix of every id issued by the local backend.
pub const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Debug, Clone)]
struct LocalJob {
    operation: OperationType,
    payload: JobPayload,
    options: JobOptions,
    state: JobState,
    progress: u8,
    result: Option<Value>,
    error: Option<String>,
    scheduled: bool,
    finished_at: Option<Instant>,
}

impl LocalJob {
    fn status(&self, id: &str) -> JobStatus {
        JobStatus {
            id: id.to_string(),
            state: self.state,
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// Job records of the local backend.
#[derive(Debug, Clone, Default)]
pub struct LocalJobStore {
    jobs: Arc<DashMap<String, LocalJob>>,
}

impl LocalJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Normalised status of a job.
    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.jobs.get(id).map(|job| job.status(id))
    }

    /// Counters for one operation.
    pub fn counts(&self, operation: OperationType) -> QueueCounts {
        let mut counts = QueueCounts {
            backend: BackendKind::Local,
            waiting: 0,
            active: 0,
            completed: 0,
            failed: 0,
        };
        for entry in self.jobs.iter().filter(|e| e.operation == operation) {
            match entry.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Drop finished records older than `retention`.
    pub fn prune(&self, retention: Duration) {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            job.finished_at
                .is_none_or(|finished| finished.elapsed() < retention)
        });
        let removed = before.saturating_sub(self.jobs.len());
        if removed > 0 {
            debug!(removed, "Pruned finished local jobs");
        }
    }

    fn insert(&self, id: String, job: LocalJob) {
        self.jobs.insert(id, job);
    }

    /// Waiting -> Active. False if the job is gone or already started.
    fn mark_active(&self, id: &str) -> bool {
        match self.jobs.get_mut(id) {
            Some(mut job) if job.state == JobState::Waiting => {
                job.state = JobState::Active;
                true
            }
            _ => false,
        }
    }

    fn set_progress(&self, id: &str, progress: u8) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.state == JobState::Active {
                job.progress = progress;
            }
        }
    }

    /// Record the terminal outcome. Terminal records are never rewritten.
    fn finish(&self, id: &str, outcome: Result<Value, String>) {
        let Some(mut job) = self.jobs.get_mut(id) else {
            return;
        };
        if job.state.is_terminal() {
            return;
        }
        match outcome {
            Ok(result) => {
                job.state = JobState::Completed;
                job.progress = 100;
                job.result = Some(result);
            }
            Err(message) => {
                job.state = JobState::Failed;
                job.error = Some(message);
            }
        }
        job.finished_at = Some(Instant::now());
    }

    /// Mark one waiting job as scheduled. False if someone else already did.
    fn claim(&self, id: &str) -> bool {
        match self.jobs.get_mut(id) {
            Some(mut job) if job.state == JobState::Waiting && !job.scheduled => {
                job.scheduled = true;
                true
            }
            _ => false,
        }
    }

    /// Mark every unscheduled waiting job of `operation` as scheduled and
    /// return them.
    fn claim_unscheduled(
        &self,
        operation: OperationType,
    ) -> Vec<(String, JobPayload, JobOptions)> {
        let mut claimed = Vec::new();
        for mut entry in self.jobs.iter_mut() {
            let (id, job) = entry.pair_mut();
            if job.operation == operation && job.state == JobState::Waiting && !job.scheduled {
                job.scheduled = true;
                claimed.push((id.clone(), job.payload.clone(), job.options));
            }
        }
        claimed
    }
}

#[async_trait]
impl ProgressSink for LocalJobStore {
    async fn report(&self, job_id: &str, progress: u8) -> AppResult<()> {
        self.set_progress(job_id, progress);
        Ok(())
    }
}

#[derive(Debug)]
struct LocalQueueInner {
    operation: OperationType,
    store: LocalJobStore,
    processor: RwLock<Option<Arc<dyn JobProcessor>>>,
    closed: AtomicBool,
    retention: Duration,
}

/// Local queue for one operation type.
#[derive(Debug, Clone)]
pub struct LocalQueue {
    inner: Arc<LocalQueueInner>,
}

impl LocalQueue {
    /// Create a queue writing into `store`.
    pub fn new(operation: OperationType, store: LocalJobStore, retention: Duration) -> Self {
        Self {
            inner: Arc::new(LocalQueueInner {
                operation,
                store,
                processor: RwLock::new(None),
                closed: AtomicBool::new(false),
                retention,
            }),
        }
    }

    /// Operation served by this queue.
    pub fn operation(&self) -> OperationType {
        self.inner.operation
    }

    /// Whether [`close`](JobQueue::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether a processor is attached.
    pub fn has_processor(&self) -> bool {
        self.inner
            .processor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Attach the processor and schedule jobs that were waiting for one.
    ///
    /// Returns how many waiting jobs were scheduled.
    pub fn set_processor(&self, processor: Arc<dyn JobProcessor>) -> usize {
        *self
            .inner
            .processor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(processor.clone());

        let pending = self.inner.store.claim_unscheduled(self.inner.operation);
        let count = pending.len();
        for (id, payload, options) in pending {
            self.schedule(processor.clone(), id, payload, options);
        }
        if count > 0 {
            info!(operation = %self.inner.operation, count, "Scheduled waiting local jobs");
        }
        count
    }

    /// Detach the processor. New jobs wait until one is attached again.
    pub fn clear_processor(&self) {
        *self
            .inner
            .processor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn current_processor(&self) -> Option<Arc<dyn JobProcessor>> {
        self.inner
            .processor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the job on its own task, never inline with the caller.
    fn schedule(
        &self,
        processor: Arc<dyn JobProcessor>,
        id: String,
        payload: JobPayload,
        options: JobOptions,
    ) {
        let store = self.inner.store.clone();
        let operation = self.inner.operation;

        tokio::spawn(async move {
            if !store.mark_active(&id) {
                return;
            }

            let ctx = JobContext::new(
                id.clone(),
                operation,
                payload,
                options,
                0,
                Arc::new(store.clone()),
            );
            match execute_attempt(&processor, &ctx).await {
                Ok(result) => {
                    debug!(job_id = %id, operation = %operation, "Local job completed");
                    store.finish(&id, Ok(result));
                }
                Err(e) => {
                    warn!(job_id = %id, operation = %operation, error = %e, "Local job failed");
                    store.finish(&id, Err(e.to_string()));
                }
            }
        });
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn add(&self, payload: JobPayload, options: JobOptions) -> AppResult<String> {
        if self.is_closed() {
            return Err(AppError::service_unavailable(format!(
                "Local queue for {} is closed",
                self.inner.operation
            )));
        }

        self.inner.store.prune(self.inner.retention);

        let id = format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4());
        // Insert before reading the processor: a concurrent `set_processor`
        // either drains this record or is seen here, and `claim` lets only
        // one of them schedule it.
        self.inner.store.insert(
            id.clone(),
            LocalJob {
                operation: self.inner.operation,
                payload: payload.clone(),
                options,
                state: JobState::Waiting,
                progress: 0,
                result: None,
                error: None,
                scheduled: false,
                finished_at: None,
            },
        );

        if let Some(processor) = self.current_processor() {
            if self.inner.store.claim(&id) {
                self.schedule(processor, id.clone(), payload, options);
            }
        }

        debug!(job_id = %id, operation = %self.inner.operation, "Job added to local queue");
        Ok(id)
    }

    async fn get_job(&self, id: &str) -> AppResult<Option<JobStatus>> {
        Ok(self.inner.store.status(id))
    }

    async fn counts(&self) -> AppResult<QueueCounts> {
        Ok(self.inner.store.counts(self.inner.operation))
    }

    async fn close(&self) -> AppResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.clear_processor();
        debug!(operation = %self.inner.operation, "Local queue closed");
        Ok(())
    }
}
