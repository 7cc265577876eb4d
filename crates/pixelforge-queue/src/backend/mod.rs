//! Queue backends and the tagged instance the gateway binds per operation.

pub mod consumer;
pub mod local;
pub mod redis;

use async_trait::async_trait;

use pixelforge_core::result::AppResult;
use pixelforge_core::types::job::{BackendKind, JobOptions, JobPayload, JobStatus, QueueCounts};
use pixelforge_core::types::operation::OperationType;

pub use self::consumer::{ConsumerHandle, spawn_consumer};
pub use self::local::{LOCAL_ID_PREFIX, LocalJobStore, LocalQueue};
pub use self::redis::RedisQueue;

/// Operations every backend supports.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job and return its id.
    async fn add(&self, payload: JobPayload, options: JobOptions) -> AppResult<String>;

    /// Look up a job. `None` if the backend does not know the id.
    async fn get_job(&self, id: &str) -> AppResult<Option<JobStatus>>;

    /// Current counters.
    async fn counts(&self) -> AppResult<QueueCounts>;

    /// Stop accepting work and release backend resources.
    async fn close(&self) -> AppResult<()>;
}

/// The queue bound to one operation type.
#[derive(Debug, Clone)]
pub enum QueueInstance {
    /// Redis-backed queue.
    Distributed(RedisQueue),
    /// In-process fallback queue.
    Local(LocalQueue),
}

impl QueueInstance {
    /// Backend behind this instance.
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Distributed(_) => BackendKind::Distributed,
            Self::Local(_) => BackendKind::Local,
        }
    }

    /// Operation this instance serves.
    pub fn operation(&self) -> OperationType {
        match self {
            Self::Distributed(inner) => inner.operation(),
            Self::Local(inner) => inner.operation(),
        }
    }
}

#[async_trait]
impl JobQueue for QueueInstance {
    async fn add(&self, payload: JobPayload, options: JobOptions) -> AppResult<String> {
        match self {
            Self::Distributed(inner) => inner.add(payload, options).await,
            Self::Local(inner) => inner.add(payload, options).await,
        }
    }

    async fn get_job(&self, id: &str) -> AppResult<Option<JobStatus>> {
        match self {
            Self::Distributed(inner) => inner.get_job(id).await,
            Self::Local(inner) => inner.get_job(id).await,
        }
    }

    async fn counts(&self) -> AppResult<QueueCounts> {
        match self {
            Self::Distributed(inner) => inner.counts().await,
            Self::Local(inner) => inner.counts().await,
        }
    }

    async fn close(&self) -> AppResult<()> {
        match self {
            Self::Distributed(inner) => inner.close().await,
            Self::Local(inner) => inner.close().await,
        }
    }
}
