//! Redis-backed distributed queue.
//!
//! A job is a hash plus its id in exactly one of the wait list, the active
//! list, or a finished sorted set. No state field is stored; state is
//! derived from the `processedOn`, `finishedOn`, `returnvalue`, and
//! `failedReason` fields. `failedReason` is written only by a final failure;
//! retried attempts leave their message in `lastError`.
//! Multi-key transitions run as Lua scripts so they stay atomic.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use pixelforge_cache::keys::{
    FIELD_ATTEMPTS_MADE, FIELD_DATA, FIELD_FAILED_REASON, FIELD_FINISHED_ON, FIELD_LAST_ERROR,
    FIELD_OPTS, FIELD_PROCESSED_ON, FIELD_PROGRESS, FIELD_RETURN_VALUE, FIELD_TIMESTAMP,
    QueueKeys,
};
use pixelforge_cache::redis::{RedisClient, store_error};
use pixelforge_core::config::queue::QueueConfig;
use pixelforge_core::error::AppError;
use pixelforge_core::result::AppResult;
use pixelforge_core::types::job::{
    BackendKind, JobOptions, JobPayload, JobState, JobStatus, QueueCounts,
};
use pixelforge_core::types::operation::OperationType;

use super::JobQueue;
use crate::processor::ProgressSink;

/// Move the oldest waiting id to the active list and stamp `processedOn`.
///
/// KEYS[1] = wait list, KEYS[2] = active list
/// ARGV[1] = job key prefix, ARGV[2] = now (ms)
///
/// Returns the id, or nil when the queue is empty or the hash has expired.
const CLAIM_SCRIPT: &str = r#"
    local id = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
    if not id then
        return false
    end
    local job_key = ARGV[1] .. id
    if redis.call('EXISTS', job_key) == 0 then
        redis.call('LREM', KEYS[2], 0, id)
        return false
    end
    redis.call('HSET', job_key, 'processedOn', ARGV[2])
    return id
"#;

/// Record a terminal outcome. A job that already finished is left untouched.
///
/// KEYS[1] = active list, KEYS[2] = finished set, KEYS[3] = job hash
/// ARGV[1] = id, ARGV[2] = now (ms), ARGV[3] = retention (s),
/// ARGV[4] = outcome field, ARGV[5] = outcome value, ARGV[6] = attempts made,
/// ARGV[7] = final progress ('' to keep)
const FINISH_SCRIPT: &str = r#"
    redis.call('LREM', KEYS[1], 0, ARGV[1])
    if redis.call('EXISTS', KEYS[3]) == 0 then
        return 0
    end
    if redis.call('HEXISTS', KEYS[3], 'finishedOn') == 1 then
        return 0
    end
    redis.call('HSET', KEYS[3], ARGV[4], ARGV[5], 'finishedOn', ARGV[2], 'attemptsMade', ARGV[6])
    if ARGV[4] == 'returnvalue' then
        redis.call('HDEL', KEYS[3], 'failedReason')
    end
    if ARGV[7] ~= '' then
        redis.call('HSET', KEYS[3], 'progress', ARGV[7])
    end
    redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
    local ttl = tonumber(ARGV[3])
    if ttl > 0 then
        redis.call('EXPIRE', KEYS[3], ttl)
        redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', tonumber(ARGV[2]) - ttl * 1000)
    end
    return 1
"#;

/// Take a failed attempt out of the active list so it can be requeued.
///
/// KEYS[1] = active list, KEYS[2] = job hash
/// ARGV[1] = id, ARGV[2] = failure reason, ARGV[3] = attempts made
const RETRY_SCRIPT: &str = r#"
    redis.call('LREM', KEYS[1], 0, ARGV[1])
    if redis.call('EXISTS', KEYS[2]) == 0 then
        return 0
    end
    redis.call('HDEL', KEYS[2], 'processedOn')
    redis.call('HSET', KEYS[2], 'lastError', ARGV[2], 'attemptsMade', ARGV[3], 'progress', '0')
    return 1
"#;

/// A job taken off the wait list by a consumer.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// Job id.
    pub id: String,
    /// Submitted payload.
    pub payload: JobPayload,
    /// Options resolved at submission.
    pub options: JobOptions,
    /// Attempts that already failed.
    pub attempts_made: u32,
}

#[derive(Debug)]
struct RedisQueueInner {
    client: RedisClient,
    operation: OperationType,
    keys: QueueKeys,
    job_prefix: String,
    completed_retention_secs: u64,
    failed_retention_secs: u64,
    closed: AtomicBool,
}

/// Distributed queue for one operation type.
#[derive(Debug, Clone)]
pub struct RedisQueue {
    inner: Arc<RedisQueueInner>,
}

impl RedisQueue {
    /// Create a queue on an established connection.
    pub fn new(client: RedisClient, operation: OperationType, config: &QueueConfig) -> Self {
        let keys = QueueKeys::new(client.prefix(), &operation.queue_name());
        let job_prefix = keys.job("");
        Self {
            inner: Arc::new(RedisQueueInner {
                client,
                operation,
                keys,
                job_prefix,
                completed_retention_secs: config.completed_retention_seconds,
                failed_retention_secs: config.failed_retention_seconds,
                closed: AtomicBool::new(false),
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

    /// Take the oldest waiting job, if any.
    ///
    /// A claimed job whose hash cannot be decoded is failed on the spot so it
    /// does not stay in the active list.
    pub async fn claim_next(&self) -> AppResult<Option<ClaimedJob>> {
        let mut conn = self.inner.client.conn_mut();
        let keys = &self.inner.keys;

        loop {
            let claimed: Option<String> = redis::Script::new(CLAIM_SCRIPT)
                .key(keys.wait())
                .key(keys.active())
                .arg(&self.inner.job_prefix)
                .arg(now_ms())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| store_error("Failed to claim job", e))?;

            let Some(id) = claimed else {
                return Ok(None);
            };

            let fields: HashMap<String, String> = conn
                .hgetall(keys.job(&id))
                .await
                .map_err(|e| store_error("Failed to load claimed job", e))?;

            match decode_claimed(&id, &fields) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => {
                    warn!(job_id = %id, queue = %keys.wait(), error = %e, "Claimed job is unreadable, failing it");
                    self.fail(&id, &e.message, attempts_made(&fields)).await?;
                }
            }
        }
    }

    /// Record a successful result.
    pub async fn complete(&self, id: &str, result: &Value, attempts_made: u32) -> AppResult<()> {
        let value = serde_json::to_string(result)?;
        self.finish(
            id,
            &self.inner.keys.completed(),
            self.inner.completed_retention_secs,
            FIELD_RETURN_VALUE,
            &value,
            attempts_made,
            "100",
        )
        .await
    }

    /// Record a final failure.
    pub async fn fail(&self, id: &str, reason: &str, attempts_made: u32) -> AppResult<()> {
        self.finish(
            id,
            &self.inner.keys.failed(),
            self.inner.failed_retention_secs,
            FIELD_FAILED_REASON,
            reason,
            attempts_made,
            "",
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        id: &str,
        finished_set: &str,
        retention_secs: u64,
        field: &str,
        value: &str,
        attempts_made: u32,
        progress: &str,
    ) -> AppResult<()> {
        let mut conn = self.inner.client.conn_mut();
        let updated: i64 = redis::Script::new(FINISH_SCRIPT)
            .key(self.inner.keys.active())
            .key(finished_set)
            .key(self.inner.keys.job(id))
            .arg(id)
            .arg(now_ms())
            .arg(retention_secs)
            .arg(field)
            .arg(value)
            .arg(attempts_made)
            .arg(progress)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("Failed to record job outcome", e))?;

        if updated == 0 {
            debug!(job_id = %id, "Job already finished or expired, outcome dropped");
        }
        Ok(())
    }

    /// Record a failed attempt and requeue the job after `delay`.
    pub async fn retry(
        &self,
        id: &str,
        reason: &str,
        attempts_made: u32,
        delay: Duration,
    ) -> AppResult<()> {
        let mut conn = self.inner.client.conn_mut();
        let updated: i64 = redis::Script::new(RETRY_SCRIPT)
            .key(self.inner.keys.active())
            .key(self.inner.keys.job(id))
            .arg(id)
            .arg(reason)
            .arg(attempts_made)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("Failed to record retry", e))?;

        if updated == 0 {
            return Ok(());
        }

        let wait = self.inner.keys.wait();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let pushed: redis::RedisResult<i64> = conn.lpush(&wait, &id).await;
            if let Err(e) = pushed {
                error!(job_id = %id, error = %e, "Failed to requeue job after backoff");
            }
        });
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn add(&self, payload: JobPayload, options: JobOptions) -> AppResult<String> {
        if self.is_closed() {
            return Err(AppError::service_unavailable(format!(
                "Distributed queue for {} is closed",
                self.inner.operation
            )));
        }

        let mut conn = self.inner.client.conn_mut();
        let keys = &self.inner.keys;

        let id = new_job_id();

        let fields = [
            (FIELD_DATA, serde_json::to_string(&payload)?),
            (FIELD_OPTS, serde_json::to_string(&options)?),
            (FIELD_TIMESTAMP, now_ms().to_string()),
            (FIELD_ATTEMPTS_MADE, "0".to_string()),
            (FIELD_PROGRESS, "0".to_string()),
        ];

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(keys.job(&id), &fields)
            .ignore()
            .lpush(keys.wait(), &id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("Failed to enqueue job", e))?;

        debug!(job_id = %id, queue = %keys.wait(), "Job added to distributed queue");
        Ok(id)
    }

    async fn get_job(&self, id: &str) -> AppResult<Option<JobStatus>> {
        let mut conn = self.inner.client.conn_mut();
        let fields: HashMap<String, String> = conn
            .hgetall(self.inner.keys.job(id))
            .await
            .map_err(|e| store_error("Failed to read job", e))?;

        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(status_from_fields(id, &fields)))
    }

    async fn counts(&self) -> AppResult<QueueCounts> {
        let mut conn = self.inner.client.conn_mut();
        let keys = &self.inner.keys;

        let (waiting, active, completed, failed): (u64, u64, u64, u64) = redis::pipe()
            .llen(keys.wait())
            .llen(keys.active())
            .zcard(keys.completed())
            .zcard(keys.failed())
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("Failed to read queue counts", e))?;

        Ok(QueueCounts {
            backend: BackendKind::Distributed,
            waiting,
            active,
            completed,
            failed,
        })
    }

    async fn close(&self) -> AppResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        debug!(operation = %self.inner.operation, "Distributed queue closed");
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for RedisQueue {
    async fn report(&self, job_id: &str, progress: u8) -> AppResult<()> {
        let mut conn = self.inner.client.conn_mut();
        let _: () = conn
            .hset(self.inner.keys.job(job_id), FIELD_PROGRESS, u32::from(progress))
            .await
            .map_err(|e| store_error("Failed to record progress", e))?;
        Ok(())
    }
}

/// Derive the job state from timestamps and the outcome fields.
///
/// A finished job with a `returnvalue` completed, whatever failed before it.
/// A retried job has no `finishedOn`, so it reads as waiting until it is
/// claimed again.
pub fn derive_state(fields: &HashMap<String, String>) -> JobState {
    if fields.contains_key(FIELD_FINISHED_ON) {
        if fields.contains_key(FIELD_FAILED_REASON) && !fields.contains_key(FIELD_RETURN_VALUE) {
            JobState::Failed
        } else {
            JobState::Completed
        }
    } else if fields.contains_key(FIELD_PROCESSED_ON) {
        JobState::Active
    } else {
        JobState::Waiting
    }
}

/// Decode a claimed job hash.
pub fn decode_claimed(id: &str, fields: &HashMap<String, String>) -> AppResult<ClaimedJob> {
    let payload = match fields.get(FIELD_DATA) {
        Some(data) => serde_json::from_str(data).map_err(|e| {
            AppError::validation(format!("Job {id} has an unreadable payload: {e}"))
        })?,
        None => JobPayload::default(),
    };
    let options = match fields.get(FIELD_OPTS) {
        Some(opts) => serde_json::from_str(opts).map_err(|e| {
            AppError::validation(format!("Job {id} has unreadable options: {e}"))
        })?,
        None => return Err(AppError::validation(format!("Job {id} has no options"))),
    };

    Ok(ClaimedJob {
        id: id.to_string(),
        payload,
        options,
        attempts_made: attempts_made(fields),
    })
}

fn attempts_made(fields: &HashMap<String, String>) -> u32 {
    fields
        .get(FIELD_ATTEMPTS_MADE)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Time-ordered id, unique across queues and store restarts.
fn new_job_id() -> String {
    Uuid::now_v7().to_string()
}

/// Normalise a job hash into a [`JobStatus`].
pub fn status_from_fields(id: &str, fields: &HashMap<String, String>) -> JobStatus {
    let state = derive_state(fields);
    let progress = fields
        .get(FIELD_PROGRESS)
        .and_then(|p| p.parse::<u8>().ok())
        .unwrap_or(0)
        .min(100);

    let result = match state {
        JobState::Completed => fields.get(FIELD_RETURN_VALUE).and_then(|raw| {
            serde_json::from_str(raw)
                .inspect_err(|e| warn!(job_id = %id, error = %e, "Unreadable job result"))
                .ok()
        }),
        _ => None,
    };
    let error = match state {
        JobState::Failed => fields.get(FIELD_FAILED_REASON).cloned(),
        _ => None,
    };

    JobStatus {
        id: id.to_string(),
        state,
        progress,
        result,
        error,
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
