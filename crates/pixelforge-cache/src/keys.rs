//! Redis key layout for the distributed queue backend.
//!
//! Centralising key construction prevents typos and makes it easy
//! to find every key the backend touches.
//!
//! For a queue `image-compress` under prefix `pixelforge:`:
//!
//! | key                                   | type   | content                       |
//! |---------------------------------------|--------|-------------------------------|
//! | `pixelforge:image-compress:wait`      | list   | waiting job ids (FIFO)        |
//! | `pixelforge:image-compress:active`    | list   | ids being processed           |
//! | `pixelforge:image-compress:completed` | zset   | finished ids by finish time   |
//! | `pixelforge:image-compress:failed`    | zset   | failed ids by finish time     |
//! | `pixelforge:image-compress:job:<id>`  | hash   | job fields                    |
//!
//! Job ids are UUIDv7 strings, so they never collide across queues or after
//! the store loses its data.

/// Hash field: JSON payload.
pub const FIELD_DATA: &str = "data";
/// Hash field: JSON job options.
pub const FIELD_OPTS: &str = "opts";
/// Hash field: submission time (ms since epoch).
pub const FIELD_TIMESTAMP: &str = "timestamp";
/// Hash field: time the current attempt started.
pub const FIELD_PROCESSED_ON: &str = "processedOn";
/// Hash field: time the job reached a terminal state.
pub const FIELD_FINISHED_ON: &str = "finishedOn";
/// Hash field: final failure message. Present only on failed jobs.
pub const FIELD_FAILED_REASON: &str = "failedReason";
/// Hash field: failure message of the last retried attempt.
pub const FIELD_LAST_ERROR: &str = "lastError";
/// Hash field: JSON result.
pub const FIELD_RETURN_VALUE: &str = "returnvalue";
/// Hash field: progress percentage.
pub const FIELD_PROGRESS: &str = "progress";
/// Hash field: attempts already made.
pub const FIELD_ATTEMPTS_MADE: &str = "attemptsMade";

/// Key builder for one logical queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    base: String,
}

impl QueueKeys {
    /// Keys for `queue_name` under `prefix` (which should end with `:`).
    pub fn new(prefix: &str, queue_name: &str) -> Self {
        Self {
            base: format!("{prefix}{queue_name}"),
        }
    }

    /// Waiting list.
    pub fn wait(&self) -> String {
        format!("{}:wait", self.base)
    }

    /// Active list.
    pub fn active(&self) -> String {
        format!("{}:active", self.base)
    }

    /// Completed set.
    pub fn completed(&self) -> String {
        format!("{}:completed", self.base)
    }

    /// Failed set.
    pub fn failed(&self) -> String {
        format!("{}:failed", self.base)
    }

    /// Hash of one job.
    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{id}", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_share_queue_base() {
        let keys = QueueKeys::new("pixelforge:", "image-crop");
        assert_eq!(keys.wait(), "pixelforge:image-crop:wait");
        assert_eq!(keys.job("42"), "pixelforge:image-crop:job:42");
        assert_ne!(keys.completed(), keys.failed());
    }
}
