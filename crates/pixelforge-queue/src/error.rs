//! Job execution errors.

use pixelforge_core::error::AppError;

/// Error from job execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure: do not retry.
    #[error("{0}")]
    Permanent(String),

    /// Transient failure: may retry on the distributed backend.
    #[error("{0}")]
    Transient(String),

    /// Internal error.
    #[error("{0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
