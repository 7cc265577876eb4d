//! Convenience result type alias for PixelForge.

use crate::error::AppError;

/// A specialized `Result` type for PixelForge operations.
pub type AppResult<T> = Result<T, AppError>;
