//! Convenience result type alias for PhotoBatch.

use crate::error::AppError;

/// A specialized `Result` type for PhotoBatch operations.
pub type AppResult<T> = Result<T, AppError>;
