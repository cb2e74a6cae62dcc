//! Convenience result type alias for PlugHost.

use crate::error::AppError;

/// A specialized `Result` type for PlugHost operations.
pub type AppResult<T> = Result<T, AppError>;
