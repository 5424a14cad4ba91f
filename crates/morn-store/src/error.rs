//! Error types for the morn-store crate.
//!
//! All thread store operations return [`StoreError`] via [`StoreResult`].
//! Uses `thiserror` for ergonomic, zero-cost error definitions.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a thread store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend could not serve the request (connection lost, quota, ...).
    #[error("thread store backend unavailable: {0}")]
    Backend(String),
}
