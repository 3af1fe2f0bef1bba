//! Pool error types.

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by the connection pool.
///
/// Connect failures on a single connection are silent at the pool level
/// while other connections remain; they only reach callers through
/// [`PoolError::PoolExhausted`] once the pool has no live connection left.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("connection failed: {0}")]
    ConnectFailure(String),

    #[error("connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("deferred call already resolved")]
    DoubleResolution,

    #[error("connection pool closed")]
    Closed,

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}
