//! Pool error types.

use std::time::Duration;

use authpool_auth::AuthError;
use thiserror::Error;

use crate::connector::ConnectorError;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No connection became available before the acquire deadline.
    #[error("pool exhausted: no connection available after {waited:?} (max {max})")]
    PoolExhausted {
        /// Configured maximum pool size.
        max: u32,
        /// How long the caller waited.
        waited: Duration,
    },

    /// Credentials could not be resolved, or the server rejected them.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[source] AuthError),

    /// The pool has been shut down.
    #[error("pool is closed")]
    PoolClosed,

    /// Caller misuse, such as releasing a connection into the wrong pool.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Pool configuration is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Opening a physical connection failed.
    #[error("connection failed: {0}")]
    Connect(#[source] ConnectorError),

    /// The acquire was cancelled by the caller.
    #[error("acquire cancelled")]
    Cancelled,
}

impl PoolError {
    /// Whether calling `acquire` again may succeed without intervention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted { .. } => true,
            Self::Connect(e) => e.is_transient(),
            _ => false,
        }
    }
}
