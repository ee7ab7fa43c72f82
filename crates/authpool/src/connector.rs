//! Physical connector interface.
//!
//! The pool never speaks a wire protocol itself. A driver layer implements
//! [`Connector`] to open, probe and close one physical connection; the pool
//! decides when to call each operation.

use async_trait::async_trait;
use authpool_auth::AuthContext;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::ConnectParams;

/// Errors reported by a [`Connector`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectorError {
    /// Network or OS-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected the authentication handshake.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// The server sent something the driver could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation did not finish before its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The connection was already closed by the peer.
    #[error("connection closed")]
    Closed,
}

impl ConnectorError {
    /// Whether a fresh attempt may succeed (network blips, slow servers).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout)
    }
}

/// Driver capability for managing single physical connections.
///
/// Implementations must be cheap to share; the pool keeps one instance and
/// calls it concurrently from many tasks. None of these methods is called
/// while the pool's internal lock is held.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The driver's physical connection handle.
    type Handle: Send + 'static;

    /// Open and authenticate a new physical connection.
    ///
    /// A handshake rejection must be reported as
    /// [`ConnectorError::Authentication`] so the pool can surface it
    /// without retrying.
    async fn open(
        &self,
        auth: &AuthContext,
        params: &ConnectParams,
    ) -> Result<Self::Handle, ConnectorError>;

    /// Lightweight liveness probe. Should give up by `deadline`; the pool
    /// also enforces it.
    async fn ping(&self, handle: &mut Self::Handle, deadline: Instant)
    -> Result<(), ConnectorError>;

    /// Close the physical connection.
    async fn close(&self, handle: Self::Handle) -> Result<(), ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let io = ConnectorError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(io.is_transient());
        assert!(ConnectorError::Timeout.is_transient());
        assert!(!ConnectorError::Authentication("bad ticket".into()).is_transient());
        assert!(!ConnectorError::Protocol("unexpected token".into()).is_transient());
        assert!(!ConnectorError::Closed.is_transient());
    }
}
