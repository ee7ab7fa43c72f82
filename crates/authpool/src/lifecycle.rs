//! Connection lifecycle tracking.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connector::ConnectorError;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Sitting in the idle set, owned by the pool.
    Idle,
    /// Checked out by a caller.
    InUse,
    /// Being probed before checkout.
    Validating,
    /// Closed or about to be; the pool no longer tracks it.
    Retired,
}

/// Why a connection left circulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetireReason {
    /// The caller reported it broken.
    Poisoned,
    /// Older than `max_lifetime`.
    MaxLifetime,
    /// Idle longer than `idle_timeout`.
    IdleTimeout,
    /// The liveness probe failed or timed out.
    ValidationFailed,
    /// Still checked out when the shutdown grace period ran out.
    Revoked,
    /// Returned after the pool was shut down.
    PoolClosed,
    /// The acquire that held it was dropped mid-flight.
    Abandoned,
}

impl RetireReason {
    /// Short label for log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poisoned => "poisoned",
            Self::MaxLifetime => "max_lifetime",
            Self::IdleTimeout => "idle_timeout",
            Self::ValidationFailed => "validation_failed",
            Self::Revoked => "revoked",
            Self::PoolClosed => "pool_closed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for RetireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping the pool keeps for each physical connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-unique connection id.
    pub id: u64,
    /// When the physical connection was opened.
    pub created_at: Instant,
    /// When the connection was last returned to the pool.
    pub last_used_at: Instant,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Number of checkouts served.
    pub checkouts: u64,
}

impl ConnectionMetadata {
    pub(crate) fn new(id: u64, now: Instant) -> Self {
        Self {
            id,
            created_at: now,
            last_used_at: now,
            state: ConnectionState::InUse,
            checkouts: 0,
        }
    }

    /// Age of the connection at `now`.
    #[must_use]
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Time since the connection was last returned, at `now`.
    #[must_use]
    pub fn idle_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    /// The bound this connection exceeds at `now`, if any. Zero bounds are
    /// unbounded.
    #[must_use]
    pub fn expiry_at(
        &self,
        now: Instant,
        max_lifetime: Duration,
        idle_timeout: Duration,
    ) -> Option<RetireReason> {
        if !max_lifetime.is_zero() && self.age_at(now) > max_lifetime {
            return Some(RetireReason::MaxLifetime);
        }
        if !idle_timeout.is_zero() && self.idle_at(now) > idle_timeout {
            return Some(RetireReason::IdleTimeout);
        }
        None
    }
}

/// Outcome of probing an idle connection.
#[derive(Debug)]
pub enum HealthCheckResult {
    /// The probe succeeded.
    Healthy,
    /// The connector reported an error.
    Failed(ConnectorError),
    /// The probe did not finish within `validation_timeout`.
    TimedOut,
}

impl HealthCheckResult {
    /// Whether the connection may be handed out.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// A physical connection together with its pool bookkeeping.
pub(crate) struct Connection<H> {
    pub(crate) handle: H,
    pub(crate) meta: ConnectionMetadata,
    /// Cancelled when shutdown revokes the connection from its holder.
    pub(crate) revoked: CancellationToken,
}

impl<H> Connection<H> {
    pub(crate) fn new(id: u64, handle: H, revoked: CancellationToken) -> Self {
        Self {
            handle,
            meta: ConnectionMetadata::new(id, Instant::now()),
            revoked,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.meta.id
    }
}
