//! Connection pool implementation.
//!
//! All bookkeeping (idle stack, in-use set, pending slots, counters) lives
//! behind one lock. Authentication, open, ping and close always run with the
//! lock released.

use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use authpool_auth::{AuthError, CredentialProvider, provider_for};
use parking_lot::Mutex;
use tokio::sync::{Notify, OnceCell};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectParams, PoolConfig};
use crate::connector::{Connector, ConnectorError};
use crate::error::PoolError;
use crate::lifecycle::{
    Connection, ConnectionMetadata, ConnectionState, HealthCheckResult, RetireReason,
};
use crate::reaper;

/// First delay before retrying a transient open failure.
const INITIAL_BACKOFF: Duration = Duration::from_millis(25);
/// Cap on the retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// An authenticated connection pool.
///
/// The pool owns up to `max_pool_size` physical connections opened through
/// a [`Connector`], authenticating each new one through a
/// [`CredentialProvider`]. Idle connections are reused most-recently-returned
/// first and probed before being handed out.
///
/// `Pool` is a cheap handle; clones share the same connections. Call
/// [`shutdown`](Pool::shutdown) to close them; dropping every handle only
/// drops the idle connections without closing them.
///
/// Waiters are not served in FIFO order. Whichever waiter is woken first
/// gets the freed connection, so a waiter can starve under sustained
/// contention until its timeout.
///
/// # Example
///
/// ```rust,ignore
/// use authpool::{Pool, PoolConfig};
/// use std::time::Duration;
///
/// let pool = Pool::builder(connector)
///     .max_pool_size(8)
///     .idle_timeout(Duration::from_secs(300))
///     .build()
///     .await?;
///
/// let mut conn = pool.acquire().await?;
/// // Use the connection through Deref...
/// conn.release().await?;
///
/// pool.shutdown(Duration::from_secs(5)).await;
/// ```
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.config.pool_name)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) struct PoolInner<C: Connector> {
    config: PoolConfig,
    connector: C,
    provider: Arc<dyn CredentialProvider>,

    state: Mutex<PoolState<C::Handle>>,

    /// One permit per freed connection or slot; every waiter on shutdown.
    available: Notify,

    /// Woken on every return so shutdown can watch the in-use set drain.
    returned: Notify,

    /// Parent of every connection's revocation token.
    revoke: CancellationToken,

    /// Stops the reaper task.
    reaper_stop: CancellationToken,

    /// Outcome of the first shutdown, shared by later calls.
    shutdown: OnceCell<ShutdownReport>,

    /// Counter for generating connection IDs.
    next_connection_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,
}

struct PoolState<H> {
    /// LIFO stack; the most recently returned connection is on top.
    idle: Vec<Connection<H>>,
    in_use: HashSet<u64>,
    /// Revoked connections whose holders have not given them back yet.
    retiring: HashSet<u64>,
    creating: u32,
    validating: u32,
    /// Background closes still running.
    closing: u32,
    closed: bool,
    metrics: PoolMetricsInner,
}

impl<H> PoolState<H> {
    fn total(&self) -> u32 {
        self.idle.len() as u32 + self.in_use.len() as u32 + self.creating + self.validating
    }

    fn is_drained(&self) -> bool {
        self.in_use.is_empty() && self.creating == 0 && self.validating == 0 && self.closing == 0
    }
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_retired: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    validations_performed: u64,
    validations_failed: u64,
    authentication_failures: u64,
}

enum Step<C: Connector> {
    Closed,
    Validate(Reservation<C>),
    Create(Reservation<C>),
    Wait,
}

enum Checkin<H> {
    Idle,
    Retire(Connection<H>, RetireReason),
    Unknown(Connection<H>),
}

impl<C: Connector> Pool<C> {
    /// Create a new pool builder around `connector`.
    #[must_use]
    pub fn builder(connector: C) -> PoolBuilder<C> {
        PoolBuilder::new(connector)
    }

    /// Create a new pool with the given configuration.
    ///
    /// The credential provider is derived from `config.credentials`. For more
    /// control over pool creation, use [`Pool::builder()`].
    pub async fn new(config: PoolConfig, connector: C) -> Result<Self, PoolError> {
        PoolBuilder::new(connector).pool_config(config).build().await
    }

    /// Get a connection, waiting up to the configured `acquire_timeout`.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, PoolError> {
        self.acquire_timeout(self.inner.config.acquire_timeout).await
    }

    /// Get a connection, waiting up to `timeout`.
    ///
    /// The timeout covers the whole call: waiting, validating idle
    /// connections, authenticating and opening a new one.
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledConnection<C>, PoolError> {
        self.acquire_with(&CancellationToken::new(), timeout).await
    }

    /// Get a connection, giving up when `cancel` fires or `timeout` elapses.
    ///
    /// A cancelled or timed-out acquire never holds on to a slot. Dropping
    /// the returned future early is equally safe.
    pub async fn acquire_with(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<PooledConnection<C>, PoolError> {
        let inner = &self.inner;
        let start = Instant::now();
        let deadline = start + timeout;

        tracing::trace!(pool = %inner.config.pool_name, "acquiring connection from pool");

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PoolError::Cancelled),
            res = tokio::time::timeout_at(deadline, inner.acquire(deadline)) => {
                res.unwrap_or_else(|_| {
                    Err(PoolError::PoolExhausted {
                        max: inner.config.max_pool_size,
                        waited: start.elapsed(),
                    })
                })
            }
        };

        {
            let mut state = inner.state.lock();
            match &result {
                Ok(_) => state.metrics.checkouts_successful += 1,
                Err(_) => state.metrics.checkouts_failed += 1,
            }
        }

        match &result {
            Ok(conn) => tracing::trace!(
                pool = %inner.config.pool_name,
                connection_id = conn.id(),
                "connection checked out"
            ),
            Err(e) => tracing::debug!(
                pool = %inner.config.pool_name,
                error = %e,
                "acquire failed"
            ),
        }
        result
    }

    /// Return a connection to this pool.
    ///
    /// With `poisoned` set the connection is closed instead of reused. A
    /// connection from a different pool is rejected with
    /// [`PoolError::InvalidState`] and goes back to its own pool when dropped.
    pub async fn release(&self, conn: PooledConnection<C>, poisoned: bool) -> Result<(), PoolError> {
        if !Arc::ptr_eq(&conn.pool, &self.inner) {
            return Err(PoolError::InvalidState(format!(
                "connection {} belongs to pool '{}', not '{}'",
                conn.id(),
                conn.pool.config.pool_name,
                self.inner.config.pool_name
            )));
        }
        conn.finish(poisoned).await
    }

    /// Probe a checked-out connection within `validation_timeout`.
    pub async fn validate(&self, conn: &mut PooledConnection<C>) -> bool {
        let conn = conn.live_mut();
        conn.meta.state = ConnectionState::Validating;
        let healthy = self.inner.check_health(&mut conn.handle).await.is_healthy();
        conn.meta.state = ConnectionState::InUse;
        healthy
    }

    /// Run one reaper pass now, returning how many idle connections were
    /// retired.
    pub async fn reap(&self) -> usize {
        self.inner.reap().await
    }

    /// Shut the pool down.
    ///
    /// New acquires fail with [`PoolError::PoolClosed`] immediately and
    /// current waiters are woken with the same error. Idle connections are
    /// closed, then in-use connections get up to `grace` to come back.
    /// Stragglers are revoked: their [`PooledConnection::revocation`] token
    /// fires and they are closed as soon as their holder lets go.
    ///
    /// Later calls wait for the first one and return its report.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let inner = &self.inner;
        *inner
            .shutdown
            .get_or_init(|| inner.run_shutdown(grace))
            .await
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len() as u32,
            in_use: state.in_use.len() as u32,
            creating: state.creating,
            validating: state.validating,
            max: self.inner.config.max_pool_size,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let state = self.inner.state.lock();
        let m = &state.metrics;
        PoolMetrics {
            connections_created: m.connections_created,
            connections_retired: m.connections_retired,
            checkouts_successful: m.checkouts_successful,
            checkouts_failed: m.checkouts_failed,
            validations_performed: m.validations_performed,
            validations_failed: m.validations_failed,
            authentication_failures: m.authentication_failures,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The connector this pool opens connections with.
    #[must_use]
    pub fn connector(&self) -> &C {
        &self.inner.connector
    }
}

impl<C: Connector> PoolInner<C> {
    fn name(&self) -> &str {
        &self.config.pool_name
    }

    /// Wake one acquirer and the shutdown watcher after capacity frees up.
    fn wake(&self) {
        self.available.notify_one();
        self.returned.notify_waiters();
    }

    async fn acquire(self: &Arc<Self>, deadline: Instant) -> Result<PooledConnection<C>, PoolError> {
        loop {
            // Register before looking at the state so a release between the
            // check and the wait is not lost.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (step, expired) = self.next_step();
            for (conn, reason) in expired {
                self.close_in_background(conn, reason);
            }

            match step {
                Step::Closed => return Err(PoolError::PoolClosed),
                Step::Validate(mut slot) => {
                    let health = match slot.conn.as_mut() {
                        Some(conn) => self.check_health(&mut conn.handle).await,
                        None => continue,
                    };
                    let Some(conn) = slot.conn.take() else {
                        continue;
                    };

                    if health.is_healthy() {
                        return self.admit(slot, conn);
                    }

                    tracing::warn!(
                        pool = %self.name(),
                        connection_id = conn.id(),
                        result = ?health,
                        "idle connection failed validation"
                    );
                    slot.retire();
                    self.close_in_background(conn, RetireReason::ValidationFailed);
                }
                Step::Create(slot) => {
                    let handle = self.open(deadline).await?;
                    let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                    let conn = Connection::new(id, handle, self.revoke.child_token());
                    tracing::debug!(pool = %self.name(), connection_id = id, "connection opened");
                    return self.admit(slot, conn);
                }
                Step::Wait => notified.await,
            }
        }
    }

    /// Decide what the next acquire attempt does, under the lock. Idle
    /// connections found already expired are handed back for closing.
    fn next_step(self: &Arc<Self>) -> (Step<C>, Vec<(Connection<C::Handle>, RetireReason)>) {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut state = self.state.lock();

        if state.closed {
            return (Step::Closed, expired);
        }

        while let Some(mut conn) = state.idle.pop() {
            if let Some(reason) =
                conn.meta
                    .expiry_at(now, self.config.max_lifetime, self.config.idle_timeout)
            {
                conn.meta.state = ConnectionState::Retired;
                state.metrics.connections_retired += 1;
                expired.push((conn, reason));
                continue;
            }
            conn.meta.state = ConnectionState::Validating;
            state.validating += 1;
            let slot = Reservation::new(self, SlotKind::Validating, Some(conn));
            return (Step::Validate(slot), expired);
        }

        if state.total() < self.config.max_pool_size {
            state.creating += 1;
            return (Step::Create(Reservation::new(self, SlotKind::Creating, None)), expired);
        }

        (Step::Wait, expired)
    }

    fn admit(
        self: &Arc<Self>,
        slot: Reservation<C>,
        conn: Connection<C::Handle>,
    ) -> Result<PooledConnection<C>, PoolError> {
        match slot.promote(conn) {
            Ok(pooled) => Ok(pooled),
            Err(conn) => {
                self.close_in_background(conn, RetireReason::PoolClosed);
                Err(PoolError::PoolClosed)
            }
        }
    }

    /// Authenticate and open one physical connection.
    async fn open(&self, deadline: Instant) -> Result<C::Handle, PoolError> {
        let auth = match self.provider.authenticate().await {
            Ok(auth) => auth,
            Err(e) => {
                self.state.lock().metrics.authentication_failures += 1;
                tracing::warn!(pool = %self.name(), error = %e, "could not resolve credentials");
                return Err(PoolError::AuthenticationFailed(e));
            }
        };

        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.connector.open(&auth, &self.config.connect).await {
                Ok(handle) => {
                    self.state.lock().metrics.connections_created += 1;
                    return Ok(handle);
                }
                Err(ConnectorError::Authentication(reason)) => {
                    self.provider.invalidate();
                    self.state.lock().metrics.authentication_failures += 1;
                    tracing::warn!(pool = %self.name(), reason = %reason, "server rejected credentials");
                    return Err(PoolError::AuthenticationFailed(AuthError::Rejected(reason)));
                }
                Err(e) if e.is_transient() && Instant::now() + backoff < deadline => {
                    tracing::warn!(
                        pool = %self.name(),
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient error opening connection, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(PoolError::Connect(e)),
            }
        }
    }

    async fn check_health(&self, handle: &mut C::Handle) -> HealthCheckResult {
        let deadline = Instant::now() + self.config.validation_timeout;
        let result =
            match tokio::time::timeout_at(deadline, self.connector.ping(handle, deadline)).await {
                Ok(Ok(())) => HealthCheckResult::Healthy,
                Ok(Err(e)) => HealthCheckResult::Failed(e),
                Err(_) => HealthCheckResult::TimedOut,
            };

        let mut state = self.state.lock();
        state.metrics.validations_performed += 1;
        if !result.is_healthy() {
            state.metrics.validations_failed += 1;
        }
        result
    }

    /// Take a connection back from its holder.
    fn checkin(&self, mut conn: Connection<C::Handle>, poisoned: bool) -> Checkin<C::Handle> {
        let now = Instant::now();
        let outcome = {
            let mut state = self.state.lock();
            let id = conn.id();
            let revoked = state.retiring.remove(&id);
            if !revoked && !state.in_use.remove(&id) {
                return Checkin::Unknown(conn);
            }

            conn.meta.last_used_at = now;
            let reason = if poisoned {
                Some(RetireReason::Poisoned)
            } else if revoked {
                Some(RetireReason::Revoked)
            } else if state.closed {
                Some(RetireReason::PoolClosed)
            } else {
                conn.meta
                    .expiry_at(now, self.config.max_lifetime, self.config.idle_timeout)
            };

            match reason {
                Some(reason) => {
                    conn.meta.state = ConnectionState::Retired;
                    state.metrics.connections_retired += 1;
                    Checkin::Retire(conn, reason)
                }
                None => {
                    conn.meta.state = ConnectionState::Idle;
                    state.idle.push(conn);
                    Checkin::Idle
                }
            }
        };

        self.wake();
        outcome
    }

    /// Close a connection the pool no longer tracks. Returns whether the
    /// connector closed it cleanly.
    async fn close(&self, conn: Connection<C::Handle>, reason: RetireReason) -> bool {
        let id = conn.id();
        match self.connector.close(conn.handle).await {
            Ok(()) => {
                tracing::debug!(
                    pool = %self.name(),
                    connection_id = id,
                    reason = %reason,
                    "connection retired"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    pool = %self.name(),
                    connection_id = id,
                    reason = %reason,
                    error = %e,
                    "error closing connection"
                );
                false
            }
        }
    }

    /// Close on a spawned task so neither a drop path nor an acquirer's
    /// deadline waits on the connector. Shutdown waits for these within its
    /// grace period.
    fn close_in_background(self: &Arc<Self>, conn: Connection<C::Handle>, reason: RetireReason) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                self.state.lock().closing += 1;
                let pool = Arc::clone(self);
                runtime.spawn(async move {
                    pool.close(conn, reason).await;
                    {
                        let mut state = pool.state.lock();
                        state.closing = state.closing.saturating_sub(1);
                    }
                    pool.returned.notify_waiters();
                });
            }
            Err(_) => tracing::debug!(
                pool = %self.name(),
                connection_id = conn.id(),
                "no runtime available, dropping connection without close"
            ),
        }
    }

    pub(crate) async fn reap(&self) -> usize {
        let now = Instant::now();
        let expired = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            let mut expired = Vec::new();
            for mut conn in std::mem::take(&mut state.idle) {
                match conn
                    .meta
                    .expiry_at(now, self.config.max_lifetime, self.config.idle_timeout)
                {
                    Some(reason) => {
                        conn.meta.state = ConnectionState::Retired;
                        expired.push((conn, reason));
                    }
                    None => state.idle.push(conn),
                }
            }
            state.metrics.connections_retired += expired.len() as u64;
            expired
        };

        let count = expired.len();
        if count == 0 {
            return 0;
        }
        self.wake();

        for (conn, reason) in expired {
            self.close(conn, reason).await;
        }
        tracing::debug!(pool = %self.name(), reaped = count, "reaper retired idle connections");
        count
    }

    async fn run_shutdown(&self, grace: Duration) -> ShutdownReport {
        let start = Instant::now();
        let (idle, checked_out) = {
            let mut state = self.state.lock();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.metrics.connections_retired += idle.len() as u64;
            (idle, state.in_use.len())
        };

        self.reaper_stop.cancel();
        self.available.notify_waiters();

        tracing::info!(
            pool = %self.name(),
            idle = idle.len(),
            in_use = checked_out,
            grace_ms = grace.as_millis() as u64,
            "shutting down connection pool"
        );

        let mut report = ShutdownReport {
            idle_closed: idle.len(),
            ..ShutdownReport::default()
        };
        for conn in idle {
            if !self.close(conn, RetireReason::PoolClosed).await {
                report.close_errors += 1;
            }
        }

        let deadline = start + grace;
        loop {
            let notified = self.returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().is_drained() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        // Opens still in flight are not waited on past the grace period:
        // the connection is closed by the acquirer once it lands and finds
        // the pool closed.
        let (revoked, pending_opens) = {
            let mut state = self.state.lock();
            let ids: Vec<u64> = state.in_use.drain().collect();
            state.retiring.extend(ids.iter().copied());
            (ids.len(), state.creating as usize)
        };
        if revoked > 0 {
            self.revoke.cancel();
            tracing::warn!(
                pool = %self.name(),
                revoked,
                "connections still checked out after grace period were revoked"
            );
        }

        report.returned = checked_out.saturating_sub(revoked);
        report.revoked = revoked;
        report.pending_opens = pending_opens;
        report.elapsed = start.elapsed();

        tracing::info!(
            pool = %self.name(),
            idle_closed = report.idle_closed,
            returned = report.returned,
            revoked = report.revoked,
            pending_opens = report.pending_opens,
            close_errors = report.close_errors,
            "connection pool shut down"
        );
        report
    }
}

#[derive(Debug, Clone, Copy)]
enum SlotKind {
    Creating,
    Validating,
}

/// Capacity reserved by an in-flight acquire.
///
/// Dropping it without [`promote`](Reservation::promote) or
/// [`retire`](Reservation::retire) gives the slot back and closes any
/// connection it still holds, so an abandoned acquire never leaks capacity.
struct Reservation<C: Connector> {
    pool: Arc<PoolInner<C>>,
    kind: SlotKind,
    conn: Option<Connection<C::Handle>>,
    armed: bool,
}

impl<C: Connector> Reservation<C> {
    fn new(pool: &Arc<PoolInner<C>>, kind: SlotKind, conn: Option<Connection<C::Handle>>) -> Self {
        Self {
            pool: Arc::clone(pool),
            kind,
            conn,
            armed: true,
        }
    }

    fn free_slot(&self, state: &mut PoolState<C::Handle>) {
        match self.kind {
            SlotKind::Creating => state.creating = state.creating.saturating_sub(1),
            SlotKind::Validating => state.validating = state.validating.saturating_sub(1),
        }
    }

    /// Move `conn` into the in-use set. Fails, handing `conn` back for
    /// closing, when the pool shut down in the meantime.
    fn promote(
        mut self,
        mut conn: Connection<C::Handle>,
    ) -> Result<PooledConnection<C>, Connection<C::Handle>> {
        self.armed = false;
        let admitted = {
            let mut state = self.pool.state.lock();
            self.free_slot(&mut state);
            if state.closed {
                state.metrics.connections_retired += 1;
                false
            } else {
                state.in_use.insert(conn.id());
                true
            }
        };

        if !admitted {
            self.pool.wake();
            conn.meta.state = ConnectionState::Retired;
            return Err(conn);
        }

        conn.meta.state = ConnectionState::InUse;
        conn.meta.checkouts += 1;
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.pool),
        })
    }

    /// Give the slot back after the connection it held was discarded.
    fn retire(mut self) {
        self.armed = false;
        {
            let mut state = self.pool.state.lock();
            self.free_slot(&mut state);
            state.metrics.connections_retired += 1;
        }
        self.pool.wake();
    }
}

impl<C: Connector> Drop for Reservation<C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let conn = self.conn.take();
        {
            let mut state = self.pool.state.lock();
            self.free_slot(&mut state);
            if conn.is_some() {
                state.metrics.connections_retired += 1;
            }
        }
        self.pool.wake();

        if let Some(conn) = conn {
            self.pool.close_in_background(conn, RetireReason::Abandoned);
        }
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder(connector)
///     .pool_config(PoolConfig::from_properties(&text, "reports")?)
///     .build()
///     .await?;
/// ```
pub struct PoolBuilder<C: Connector> {
    connector: C,
    pool_config: PoolConfig,
    provider: Option<Arc<dyn CredentialProvider>>,
}

impl<C: Connector> PoolBuilder<C> {
    /// Create a new pool builder with default settings.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            pool_config: PoolConfig::default(),
            provider: None,
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the pool name used in log events.
    #[must_use]
    pub fn pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_config.pool_name = name.into();
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.pool_config.max_pool_size = size;
        self
    }

    /// Set the maximum connection lifetime (zero for unbounded).
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.pool_config.max_lifetime = lifetime;
        self
    }

    /// Set the idle connection timeout (zero for unbounded).
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.idle_timeout = timeout;
        self
    }

    /// Set the validation timeout.
    #[must_use]
    pub fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.validation_timeout = timeout;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.acquire_timeout = timeout;
        self
    }

    /// Run the reaper at a fixed interval.
    #[must_use]
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.pool_config.reaper_interval = Some(interval);
        self
    }

    /// Set the credentials new connections authenticate with.
    #[must_use]
    pub fn credentials(mut self, credentials: authpool_auth::Credentials) -> Self {
        self.pool_config.credentials = credentials;
        self
    }

    /// Set the parameters passed to the connector.
    #[must_use]
    pub fn connect_params(mut self, params: ConnectParams) -> Self {
        self.pool_config.connect = params;
        self
    }

    /// Use `provider` instead of one derived from the configured credentials.
    #[must_use]
    pub fn credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Build the pool and start its reaper.
    ///
    /// Must be called within a Tokio runtime. No connection is opened until
    /// the first acquire.
    pub async fn build(self) -> Result<Pool<C>, PoolError> {
        let config = self.pool_config;
        config.validate()?;

        let provider = match self.provider {
            Some(provider) => provider,
            None => provider_for(&config.credentials)
                .map_err(|e| PoolError::Configuration(e.to_string()))?,
        };

        let inner = Arc::new(PoolInner {
            connector: self.connector,
            provider,
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(config.max_pool_size as usize),
                in_use: HashSet::new(),
                retiring: HashSet::new(),
                creating: 0,
                validating: 0,
                closing: 0,
                closed: false,
                metrics: PoolMetricsInner::default(),
            }),
            available: Notify::new(),
            returned: Notify::new(),
            revoke: CancellationToken::new(),
            reaper_stop: CancellationToken::new(),
            shutdown: OnceCell::new(),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            config,
        });

        if let Some(interval) = reaper::interval_for(&inner.config) {
            reaper::spawn(Arc::downgrade(&inner), interval, inner.reaper_stop.clone());
        }

        tracing::info!(
            pool = %inner.config.pool_name,
            max = inner.config.max_pool_size,
            auth = %inner.provider.mode(),
            "connection pool created"
        );

        Ok(Pool { inner })
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub idle: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Connections being opened.
    pub creating: u32,
    /// Idle connections being probed before checkout.
    pub validating: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Connections counted against `max`.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.idle + self.in_use + self.creating + self.validating
    }

    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total() >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Physical connections opened since pool start.
    pub connections_created: u64,
    /// Connections taken out of circulation since pool start.
    pub connections_retired: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (timeouts, pool closed, auth failures, etc.).
    pub checkouts_failed: u64,
    /// Liveness probes performed.
    pub validations_performed: u64,
    /// Liveness probes that failed or timed out.
    pub validations_failed: u64,
    /// Credential resolution failures and server-side rejections.
    pub authentication_failures: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate validation success rate (0.0 to 1.0).
    #[must_use]
    pub fn validation_success_rate(&self) -> f64 {
        if self.validations_performed == 0 {
            return 1.0;
        }
        let successful = self.validations_performed - self.validations_failed;
        successful as f64 / self.validations_performed as f64
    }
}

/// What [`Pool::shutdown`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Idle connections closed.
    pub idle_closed: usize,
    /// In-use connections returned within the grace period.
    pub returned: usize,
    /// In-use connections revoked after the grace period.
    pub revoked: usize,
    /// Opens still in flight when the grace period ran out. Each is closed
    /// as soon as it completes.
    pub pending_opens: usize,
    /// Idle connections whose close reported an error.
    pub close_errors: usize,
    /// Time the shutdown took.
    pub elapsed: Duration,
}

/// A connection retrieved from the pool.
///
/// Derefs to the connector's handle. When dropped, the connection is
/// returned to the pool; use [`release`](PooledConnection::release) to do
/// so explicitly, [`poison`](PooledConnection::poison) to discard it, or
/// [`detach`](PooledConnection::detach) to take the handle out of the pool.
pub struct PooledConnection<C: Connector> {
    /// Present until the guard is consumed or dropped.
    conn: Option<Connection<C::Handle>>,
    /// Reference to the pool for returning the connection.
    pool: Arc<PoolInner<C>>,
}

impl<C: Connector> PooledConnection<C> {
    #[allow(clippy::expect_used)]
    fn live(&self) -> &Connection<C::Handle> {
        self.conn
            .as_ref()
            .expect("connection is present until the guard is consumed")
    }

    #[allow(clippy::expect_used)]
    fn live_mut(&mut self) -> &mut Connection<C::Handle> {
        self.conn
            .as_mut()
            .expect("connection is present until the guard is consumed")
    }

    /// Pool-unique connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.live().id()
    }

    /// Get the connection metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.live().meta
    }

    /// Token cancelled when shutdown revokes this connection. Long-running
    /// work should watch it and give the connection back.
    #[must_use]
    pub fn revocation(&self) -> CancellationToken {
        self.live().revoked.clone()
    }

    /// Whether shutdown has revoked this connection.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.live().revoked.is_cancelled()
    }

    /// Return the connection to the pool.
    pub async fn release(self) -> Result<(), PoolError> {
        self.finish(false).await
    }

    /// Report the connection broken; it is closed and never handed out again.
    pub async fn poison(self) -> Result<(), PoolError> {
        self.finish(true).await
    }

    /// Detach the connection from the pool.
    ///
    /// The pool forgets the connection and frees its slot; closing the
    /// returned handle is up to the caller.
    pub fn detach(mut self) -> C::Handle {
        let conn = self.take_live();
        {
            let mut state = self.pool.state.lock();
            if state.in_use.remove(&conn.id()) || state.retiring.remove(&conn.id()) {
                state.metrics.connections_retired += 1;
            }
        }
        self.pool.wake();
        tracing::debug!(
            pool = %self.pool.name(),
            connection_id = conn.id(),
            "connection detached from pool"
        );
        conn.handle
    }

    #[allow(clippy::expect_used)]
    fn take_live(&mut self) -> Connection<C::Handle> {
        self.conn
            .take()
            .expect("connection is present until the guard is consumed")
    }

    async fn finish(mut self, poisoned: bool) -> Result<(), PoolError> {
        let conn = self.take_live();
        let pool = Arc::clone(&self.pool);
        drop(self);

        tracing::trace!(
            pool = %pool.name(),
            connection_id = conn.id(),
            poisoned,
            "returning connection to pool"
        );

        match pool.checkin(conn, poisoned) {
            Checkin::Idle => Ok(()),
            Checkin::Retire(conn, reason) => {
                pool.close(conn, reason).await;
                Ok(())
            }
            Checkin::Unknown(conn) => {
                let id = conn.id();
                pool.close(conn, RetireReason::Abandoned).await;
                Err(PoolError::InvalidState(format!(
                    "connection {id} is not checked out from pool '{}'",
                    pool.name()
                )))
            }
        }
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Handle;

    fn deref(&self) -> &Self::Target {
        &self.live().handle
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.live_mut().handle
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name())
            .field("metadata", &self.conn.as_ref().map(|c| &c.meta))
            .finish()
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        tracing::trace!(
            pool = %self.pool.name(),
            connection_id = conn.id(),
            "returning connection to pool"
        );

        match self.pool.checkin(conn, false) {
            Checkin::Idle => {}
            Checkin::Retire(conn, reason) => self.pool.close_in_background(conn, reason),
            Checkin::Unknown(conn) => {
                self.pool
                    .close_in_background(conn, RetireReason::Abandoned);
            }
        }
    }
}
