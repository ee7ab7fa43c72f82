//! In-memory [`Connector`] with fault injection.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use authpool::{ConnectParams, Connector, ConnectorError};
use authpool_auth::{AuthContext, AuthMode};
use parking_lot::Mutex;
use tokio::time::Instant;

/// A failure the next `open` call should report.
#[derive(Debug, Clone)]
pub enum OpenFault {
    /// Connection refused at the socket level (transient).
    Io,
    /// The server rejects the presented credentials.
    Authentication(String),
    /// The server answers with garbage.
    Protocol(String),
}

impl OpenFault {
    fn into_error(self) -> ConnectorError {
        match self {
            Self::Io => ConnectorError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )),
            Self::Authentication(msg) => ConnectorError::Authentication(msg),
            Self::Protocol(msg) => ConnectorError::Protocol(msg),
        }
    }
}

/// Handle produced by [`MockConnector`].
#[derive(Debug)]
pub struct MockHandle {
    /// Physical connection id assigned by the connector.
    pub id: u64,
    /// Mode of the credentials it was opened with.
    pub auth: AuthMode,
    /// URL it was opened against.
    pub url: String,
}

#[derive(Default)]
struct MockState {
    next_id: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    pings: AtomicU64,
    live: Mutex<HashSet<u64>>,
    peak_live: AtomicU64,
    open_faults: Mutex<VecDeque<OpenFault>>,
    broken: Mutex<HashSet<u64>>,
    fail_all_pings: AtomicBool,
    fail_close: AtomicBool,
    open_delay: Mutex<Duration>,
    ping_delay: Mutex<Duration>,
    close_delay: Mutex<Duration>,
    last_auth: Mutex<Option<AuthMode>>,
}

/// Connector that opens in-memory "connections" and counts what the pool
/// does with them.
///
/// Clones share state, so a test keeps one clone for assertions and hands
/// another to the pool.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// Create a connector where every operation succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` calls fail, in order.
    pub fn push_open_faults(&self, faults: impl IntoIterator<Item = OpenFault>) {
        self.state.open_faults.lock().extend(faults);
    }

    /// Delay every `open` by `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock() = delay;
    }

    /// Delay every `ping` by `delay`.
    pub fn set_ping_delay(&self, delay: Duration) {
        *self.state.ping_delay.lock() = delay;
    }

    /// Delay every `close` by `delay`. The connection stays live until the
    /// delay has passed, so a close that is abandoned midway shows up as a
    /// leak.
    pub fn set_close_delay(&self, delay: Duration) {
        *self.state.close_delay.lock() = delay;
    }

    /// Make pings on connection `id` fail from now on.
    pub fn break_connection(&self, id: u64) {
        self.state.broken.lock().insert(id);
    }

    /// Make every ping fail (`true`) or succeed again (`false`).
    pub fn fail_all_pings(&self, fail: bool) {
        self.state.fail_all_pings.store(fail, Ordering::SeqCst);
    }

    /// Make `close` report an error (the connection still counts as closed).
    pub fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Successful opens so far.
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Closes so far.
    #[must_use]
    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Pings so far.
    #[must_use]
    pub fn pings(&self) -> u64 {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed or dropped.
    #[must_use]
    pub fn live(&self) -> usize {
        self.state.live.lock().len()
    }

    /// Highest number of simultaneously live connections observed.
    #[must_use]
    pub fn peak_live(&self) -> u64 {
        self.state.peak_live.load(Ordering::SeqCst)
    }

    /// Mode of the credentials presented to the last `open` attempt.
    #[must_use]
    pub fn last_auth(&self) -> Option<AuthMode> {
        *self.state.last_auth.lock()
    }

    /// Forget a connection whose handle the test dropped without closing.
    pub fn forget(&self, id: u64) {
        self.state.live.lock().remove(&id);
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Handle = MockHandle;

    async fn open(
        &self,
        auth: &AuthContext,
        params: &ConnectParams,
    ) -> Result<MockHandle, ConnectorError> {
        let delay = *self.state.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        *self.state.last_auth.lock() = Some(auth.mode());

        if let Some(fault) = self.state.open_faults.lock().pop_front() {
            tracing::debug!(?fault, "mock open failing");
            return Err(fault.into_error());
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let live = {
            let mut live = self.state.live.lock();
            live.insert(id);
            live.len() as u64
        };
        self.state.peak_live.fetch_max(live, Ordering::SeqCst);

        Ok(MockHandle {
            id,
            auth: auth.mode(),
            url: params.url.clone(),
        })
    }

    async fn ping(&self, handle: &mut MockHandle, deadline: Instant) -> Result<(), ConnectorError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.ping_delay.lock();
        if !delay.is_zero() {
            if Instant::now() + delay > deadline {
                tokio::time::sleep_until(deadline).await;
                return Err(ConnectorError::Timeout);
            }
            tokio::time::sleep(delay).await;
        }

        if self.state.fail_all_pings.load(Ordering::SeqCst)
            || self.state.broken.lock().contains(&handle.id)
        {
            return Err(ConnectorError::Closed);
        }
        Ok(())
    }

    async fn close(&self, handle: MockHandle) -> Result<(), ConnectorError> {
        let delay = *self.state.close_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.state.live.lock().remove(&handle.id);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(ConnectorError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("opened", &self.opened())
            .field("closed", &self.closed())
            .field("live", &self.live())
            .finish()
    }
}
