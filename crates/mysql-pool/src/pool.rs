//! Connection pool core.
//!
//! Grows lazily up to a limit, hands out idle connections, and queues calls
//! behind a placeholder while none is idle.
//!
//! # Architecture
//!
//! ```text
//! get_ready_connection()
//!   → fewer than two idle        → schedule growth
//!   → idle, alive and ready conn → Ready(conn)
//!   → nothing usable             → schedule growth, Virtual(placeholder)
//!
//! connection fires ready hook
//!   → deferred call queued → run it on this connection
//!   → otherwise            → mark idle
//!
//! connect attempt fails
//!   → unmap; if no live connection remains → fail every deferred call
//! ```
//!
//! All state lives on one thread in an `Rc<RefCell<_>>`. No borrow is held
//! while calling into a connection or a caller's closure, since both may
//! re-enter the pool through hooks. Growth runs on `tokio::task::spawn_local`,
//! so a pool must be created and used inside a [`tokio::task::LocalSet`].

mod hooks;
mod placeholder;
mod promise;
mod registry;

pub use hooks::ConnectionHooks;
pub use placeholder::{ReadyConnection, VirtualConnection};
pub use promise::{ConnectState, ConnectionPromise};

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::{self, PoolConfig};
use crate::connection::{ConnId, Connection, ConnectionFactory, PooledConnection};
use crate::deferred::{self, PendingCall, PendingCallQueue};
use crate::error::{PoolError, PoolResult};
use registry::Registry;

/// Idle connections the pool tries to keep on hand.
const READY_BUFFER: usize = 2;

/// Pool size limit. Closing keeps the configured size so a reopen restores it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolLimit {
    Open(usize),
    Closed(usize),
}

impl PoolLimit {
    /// The configured size, open or closed.
    pub fn get(self) -> usize {
        match self {
            PoolLimit::Open(n) | PoolLimit::Closed(n) => n,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, PoolLimit::Closed(_))
    }

    fn close(self) -> Self {
        PoolLimit::Closed(self.get())
    }

    fn reopen(self) -> Self {
        PoolLimit::Open(self.get())
    }

    /// Whether a connection may be spawned next to `live` existing ones.
    fn admits(self, live: usize) -> bool {
        matches!(self, PoolLimit::Open(n) if live < n)
    }
}

/// Point-in-time pool statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Registered connections (connecting, busy or idle).
    pub live: usize,
    /// Idle connections available for immediate reuse.
    pub ready: usize,
    /// Deferred calls waiting for a connection.
    pub pending: usize,
    pub limit: usize,
    pub closed: bool,
}

pub(crate) type WeakPool<C> = Weak<RefCell<PoolState<C>>>;

pub(crate) struct PoolState<C: Connection> {
    registry: Registry<C>,
    pending: PendingCallQueue<C>,
    config: PoolConfig,
    limit: PoolLimit,
    factory: Rc<dyn ConnectionFactory<C>>,
    connect_state: watch::Sender<ConnectState>,
    /// Most recently spawned connection; only its outcome is published.
    latest_spawn: Option<ConnId>,
}

/// Strong handle to the pool state, used by the pool and, transiently, by
/// hooks and placeholders.
struct PoolShared<C: Connection> {
    inner: Rc<RefCell<PoolState<C>>>,
}

impl<C: Connection> PoolShared<C> {
    fn upgrade(pool: &WeakPool<C>) -> Option<Self> {
        pool.upgrade().map(|inner| Self { inner })
    }

    fn downgrade(&self) -> WeakPool<C> {
        Rc::downgrade(&self.inner)
    }

    // ── Growth ──────────────────────────────────────────────────────

    /// Schedule one growth attempt on a later tick.
    fn spawn_connection(&self) {
        let pool = self.downgrade();
        tokio::task::spawn_local(Self::grow(pool));
    }

    async fn grow(pool: WeakPool<C>) {
        // Only the connection is held across the handshake, not the pool.
        let Some(conn) = Self::upgrade(&pool).and_then(|shared| shared.register_new()) else {
            return;
        };
        let outcome = conn.connect().await;
        if let Some(shared) = Self::upgrade(&pool) {
            match outcome {
                Ok(()) => shared.on_connected(&conn),
                Err(error) => shared.on_connect_failed(conn.id(), error),
            }
        }
    }

    fn register_new(&self) -> Option<PooledConnection<C>> {
        let (id, factory, snapshot) = {
            let mut state = self.inner.borrow_mut();
            let live = state.registry.live_count();
            if !state.limit.admits(live) {
                debug!(
                    live,
                    limit = state.limit.get(),
                    closed = state.limit.is_closed(),
                    "connection limit reached, not spawning"
                );
                return None;
            }
            let id = state.registry.allocate_id();
            (id, Rc::clone(&state.factory), state.config.connection.clone())
        };

        let conn = Rc::new(factory.create(&snapshot, ConnectionHooks::new(self.downgrade(), id)));

        let mut state = self.inner.borrow_mut();
        state.registry.insert(id, Rc::clone(&conn));
        state.latest_spawn = Some(id);
        state.connect_state.send_replace(ConnectState::Pending);
        debug!(
            conn_id = %id,
            live = state.registry.live_count(),
            limit = state.limit.get(),
            "spawned connection"
        );
        Some(PooledConnection::new(id, conn))
    }

    fn on_connected(&self, conn: &PooledConnection<C>) {
        let charset = {
            let state = self.inner.borrow();
            if !state.registry.contains(conn.id()) {
                debug!(conn_id = %conn.id(), "connection finished handshake after leaving the pool");
                return;
            }
            if state.latest_spawn == Some(conn.id()) {
                state.connect_state.send_replace(ConnectState::Connected(conn.id()));
            }
            let config = &state.config.connection;
            config
                .needs_charset_override()
                .then(|| (config.charset.clone(), config.collation.clone()))
        };

        debug!(conn_id = %conn.id(), "connection established");
        if let Some((charset, collation)) = charset {
            conn.set_charset(&charset, &collation);
        }
    }

    fn on_connect_failed(&self, id: ConnId, error: String) {
        let (removed, orphaned) = {
            let mut state = self.inner.borrow_mut();
            let removed = state.registry.unmap(id);
            if state.latest_spawn == Some(id) {
                state.connect_state.send_replace(ConnectState::Failed(error.clone()));
            }
            let orphaned = state.registry.is_empty().then(|| state.pending.take_all());
            (removed, orphaned)
        };
        drop(removed);

        warn!(conn_id = %id, %error, "connection attempt failed");
        if let Some(calls) = orphaned.filter(|calls| !calls.is_empty()) {
            warn!(failed = calls.len(), "no live connections left, failing deferred calls");
            deferred::fail_all(calls, PoolError::PoolExhausted(error));
        }
    }

    // ── Hooks ───────────────────────────────────────────────────────

    fn on_ready(&self, id: ConnId) {
        let (call, conn) = {
            let mut state = self.inner.borrow_mut();
            let Some(conn) = state.registry.get(id) else {
                trace!(conn_id = %id, "ignoring ready hook from untracked connection");
                return;
            };
            match state.pending.pop() {
                Some(call) => (call, conn),
                None => {
                    state.registry.mark_ready(id);
                    trace!(conn_id = %id, ready = state.registry.ready_count(), "connection idle");
                    return;
                }
            }
        };

        debug!(conn_id = %id, "running deferred call");
        call.run(conn);
    }

    fn on_busy(&self, id: ConnId) {
        if self.inner.borrow_mut().registry.remove_ready(id) {
            trace!(conn_id = %id, "idle connection claimed");
        }
    }

    fn on_restore(&self, id: ConnId, is_initial: bool) -> ReadyConnection<C> {
        let (removed, orphaned) = {
            let mut state = self.inner.borrow_mut();
            let removed = state.registry.unmap(id);
            let orphaned =
                (is_initial && state.registry.is_empty()).then(|| state.pending.take_all());
            (removed, orphaned)
        };
        drop(removed);

        debug!(conn_id = %id, is_initial, "connection left the pool");
        if let Some(calls) = orphaned {
            deferred::fail_all(
                calls,
                PoolError::PoolExhausted("initial connection failed".to_string()),
            );
        }
        self.get_ready_connection()
    }

    // ── Requests ────────────────────────────────────────────────────

    fn get_ready_connection(&self) -> ReadyConnection<C> {
        let idle = {
            let mut state = self.inner.borrow_mut();
            if state.limit.is_closed() && state.config.reopen_on_request {
                state.limit = state.limit.reopen();
                info!(limit = state.limit.get(), "reopening closed pool on request");
            }
            state.registry.ready_count()
        };

        if idle < READY_BUFFER {
            self.spawn_connection();
        }

        if let Some(conn) = self.take_idle() {
            trace!(conn_id = %conn.id(), "handing out idle connection");
            return ReadyConnection::Ready(conn);
        }

        self.spawn_connection();
        ReadyConnection::Virtual(VirtualConnection::new(self.downgrade()))
    }

    /// Pop idle connections until one passes the liveness and readiness
    /// checks. Failing entries are dropped from the ready index.
    fn take_idle(&self) -> Option<PooledConnection<C>> {
        loop {
            let conn = self.inner.borrow_mut().registry.pop_ready()?;
            if conn.alive() && conn.is_ready() {
                return Some(conn);
            }
            debug!(conn_id = %conn.id(), "discarding stale idle connection");
        }
    }

    /// Route a deferred call: fail it on a closed pool, run it on an idle
    /// connection, or queue it for the next ready hook.
    fn dispatch(&self, call: PendingCall<C>) {
        if self.inner.borrow().limit.is_closed() {
            call.fail(PoolError::Closed);
            return;
        }
        if let Some(conn) = self.take_idle() {
            call.run(conn);
            return;
        }
        let orphaned = {
            let mut state = self.inner.borrow_mut();
            state.pending.push(call);
            trace!(pending = state.pending.len(), "deferred call queued");
            state.registry.is_empty()
        };
        // Nothing live or connecting: only a new attempt can serve or fail it.
        if orphaned {
            self.spawn_connection();
        }
    }

    fn unmap(&self, id: ConnId) -> bool {
        let removed = self.inner.borrow_mut().registry.unmap(id);
        removed.is_some()
    }

    // ── Configuration ───────────────────────────────────────────────

    fn set_charset(&self, charset: &str, collation: &str) {
        let (charset, collation) = config::resolve_charset(charset, collation);
        let targets = {
            let mut state = self.inner.borrow_mut();
            state.registry.clear_ready();
            state.config.connection.charset = charset.clone();
            state.config.connection.collation = collation.clone();
            state.registry.connections()
        };

        info!(%charset, %collation, live = targets.len(), "charset changed");
        for conn in targets.iter().filter(|conn| conn.alive()) {
            conn.set_charset(&charset, &collation);
        }
    }

    fn use_exceptions(&self, enabled: bool) {
        let targets = {
            let mut state = self.inner.borrow_mut();
            state.config.connection.use_exceptions = enabled;
            state.registry.connections()
        };

        debug!(enabled, live = targets.len(), "exceptions mode changed");
        for conn in &targets {
            conn.use_exceptions(enabled);
        }
    }

    // ── Teardown ────────────────────────────────────────────────────

    fn close(&self) {
        let targets = self.inner.borrow().registry.connections();
        for conn in &targets {
            if let Err(error) = conn.force_close() {
                warn!(conn_id = %conn.id(), %error, "force close failed, ignoring");
            }
            self.unmap(conn.id());
        }

        // Marked closed only now: growth scheduled by hooks fired during the
        // loop above must find the pool closed when it runs.
        let (orphaned, was_closed) = {
            let mut state = self.inner.borrow_mut();
            state.registry.clear_ready();
            let was_closed = state.limit.is_closed();
            state.limit = state.limit.close();
            state.connect_state.send_if_modified(|current| {
                if *current == ConnectState::Pending {
                    *current = ConnectState::Failed(PoolError::Closed.to_string());
                    true
                } else {
                    false
                }
            });
            (state.pending.take_all(), was_closed)
        };

        if !was_closed {
            info!(closed = targets.len(), failed_calls = orphaned.len(), "connection pool closed");
        }
        deferred::fail_all(orphaned, PoolError::Closed);
    }

    fn reopen(&self) {
        let mut state = self.inner.borrow_mut();
        if state.limit.is_closed() {
            state.limit = state.limit.reopen();
            info!(limit = state.limit.get(), "connection pool reopened");
        }
    }

    fn stats(&self) -> PoolStats {
        let state = self.inner.borrow();
        PoolStats {
            live: state.registry.live_count(),
            ready: state.registry.ready_count(),
            pending: state.pending.len(),
            limit: state.limit.get(),
            closed: state.limit.is_closed(),
        }
    }
}

/// A pool of connections to one backend.
///
/// Dropping the pool closes it.
pub struct ConnectionPool<C: Connection> {
    shared: PoolShared<C>,
}

impl<C: Connection> ConnectionPool<C> {
    /// Create a pool and schedule its first connection.
    ///
    /// # Panics
    ///
    /// Panics if called outside a [`tokio::task::LocalSet`].
    pub fn new(config: PoolConfig, factory: Rc<dyn ConnectionFactory<C>>) -> PoolResult<Self> {
        config.validate()?;

        info!(
            host = %config.connection.host,
            port = config.connection.port,
            max_connections = config.max_connections,
            "creating connection pool"
        );

        let (connect_state, _) = watch::channel(ConnectState::Pending);
        let state = PoolState {
            registry: Registry::new(),
            pending: PendingCallQueue::new(),
            limit: PoolLimit::Open(config.max_connections),
            config,
            factory,
            connect_state,
            latest_spawn: None,
        };
        let shared = PoolShared {
            inner: Rc::new(RefCell::new(state)),
        };
        shared.spawn_connection();
        Ok(Self { shared })
    }

    /// Outcome of the most recent spawn attempt.
    pub fn connection_promise(&self) -> ConnectionPromise {
        ConnectionPromise::new(self.shared.inner.borrow().connect_state.subscribe())
    }

    /// An idle connection if one is usable right now, otherwise a placeholder
    /// whose calls run on the next connection to become ready. Never blocks.
    ///
    /// With `reopen_on_request` set, this reopens a closed pool.
    pub fn get_ready_connection(&self) -> ReadyConnection<C> {
        self.shared.get_ready_connection()
    }

    /// Take a connection out of the pool for good.
    ///
    /// The pool stops tracking it: it is never handed out again and
    /// [`close`](Self::close) does not touch it.
    pub async fn extract_connection(&self) -> PoolResult<PooledConnection<C>> {
        // Unmapped as the call resolves so a later ready hook cannot park it
        // in the idle set again.
        let pool = self.shared.downgrade();
        let conn = self
            .shared
            .get_ready_connection()
            .call(move |conn| {
                if let Some(shared) = PoolShared::upgrade(&pool) {
                    shared.unmap(conn.id());
                }
                conn
            })
            .await?;
        debug!(conn_id = %conn.id(), "connection extracted from pool");
        Ok(conn)
    }

    /// Change the charset of all live and future connections.
    ///
    /// `charset` may be a collation such as `utf8_general_ci` when
    /// `collation` is empty; the charset is then its prefix before `_`.
    /// Idle connections stop counting as ready until they report ready again.
    pub fn set_charset(&self, charset: &str, collation: &str) {
        self.shared.set_charset(charset, collation);
    }

    /// Change the error-reporting mode of all live and future connections.
    pub fn use_exceptions(&self, enabled: bool) {
        self.shared.use_exceptions(enabled);
    }

    /// Force-close every tracked connection and mark the pool closed.
    ///
    /// Deferred calls still queued fail with [`PoolError::Closed`]. Safe to
    /// call more than once.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Reopen a closed pool. Growth resumes on the next request.
    pub fn reopen(&self) {
        self.shared.reopen();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inner.borrow().limit.is_closed()
    }

    pub fn limit(&self) -> PoolLimit {
        self.shared.inner.borrow().limit
    }

    /// Current configuration, including pushed charset and exceptions changes.
    pub fn config(&self) -> PoolConfig {
        self.shared.inner.borrow().config.clone()
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Log pool statistics at `tracing::info` level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            live = stats.live,
            ready = stats.ready,
            pending = stats.pending,
            limit = stats.limit,
            closed = stats.closed,
            "pool statistics"
        );
    }
}

impl<C: Connection> Drop for ConnectionPool<C> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<C: Connection> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
