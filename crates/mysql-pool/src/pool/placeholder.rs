//! What a connection request returns: a ready connection or a placeholder.

use std::fmt;

use super::{PoolShared, WeakPool};
use crate::connection::{Connection, PooledConnection};
use crate::deferred::{Deferred, DeferredResult, PendingCall};
use crate::error::PoolError;

/// Placeholder handed out when no connection is idle.
///
/// Carries at most one deferred call: [`call`](Self::call) consumes it.
pub struct VirtualConnection<C: Connection> {
    pool: WeakPool<C>,
}

impl<C: Connection> VirtualConnection<C> {
    pub(crate) fn new(pool: WeakPool<C>) -> Self {
        Self { pool }
    }

    /// Queue `f` to run against the next connection that becomes ready.
    ///
    /// The call is queued immediately; the returned future only waits for
    /// its result. If a connection turned idle since the placeholder was
    /// handed out, `f` runs right away.
    pub fn call<R, F>(self, f: F) -> DeferredResult<R>
    where
        F: FnOnce(PooledConnection<C>) -> R + 'static,
        R: 'static,
    {
        let (deferred, result) = Deferred::new();
        let call = PendingCall::from_fn(f, deferred);
        match PoolShared::upgrade(&self.pool) {
            Some(pool) => pool.dispatch(call),
            None => call.fail(PoolError::Closed),
        }
        result
    }

    /// Resolve to the connection itself once one is ready.
    pub fn into_connection(self) -> DeferredResult<PooledConnection<C>> {
        self.call(|conn| conn)
    }
}

impl<C: Connection> fmt::Debug for VirtualConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualConnection").finish_non_exhaustive()
    }
}

/// Result of [`ConnectionPool::get_ready_connection`](super::ConnectionPool::get_ready_connection).
pub enum ReadyConnection<C: Connection> {
    /// A live connection that reported ready when it was taken.
    Ready(PooledConnection<C>),
    /// No connection was idle; calls are deferred.
    Virtual(VirtualConnection<C>),
}

impl<C: Connection> ReadyConnection<C> {
    pub fn is_virtual(&self) -> bool {
        matches!(self, ReadyConnection::Virtual(_))
    }

    pub fn as_ready(&self) -> Option<&PooledConnection<C>> {
        match self {
            ReadyConnection::Ready(conn) => Some(conn),
            ReadyConnection::Virtual(_) => None,
        }
    }

    /// Run `f` now on a ready connection, or defer it on a placeholder.
    pub fn call<R, F>(self, f: F) -> DeferredResult<R>
    where
        F: FnOnce(PooledConnection<C>) -> R + 'static,
        R: 'static,
    {
        match self {
            ReadyConnection::Ready(conn) => DeferredResult::ready(Ok(f(conn))),
            ReadyConnection::Virtual(placeholder) => placeholder.call(f),
        }
    }

    pub fn into_connection(self) -> DeferredResult<PooledConnection<C>> {
        self.call(|conn| conn)
    }

    /// The ready connection, or `Err(self)` for a placeholder.
    pub fn try_into_ready(self) -> Result<PooledConnection<C>, Self> {
        match self {
            ReadyConnection::Ready(conn) => Ok(conn),
            other => Err(other),
        }
    }
}

impl<C: Connection> fmt::Debug for ReadyConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyConnection::Ready(conn) => f.debug_tuple("Ready").field(conn).finish(),
            ReadyConnection::Virtual(placeholder) => {
                f.debug_tuple("Virtual").field(placeholder).finish()
            }
        }
    }
}
