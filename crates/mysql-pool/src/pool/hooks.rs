//! Callbacks a connection uses to report lifecycle changes to its pool.

use std::fmt;

use super::{PoolShared, ReadyConnection, WeakPool};
use crate::connection::{ConnId, Connection};

/// Handed to each connection at construction.
///
/// Holds only a weak reference: hooks fired after the pool is dropped are
/// ignored. Hooks fired by a connection the pool no longer tracks (because
/// it was extracted or unmapped) are ignored as well.
pub struct ConnectionHooks<C: Connection> {
    pool: WeakPool<C>,
    id: ConnId,
}

impl<C: Connection> ConnectionHooks<C> {
    pub(crate) fn new(pool: WeakPool<C>, id: ConnId) -> Self {
        Self { pool, id }
    }

    /// The pool handle of the connection these hooks belong to.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// The connection has no pending work and can be reused.
    pub fn ready(&self) {
        if let Some(pool) = PoolShared::upgrade(&self.pool) {
            pool.on_ready(self.id);
        }
    }

    /// The connection was claimed or started work.
    pub fn busy(&self) {
        if let Some(pool) = PoolShared::upgrade(&self.pool) {
            pool.on_busy(self.id);
        }
    }

    /// The connection is leaving the pool. Returns where rerouted work
    /// should go, or `None` when the pool is gone.
    pub fn restore(&self, is_initial: bool) -> Option<ReadyConnection<C>> {
        PoolShared::upgrade(&self.pool).map(|pool| pool.on_restore(self.id, is_initial))
    }
}

impl<C: Connection> Clone for ConnectionHooks<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            id: self.id,
        }
    }
}

impl<C: Connection> fmt::Debug for ConnectionHooks<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHooks")
            .field("id", &self.id)
            .field("attached", &(self.pool.strong_count() > 0))
            .finish()
    }
}
