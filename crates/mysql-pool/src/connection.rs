//! Connection collaborator traits.
//!
//! The pool never speaks the wire protocol itself. A [`Connection`] owns one
//! physical link to the backend; a [`ConnectionFactory`] builds one from a
//! config snapshot and the [`ConnectionHooks`] it must call back into the
//! pool with.
//!
//! # Hook contract
//!
//! ```text
//! connect() resolves Ok      → pool may push a charset command
//! no pending work, reusable  → hooks.ready()
//! claimed / starts work      → hooks.busy()
//! link lost or handed back   → hooks.restore(is_initial) → next connection for rerouted work
//! ```
//!
//! Everything runs on one thread, so the traits carry no `Send` bounds.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::rc::Rc;

use crate::config::ConnectionConfig;
use crate::pool::ConnectionHooks;

/// Boxed future returned by [`Connection::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + 'a>>;

/// Opaque handle identifying a connection inside one pool.
///
/// Handles are allocated monotonically and never reused, so a stale handle
/// can never alias a newer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(u64);

impl ConnId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One physical link to the backend.
///
/// Implementations use interior mutability; the pool only ever holds shared
/// references. Setters issue a command and return immediately; the
/// connection reports completion through its hooks.
pub trait Connection: 'static {
    /// Run the handshake. Resolves once the link is usable or has failed.
    fn connect(&self) -> ConnectFuture<'_>;

    /// Whether the connection has no pending work and can take a new call.
    fn is_ready(&self) -> bool;

    /// Whether the underlying link is still open.
    fn alive(&self) -> bool;

    /// Issue a charset change. `collation` may be empty.
    fn set_charset(&self, charset: &str, collation: &str);

    /// Switch the error-reporting mode.
    fn use_exceptions(&self, enabled: bool);

    /// Close the link unconditionally. The pool ignores errors.
    fn force_close(&self) -> Result<(), String>;
}

/// Builds connections for the pool. Tests inject a mock.
pub trait ConnectionFactory<C: Connection> {
    /// Build (but do not connect) a connection.
    fn create(&self, config: &ConnectionConfig, hooks: ConnectionHooks<C>) -> C;
}

/// A connection handed out by the pool, tagged with its pool handle.
pub struct PooledConnection<C> {
    id: ConnId,
    conn: Rc<C>,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(id: ConnId, conn: Rc<C>) -> Self {
        Self { id, conn }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Shared handle to the underlying connection.
    pub fn shared(&self) -> Rc<C> {
        Rc::clone(&self.conn)
    }
}

impl<C> Clone for PooledConnection<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            conn: Rc::clone(&self.conn),
        }
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
