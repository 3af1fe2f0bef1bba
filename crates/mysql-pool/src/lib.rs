//! mysql-pool: lazily grown connection pool for MySQL-style backends.
//!
//! The pool hands out idle connections without blocking. While none is
//! idle it returns a placeholder whose calls run on the next connection
//! that becomes ready.
//! - **config**: Connection and pool settings (TOML file or `host=…;user=…` string)
//! - **connection**: `Connection` / `ConnectionFactory` collaborator traits
//! - **deferred**: One-shot deferred results and the pending-call queue
//! - **error**: `PoolError` and the `PoolResult` alias
//! - **pool**: `ConnectionPool`, its hooks, placeholders and connection promise
//!
//! The pool is single-threaded: create and drive it inside a
//! [`tokio::task::LocalSet`].

pub mod config;
pub mod connection;
pub mod deferred;
pub mod error;
pub mod pool;

pub use config::{ConnectionConfig, PoolConfig};
pub use connection::{ConnId, ConnectFuture, Connection, ConnectionFactory, PooledConnection};
pub use deferred::{Deferred, DeferredResult};
pub use error::{PoolError, PoolResult};
pub use pool::{
    ConnectState, ConnectionHooks, ConnectionPool, ConnectionPromise, PoolLimit, PoolStats,
    ReadyConnection, VirtualConnection,
};
