//! Outcome of the most recent connection spawn, for startup synchronization.

use tokio::sync::watch;

use crate::connection::ConnId;
use crate::error::{PoolError, PoolResult};

/// State of the most recent spawn attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectState {
    /// A connection is spawned or scheduled and has not finished connecting.
    Pending,
    Connected(ConnId),
    Failed(String),
}

/// Watches the most recent spawn attempt of a pool.
#[derive(Clone, Debug)]
pub struct ConnectionPromise {
    rx: watch::Receiver<ConnectState>,
}

impl ConnectionPromise {
    pub(crate) fn new(rx: watch::Receiver<ConnectState>) -> Self {
        Self { rx }
    }

    /// Current state without waiting.
    pub fn state(&self) -> ConnectState {
        self.rx.borrow().clone()
    }

    /// Wait until the most recent spawn has connected or failed.
    pub async fn wait(mut self) -> PoolResult<ConnId> {
        let state = (*self
            .rx
            .wait_for(|state| *state != ConnectState::Pending)
            .await
            .map_err(|_| PoolError::Closed)?)
        .clone();

        match state {
            ConnectState::Connected(id) => Ok(id),
            ConnectState::Failed(error) => Err(PoolError::ConnectFailure(error)),
            ConnectState::Pending => Err(PoolError::Closed),
        }
    }
}
