//! Deferred calls.
//!
//! When no connection is idle the pool hands out a placeholder and queues
//! the caller's call here. The first connection to become ready runs it.
//! Each call is resolved exactly once, with the call's result or with a
//! pool failure.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::connection::PooledConnection;
use crate::error::{PoolError, PoolResult};

/// Resolving side of a one-shot result.
///
/// Resolving a second time returns [`PoolError::DoubleResolution`] and
/// leaves the first outcome in place.
#[derive(Debug)]
pub struct Deferred<T> {
    tx: Option<oneshot::Sender<PoolResult<T>>>,
}

impl<T> Deferred<T> {
    /// Create a deferred value and the future that observes it.
    pub fn new() -> (Self, DeferredResult<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, DeferredResult { rx })
    }

    pub fn succeed(&mut self, value: T) -> PoolResult<()> {
        self.resolve(Ok(value))
    }

    pub fn fail(&mut self, error: PoolError) -> PoolResult<()> {
        self.resolve(Err(error))
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    fn resolve(&mut self, outcome: PoolResult<T>) -> PoolResult<()> {
        let tx = self.tx.take().ok_or(PoolError::DoubleResolution)?;
        // The caller may have stopped waiting; that is not an error here.
        let _ = tx.send(outcome);
        Ok(())
    }
}

/// Future side of a [`Deferred`].
///
/// Resolves to [`PoolError::Closed`] if the resolving side is dropped
/// without an outcome (for example when the pool is dropped).
#[derive(Debug)]
pub struct DeferredResult<T> {
    rx: oneshot::Receiver<PoolResult<T>>,
}

impl<T> DeferredResult<T> {
    /// An already resolved result.
    pub fn ready(outcome: PoolResult<T>) -> Self {
        let (mut deferred, result) = Deferred::new();
        let _ = deferred.resolve(outcome);
        result
    }
}

impl<T> Future for DeferredResult<T> {
    type Output = PoolResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PoolError::Closed)))
    }
}

/// A call waiting for a connection. Consumed by [`run`](Self::run) or
/// [`fail`](Self::fail).
pub(crate) struct PendingCall<C> {
    resolve: Box<dyn FnOnce(PoolResult<PooledConnection<C>>)>,
}

impl<C> PendingCall<C> {
    pub(crate) fn new(resolve: impl FnOnce(PoolResult<PooledConnection<C>>) + 'static) -> Self {
        Self {
            resolve: Box::new(resolve),
        }
    }

    /// Wrap `f` so its result resolves `deferred`.
    pub(crate) fn from_fn<R, F>(f: F, mut deferred: Deferred<R>) -> Self
    where
        F: FnOnce(PooledConnection<C>) -> R + 'static,
        R: 'static,
    {
        Self::new(move |outcome| {
            let resolved = match outcome {
                Ok(conn) => deferred.succeed(f(conn)),
                Err(error) => deferred.fail(error),
            };
            if let Err(error) = resolved {
                tracing::error!(%error, "deferred call resolved more than once");
            }
        })
    }

    pub(crate) fn run(self, conn: PooledConnection<C>) {
        (self.resolve)(Ok(conn))
    }

    pub(crate) fn fail(self, error: PoolError) {
        (self.resolve)(Err(error))
    }
}

/// FIFO queue of calls waiting for a ready connection.
pub(crate) struct PendingCallQueue<C> {
    calls: VecDeque<PendingCall<C>>,
}

impl<C> PendingCallQueue<C> {
    pub(crate) fn new() -> Self {
        Self {
            calls: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, call: PendingCall<C>) {
        self.calls.push_back(call);
    }

    /// Oldest queued call.
    pub(crate) fn pop(&mut self) -> Option<PendingCall<C>> {
        self.calls.pop_front()
    }

    /// Remove every queued call, oldest first.
    pub(crate) fn take_all(&mut self) -> Vec<PendingCall<C>> {
        self.calls.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

/// Fail every call in `calls` with a clone of `error`.
pub(crate) fn fail_all<C>(calls: Vec<PendingCall<C>>, error: PoolError) {
    for call in calls {
        call.fail(error.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnId;
    use std::rc::Rc;

    fn conn(id: u64) -> PooledConnection<u64> {
        PooledConnection::new(ConnId::new(id), Rc::new(id * 10))
    }

    #[tokio::test]
    async fn deferred_resolves_once() {
        let (mut deferred, result) = Deferred::new();
        assert!(!deferred.is_resolved());
        deferred.succeed(5).unwrap();
        assert!(deferred.is_resolved());
        assert_eq!(result.await, Ok(5));
    }

    #[tokio::test]
    async fn deferred_second_resolution_is_rejected() {
        let (mut deferred, result) = Deferred::<u32>::new();
        deferred.succeed(1).unwrap();
        assert_eq!(deferred.succeed(2), Err(PoolError::DoubleResolution));
        assert_eq!(deferred.fail(PoolError::Closed), Err(PoolError::DoubleResolution));
        assert_eq!(result.await, Ok(1));
    }

    #[tokio::test]
    async fn dropped_deferred_reports_closed() {
        let (deferred, result) = Deferred::<u32>::new();
        drop(deferred);
        assert_eq!(result.await, Err(PoolError::Closed));
    }

    #[tokio::test]
    async fn ready_result_is_immediate() {
        assert_eq!(DeferredResult::ready(Ok("done")).await, Ok("done"));
    }

    #[tokio::test]
    async fn pending_call_runs_against_connection() {
        let (deferred, result) = Deferred::new();
        let call = PendingCall::from_fn(|c: PooledConnection<u64>| *c + 1, deferred);
        call.run(conn(4));
        assert_eq!(result.await, Ok(41));
    }

    #[tokio::test]
    async fn queue_is_fifo_and_fail_all_drains() {
        let mut queue = PendingCallQueue::new();
        let mut results = Vec::new();
        for tag in 0..3u64 {
            let (deferred, result) = Deferred::new();
            queue.push(PendingCall::from_fn(move |c: PooledConnection<u64>| (tag, c.id()), deferred));
            results.push(result);
        }
        assert_eq!(queue.len(), 3);

        queue.pop().unwrap().run(conn(9));
        fail_all(queue.take_all(), PoolError::PoolExhausted("gone".to_string()));
        assert_eq!(queue.len(), 0);

        let mut results = results.into_iter();
        assert_eq!(results.next().unwrap().await, Ok((0, ConnId::new(9))));
        for result in results {
            assert_eq!(result.await, Err(PoolError::PoolExhausted("gone".to_string())));
        }
    }
}
