//! Live-connection registry and ready index.
//!
//! Invariants:
//! - every live connection has exactly one entry in `live`;
//! - every handle in the ready index is also in `live`;
//! - `unmap` is idempotent.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::connection::{ConnId, PooledConnection};

pub(crate) struct Registry<C> {
    /// Live connections by handle.
    live: BTreeMap<ConnId, Rc<C>>,
    /// Idle connections keyed by the order they became ready.
    ready: BTreeMap<u64, ConnId>,
    /// Reverse index: handle → position in `ready`.
    ready_index: HashMap<ConnId, u64>,
    next_id: u64,
    next_ready_seq: u64,
}

impl<C> Registry<C> {
    pub(crate) fn new() -> Self {
        Self {
            live: BTreeMap::new(),
            ready: BTreeMap::new(),
            ready_index: HashMap::new(),
            next_id: 1,
            next_ready_seq: 0,
        }
    }

    /// Allocate the next connection handle.
    pub(crate) fn allocate_id(&mut self) -> ConnId {
        let id = ConnId::new(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, id: ConnId, conn: Rc<C>) {
        self.live.insert(id, conn);
    }

    pub(crate) fn get(&self, id: ConnId) -> Option<PooledConnection<C>> {
        self.live
            .get(&id)
            .map(|conn| PooledConnection::new(id, Rc::clone(conn)))
    }

    pub(crate) fn contains(&self, id: ConnId) -> bool {
        self.live.contains_key(&id)
    }

    /// Remove a connection's bookkeeping. Returns the connection if it was
    /// still registered; unmapping twice is a no-op.
    pub(crate) fn unmap(&mut self, id: ConnId) -> Option<Rc<C>> {
        self.remove_ready(id);
        self.live.remove(&id)
    }

    /// Record a live connection as idle. Unregistered handles are refused;
    /// an already idle connection keeps its place.
    pub(crate) fn mark_ready(&mut self, id: ConnId) -> bool {
        if !self.live.contains_key(&id) {
            return false;
        }
        if !self.ready_index.contains_key(&id) {
            let seq = self.next_ready_seq;
            self.next_ready_seq += 1;
            self.ready.insert(seq, id);
            self.ready_index.insert(id, seq);
        }
        true
    }

    pub(crate) fn remove_ready(&mut self, id: ConnId) -> bool {
        match self.ready_index.remove(&id) {
            Some(seq) => {
                self.ready.remove(&seq);
                true
            }
            None => false,
        }
    }

    /// Take the connection that has been idle longest.
    pub(crate) fn pop_ready(&mut self) -> Option<PooledConnection<C>> {
        while let Some((_, id)) = self.ready.pop_first() {
            self.ready_index.remove(&id);
            if let Some(conn) = self.get(id) {
                return Some(conn);
            }
        }
        None
    }

    pub(crate) fn clear_ready(&mut self) {
        self.ready.clear();
        self.ready_index.clear();
    }

    /// Every live connection, in handle order.
    pub(crate) fn connections(&self) -> Vec<PooledConnection<C>> {
        self.live
            .iter()
            .map(|(id, conn)| PooledConnection::new(*id, Rc::clone(conn)))
            .collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_ready(&self, id: ConnId) -> bool {
        self.ready_index.contains_key(&id)
    }

    /// Panics if the ready index is not a subset of the live set or the two
    /// ready maps disagree.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        assert_eq!(self.ready.len(), self.ready_index.len());
        for (seq, id) in &self.ready {
            assert_eq!(self.ready_index.get(id), Some(seq));
            assert!(self.live.contains_key(id), "{id} ready but not live");
        }
    }
}
