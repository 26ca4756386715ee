//! Connection membership and fan-out.
//!
//! # Responsibilities
//! - Track the set of live connections under a single mutex
//! - Broadcast each accepted message to every member except its sender
//! - Evict slow consumers the moment their outbound queue is full
//! - Deregister exactly once no matter which teardown trigger fires first
//!
//! # Design Decisions
//! - Plain `std::sync::Mutex`: it is never held across an await point, and
//!   everything done under it (try-enqueue, map ops) is non-blocking
//! - The eviction decision for a full queue is made under the same lock
//!   acquisition as the failed enqueue, so a concurrent fan-out can never
//!   observe a half-removed member

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::net::connection::{Connection, ConnectionId, EnqueueError};

/// The mutable set of currently-registered connections.
pub struct Registry {
    members: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection. Called after accept, before its loops start.
    pub fn add(&self, conn: Arc<Connection>) {
        let mut members = self.members.lock().expect("registry lock poisoned");
        members.insert(conn.id(), conn);
    }

    /// Number of currently-registered connections.
    pub fn len(&self) -> usize {
        self.members.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Broadcast `msg` to every member except the sender.
    ///
    /// Never blocks: each delivery is a non-blocking enqueue onto the
    /// receiver's bounded queue. A member whose queue is full is a slow
    /// consumer and is closed and deleted before the lock is released.
    pub fn fanout(&self, sender: ConnectionId, msg: &Bytes) {
        let mut members = self.members.lock().expect("registry lock poisoned");

        let mut evicted = Vec::new();
        for (&id, conn) in members.iter() {
            if id == sender {
                continue;
            }
            match conn.enqueue(msg.clone()) {
                Ok(()) => {}
                Err(EnqueueError::Full) => {
                    tracing::warn!(
                        connection_id = %conn.id(),
                        peer_addr = %conn.peer_addr(),
                        "Outbound queue full, evicting slow consumer"
                    );
                    evicted.push(Arc::clone(conn));
                }
                // Member is mid-teardown; its remover deletes it.
                Err(EnqueueError::Closed) => {}
            }
        }

        for conn in evicted {
            if conn.begin_close() {
                members.remove(&conn.id());
            }
        }
    }

    /// Deregister a connection; idempotent under concurrent callers.
    ///
    /// The winner of the close gate deletes the entry and wakes both of the
    /// connection's loops; every other caller is a no-op.
    pub fn remove(&self, conn: &Connection) {
        if conn.begin_close() {
            let mut members = self.members.lock().expect("registry lock poisoned");
            members.remove(&conn.id());
            tracing::debug!(
                connection_id = %conn.id(),
                peer_addr = %conn.peer_addr(),
                uploaded = conn.uploaded(),
                downloaded = conn.downloaded(),
                members = members.len(),
                "Connection removed"
            );
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
