//! Idle connection tracking and reuse.
//!
//! # Responsibilities
//! - Keep a queue of idle connections per backend key
//! - Hand out the oldest usable idle connection
//! - Bound the number of exchanges a single connection may carry
//! - Identify queued connections so a specific one can be dropped

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::transport::Connection;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// A transport connection plus the number of exchanges it has completed.
pub struct TrackedConnection {
    id: ConnectionId,
    exchanges: u64,
    inner: Box<dyn Connection>,
}

impl TrackedConnection {
    /// Wrap a freshly opened connection.
    pub fn new(inner: Box<dyn Connection>) -> Self {
        Self {
            id: ConnectionId::next(),
            exchanges: 0,
            inner,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Exchanges completed on this connection so far.
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    pub fn is_usable(&self) -> bool {
        self.inner.is_usable()
    }

    pub fn connection(&mut self) -> &mut dyn Connection {
        self.inner.as_mut()
    }
}

impl std::fmt::Debug for TrackedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedConnection")
            .field("id", &self.id)
            .field("exchanges", &self.exchanges)
            .finish()
    }
}

/// What `release` did with a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// Queued for reuse.
    Idle,
    /// Destroyed after reaching the exchange ceiling.
    Retired,
    /// Dropped because the transport already closed it.
    Discarded,
}

/// Idle connection queues keyed by `host:port[:local_address]`.
#[derive(Debug)]
pub struct ConnectionTracker {
    idle: Mutex<HashMap<String, VecDeque<TrackedConnection>>>,
    max_exchanges: u64,
}

impl ConnectionTracker {
    /// Create a tracker that retires connections after `max_exchanges` exchanges.
    pub fn new(max_exchanges: u64) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            max_exchanges: max_exchanges.max(1),
        }
    }

    /// Build the queue key for a backend.
    pub fn build_key(host: &str, port: u16, local_address: Option<&str>) -> String {
        match local_address {
            Some(local) => format!("{}:{}:{}", host, port, local),
            None => format!("{}:{}", host, port),
        }
    }

    /// Take the oldest usable idle connection for `key`.
    ///
    /// Unusable connections found at the head are dropped on the way.
    pub fn acquire(&self, key: &str) -> Option<TrackedConnection> {
        let mut idle = self.idle.lock().expect("connection tracker mutex poisoned");
        let queue = idle.get_mut(key)?;

        let mut found = None;
        while let Some(conn) = queue.pop_front() {
            if conn.is_usable() {
                found = Some(conn);
                break;
            }
            tracing::trace!(key = %key, connection_id = ?conn.id, "Discarding closed idle connection");
        }

        if queue.is_empty() {
            idle.remove(key);
        }
        found
    }

    /// Return a connection after an exchange completed on it.
    pub fn release(&self, key: &str, mut conn: TrackedConnection) -> Released {
        conn.exchanges += 1;

        if !conn.is_usable() {
            tracing::trace!(key = %key, connection_id = ?conn.id, "Released connection already closed");
            return Released::Discarded;
        }

        if conn.exchanges >= self.max_exchanges {
            tracing::debug!(
                key = %key,
                connection_id = ?conn.id,
                exchanges = conn.exchanges,
                "Retiring connection at exchange ceiling"
            );
            return Released::Retired;
        }

        let mut idle = self.idle.lock().expect("connection tracker mutex poisoned");
        idle.entry(key.to_string()).or_default().push_back(conn);
        Released::Idle
    }

    /// Drop a specific idle connection. Returns true if it was queued.
    pub fn remove(&self, key: &str, id: ConnectionId) -> bool {
        let mut idle = self.idle.lock().expect("connection tracker mutex poisoned");
        let Some(queue) = idle.get_mut(key) else {
            return false;
        };

        let before = queue.len();
        queue.retain(|conn| conn.id != id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            idle.remove(key);
        }
        removed
    }

    /// Number of idle connections queued for `key`.
    pub fn idle_count(&self, key: &str) -> usize {
        let idle = self.idle.lock().expect("connection tracker mutex poisoned");
        idle.get(key).map(VecDeque::len).unwrap_or(0)
    }

    /// Exchange counts of every idle connection, across all keys.
    pub fn exchange_counts(&self) -> Vec<u64> {
        let idle = self.idle.lock().expect("connection tracker mutex poisoned");
        idle.values()
            .flat_map(|queue| queue.iter().map(|conn| conn.exchanges))
            .collect()
    }

    /// Destroy every idle connection.
    pub fn clear(&self) {
        let mut idle = self.idle.lock().expect("connection tracker mutex poisoned");
        idle.clear();
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new(1000)
    }
}
