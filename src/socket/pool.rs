//! Keep-alive connection pool.
//!
//! Idle connections are grouped by [`Address`]; a checkout hands the
//! connection to exactly one request, so no two requests ever interleave
//! bytes on a stream. When a group is empty the pool opens a fresh
//! connection rather than queueing the request.

use crate::base::neterror::NetError;
use crate::socket::connection::{Address, PooledConnection, Transport};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Pool of idle keep-alive connections, safe to share across tasks.
pub struct ConnectionPool {
    groups: Arc<DashMap<Address, VecDeque<PooledConnection>>>,
    max_idle_per_group: usize,
    connect_timeout: Duration,
    idle_count: Arc<AtomicUsize>,
}

impl Clone for ConnectionPool {
    fn clone(&self) -> Self {
        Self {
            groups: Arc::clone(&self.groups),
            max_idle_per_group: self.max_idle_per_group,
            connect_timeout: self.connect_timeout,
            idle_count: Arc::clone(&self.idle_count),
        }
    }
}

impl ConnectionPool {
    pub fn new(max_idle_per_group: usize, connect_timeout: Duration) -> Self {
        Self {
            groups: Arc::new(DashMap::new()),
            max_idle_per_group,
            connect_timeout,
            idle_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Check out a connection for `address`: the most recently recycled
    /// live idle connection if any, else a freshly opened one.
    ///
    /// Dead idle connections found along the way are discarded; stale
    /// sockets never reach a request.
    pub async fn acquire(
        &self,
        address: &Address,
        transport: &dyn Transport,
    ) -> Result<PooledConnection, NetError> {
        while let Some(connection) = self.pop_idle(address) {
            if connection.is_alive() {
                debug!(address = %address, use_count = connection.use_count(), "reusing idle connection");
                return Ok(connection);
            }
            debug!(address = %address, "discarding dead idle connection");
        }

        debug!(address = %address, "opening new connection");
        PooledConnection::connect(address.clone(), transport, self.connect_timeout).await
    }

    /// Return a connection to its group for reuse. Full groups and dead
    /// connections drop the socket instead.
    pub fn recycle(&self, connection: PooledConnection) {
        if !connection.is_alive() {
            debug!(address = %connection.address(), "not recycling dead connection");
            return;
        }
        let mut group = self.groups.entry(connection.address().clone()).or_default();
        if group.len() >= self.max_idle_per_group {
            debug!(address = %connection.address(), "idle group full, closing connection");
            return;
        }
        group.push_back(connection);
        self.idle_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every idle connection.
    pub fn close_idle(&self) {
        self.groups.clear();
        self.idle_count.store(0, Ordering::Relaxed);
    }

    pub fn idle_count(&self) -> usize {
        self.idle_count.load(Ordering::Relaxed)
    }

    // LIFO: the most recently used connection is the least likely to have
    // hit the server's keep-alive timeout.
    fn pop_idle(&self, address: &Address) -> Option<PooledConnection> {
        let mut group = self.groups.get_mut(address)?;
        let connection = group.pop_back()?;
        self.idle_count.fetch_sub(1, Ordering::Relaxed);
        Some(connection)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_idle_per_group", &self.max_idle_per_group)
            .field("idle_count", &self.idle_count())
            .finish()
    }
}
