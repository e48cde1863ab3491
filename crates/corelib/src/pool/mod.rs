//! Per-host connection pools.
//!
//! Each storage host gets one [`ConnectionPool`]: a lock-free stack of idle
//! connections plus counters. Checked-out connections are owned by the
//! caller as a [`PooledConnection`] and are not reachable from the pool until
//! they are released, so a connection is never idle and in use at once.
//!
//! # Exhaustion policy
//!
//! `acquire` never waits for capacity. When the free stack is empty it opens
//! a new connection on the calling thread and the pool grows by one; the only
//! blocking is that network call. Pools are therefore unbounded and size
//! themselves to the peak concurrency of their callers. Callers that need a
//! bound must impose it above the router.

mod stack;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::error::{Error, Result, RoutingError};
use crate::network::Connector;
use crate::node::Host;

use self::stack::FreeStack;

/// Identity of a connection within its pool. Never reused.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A live connection checked out of (or idle in) a host pool.
///
/// Tagged with its host so it can be returned to the right pool. Derefs to
/// the underlying connection.
pub struct PooledConnection<C> {
    id: ConnectionId,
    host: Host,
    conn: C,
}

impl<C> PooledConnection<C> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn host(&self) -> &Host {
        &self.host
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("host", &self.host)
            .finish()
    }
}

/// Reusable connections to one storage host.
pub struct ConnectionPool<K: Connector> {
    host: Host,
    port: u16,
    keyspace: String,
    connector: Arc<K>,
    free: FreeStack<PooledConnection<K::Connection>>,
    /// Live connections created by this pool and not yet closed.
    size: AtomicUsize,
    /// Connections on the free stack. Incremented before a push, so it may
    /// briefly over-count but never underflows.
    idle: AtomicUsize,
    /// Connections currently held by callers.
    outstanding: AtomicUsize,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl<K: Connector> ConnectionPool<K> {
    /// Creates the pool and eagerly opens `config.connections_per_pool`
    /// connections.
    ///
    /// A seed connection that fails to open is logged and dropped; the pool
    /// simply starts smaller and grows on demand. Construction never fails.
    pub fn new(host: Host, config: &RouterConfig, connector: Arc<K>) -> Self {
        let pool = Self {
            host,
            port: config.port,
            keyspace: config.keyspace.clone(),
            connector,
            free: FreeStack::new(),
            size: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };

        let requested = config.connections_per_pool;
        for _ in 0..requested {
            match pool.open() {
                Ok(conn) => pool.push_idle(conn),
                Err(err) => {
                    warn!(host = %pool.host, error = %err, "discarding failed seed connection");
                    counter!("ringpool.pool.seed_failures").increment(1);
                }
            }
        }
        info!(host = %pool.host, seeded = pool.size(), requested, "connection pool ready");
        pool
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Live connections owned by this pool, idle or checked out.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> usize {
        self.idle.load(Ordering::Acquire)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Identities of the idle connections, most recently released first.
    /// Only exact while no other thread is using the pool.
    pub fn idle_ids(&self) -> Vec<ConnectionId> {
        self.free.ids().into_iter().map(ConnectionId).collect()
    }

    /// Takes an idle connection, or opens a new one if none is idle.
    ///
    /// Fails with [`RoutingError::PoolClosed`] once the pool is shut down,
    /// and otherwise only when a new connection has to be opened and the
    /// connector fails.
    pub fn acquire(&self) -> Result<PooledConnection<K::Connection>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let conn = match self.free.pop() {
            Some(conn) => {
                self.idle.fetch_sub(1, Ordering::AcqRel);
                conn
            }
            None => {
                let conn = self.open()?;
                debug!(host = %self.host, size = self.size(), "free stack empty, pool grew");
                counter!("ringpool.pool.grown").increment(1);
                conn
            }
        };
        // Shut down while we were popping or opening.
        if self.is_closed() {
            self.close_connection(conn);
            return Err(self.closed_error());
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(conn)
    }

    /// Puts a connection back on the free stack. Never blocks.
    ///
    /// The connection must have come from this pool's `acquire`; this is not
    /// checked. After [`shutdown`](Self::shutdown) the connection is closed
    /// instead.
    pub fn release(&self, conn: PooledConnection<K::Connection>) {
        debug_assert_eq!(conn.host, self.host, "connection released to the wrong pool");
        self.finish_checkout();
        if self.is_closed() {
            self.close_connection(conn);
        } else {
            self.push_idle(conn);
        }
    }

    /// Closes a checked-out connection instead of returning it, e.g. after a
    /// transport failure left it unusable.
    pub fn discard(&self, conn: PooledConnection<K::Connection>) {
        self.finish_checkout();
        self.close_connection(conn);
    }

    /// Drains the free stack and closes every idle connection. Returns the
    /// number closed.
    ///
    /// Checked-out connections are not tracked by the stack: callers must
    /// return them first, otherwise they are closed as they come back.
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut closed = 0;
        while let Some(conn) = self.free.pop() {
            self.idle.fetch_sub(1, Ordering::AcqRel);
            self.close_connection(conn);
            closed += 1;
        }
        let outstanding = self.outstanding();
        if outstanding > 0 {
            warn!(host = %self.host, outstanding, "pool shut down with connections checked out");
        }
        debug!(host = %self.host, closed, "pool drained");
        closed
    }

    fn open(&self) -> Result<PooledConnection<K::Connection>> {
        let conn = self.connector.connect(&self.host, self.port, &self.keyspace)?;
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.size.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection {
            id,
            host: self.host.clone(),
            conn,
        })
    }

    fn push_idle(&self, conn: PooledConnection<K::Connection>) {
        self.idle.fetch_add(1, Ordering::AcqRel);
        self.free.push(conn.id.0, conn);
    }

    fn finish_checkout(&self) {
        let unbalanced = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err();
        if unbalanced {
            warn!(host = %self.host, "connection handed back without a matching checkout");
            counter!("ringpool.pool.unbalanced_returns").increment(1);
        }
    }

    fn closed_error(&self) -> Error {
        RoutingError::PoolClosed {
            host: self.host.clone(),
        }
        .into()
    }

    fn close_connection(&self, mut conn: PooledConnection<K::Connection>) {
        use crate::network::Connection as _;

        if let Err(err) = conn.conn.close() {
            warn!(host = %self.host, id = %conn.id, error = %err, "failed to close connection");
        }
        self.size.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<K: Connector> Drop for ConnectionPool<K> {
    fn drop(&mut self) {
        if !self.free.is_empty() {
            self.shutdown();
        }
    }
}

impl<K: Connector> fmt::Debug for ConnectionPool<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("host", &self.host)
            .field("size", &self.size())
            .field("idle", &self.idle())
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCluster;
    use std::collections::HashSet;

    fn config(seed: usize) -> RouterConfig {
        RouterConfig::default().with_connections_per_pool(seed)
    }

    fn pool(cluster: &MemoryCluster, seed: usize) -> ConnectionPool<MemoryCluster> {
        ConnectionPool::new(Host::from("10.0.0.1"), &config(seed), Arc::new(cluster.clone()))
    }

    #[test]
    fn test_seeds_requested_connections() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, 4);
        assert_eq!(pool.size(), 4);
        assert_eq!(pool.idle(), 4);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(cluster.opened(), 4);
    }

    #[test]
    fn test_acquire_release_cycles_keep_size() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, 3);
        let before: HashSet<ConnectionId> = pool.idle_ids().into_iter().collect();
        for _ in 0..3 {
            let conn = pool.acquire().unwrap();
            assert_eq!(pool.outstanding(), 1);
            pool.release(conn);
        }
        let after = pool.idle_ids();
        assert_eq!(pool.size(), 3);
        assert_eq!(after.len(), 3);
        assert_eq!(after.into_iter().collect::<HashSet<_>>(), before);
        assert_eq!(cluster.opened(), 3);
    }

    #[test]
    fn test_grows_when_exhausted() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, 1);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.outstanding(), 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_failed_seeds_are_not_pooled() {
        let cluster = MemoryCluster::new();
        cluster.set_host_down("10.0.0.1", true);
        let pool = pool(&cluster, 5);
        assert_eq!(pool.size(), 0);
        assert!(pool.idle_ids().is_empty());
        assert!(pool.acquire().is_err());
        assert_eq!(pool.outstanding(), 0);

        cluster.set_host_down("10.0.0.1", false);
        let conn = pool.acquire().unwrap();
        assert_eq!(pool.size(), 1);
        pool.release(conn);
    }

    #[test]
    fn test_discard_closes_connection() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, 2);
        let conn = pool.acquire().unwrap();
        pool.discard(conn);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(cluster.closed(), 1);
    }

    #[test]
    fn test_shutdown_closes_idle_and_late_returns() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, 3);
        let held = pool.acquire().unwrap();
        assert_eq!(pool.shutdown(), 2);
        assert!(pool.is_closed());
        assert_eq!(cluster.closed(), 2);

        pool.release(held);
        assert_eq!(cluster.closed(), 3);
        assert_eq!(pool.size(), 0);
        assert!(pool.idle_ids().is_empty());
    }

    #[test]
    fn test_acquire_after_shutdown_fails_without_growing() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, 1);
        pool.shutdown();

        for _ in 0..3 {
            let err = pool.acquire().unwrap_err();
            assert!(matches!(err, Error::Routing(RoutingError::PoolClosed { .. })));
        }
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(cluster.opened(), 1);
    }

    #[test]
    fn test_unbalanced_return_keeps_outstanding_at_zero() {
        let cluster = MemoryCluster::new();
        let owner = pool(&cluster, 1);
        let stranger = pool(&cluster, 0);
        let conn = owner.acquire().unwrap();

        stranger.release(conn);
        assert_eq!(stranger.outstanding(), 0);
        assert_eq!(stranger.idle(), 1);
        assert_eq!(owner.outstanding(), 1);
    }

    #[test]
    fn test_drop_closes_idle_connections() {
        let cluster = MemoryCluster::new();
        drop(pool(&cluster, 4));
        assert_eq!(cluster.closed(), 4);
    }
}
