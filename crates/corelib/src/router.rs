//! Key-based routing onto pooled connections.
//!
//! The [`Router`] is the service object applications hold (usually in an
//! `Arc`): it hashes a row key to its token, asks the [`RingTopology`] for the
//! next replica of the covering range, and checks a connection out of that
//! replica's pool.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, trace, warn};

use crate::config::RouterConfig;
use crate::error::{Error, Result, RoutingError};
use crate::network::{Connection, Connector, RingDescriber};
use crate::node::Host;
use crate::partitioner::{Murmur3Partitioner, Partitioner};
use crate::pool::PooledConnection;
use crate::ring::{RingSnapshot, RingTopology, TokenRange};
use crate::token::Token;

/// Routes row keys to pooled connections on their replicas.
pub struct Router<D: RingDescriber, K: Connector> {
    topology: RingTopology<D, K>,
    partitioner: Murmur3Partitioner,
}

impl<D: RingDescriber, K: Connector> Router<D, K> {
    /// Validates the configuration and performs the initial full refresh.
    pub fn new(config: RouterConfig, describer: D, connector: K) -> Result<Self> {
        config.validate()?;
        let router = Self {
            topology: RingTopology::new(config, describer, connector),
            partitioner: Murmur3Partitioner,
        };
        router.refresh_topology()?;
        Ok(router)
    }

    /// Ring token of a row key.
    pub fn token_for(&self, row_key: &[u8]) -> i64 {
        self.partitioner.partition(row_key).value()
    }

    /// Checks out a connection to the next replica responsible for `row_key`.
    ///
    /// The connection must be handed back with
    /// [`return_connection`](Self::return_connection).
    pub fn route(&self, row_key: &[u8]) -> Result<PooledConnection<K::Connection>> {
        self.route_token(self.token_for(row_key))
    }

    /// Like [`route`](Self::route) for an already computed token.
    pub fn route_token(&self, token: i64) -> Result<PooledConnection<K::Connection>> {
        counter!("ringpool.route.total").increment(1);
        let result = loop {
            let pool = match self.topology.pool_for_token(token) {
                Ok(pool) => pool,
                Err(err) => break Err(err),
            };
            match pool.acquire() {
                // Swept by a concurrent refresh. A closed pool is already out
                // of the topology, so the next lookup finds its replacement.
                Err(Error::Routing(RoutingError::PoolClosed { .. })) => continue,
                acquired => break acquired,
            }
        };
        match &result {
            Ok(conn) => trace!(token, host = %conn.host(), id = %conn.id(), "routed"),
            Err(err) => {
                counter!("ringpool.route.errors").increment(1);
                debug!(token, error = %err, "route failed");
            }
        }
        result
    }

    /// Gives a connection obtained from `route` back to its host's pool.
    ///
    /// If the host no longer has any pool the connection is closed.
    pub fn return_connection(&self, conn: PooledConnection<K::Connection>) {
        match self.topology.pool_for_host(conn.host()) {
            Some(pool) => pool.release(conn),
            None => close_orphan(conn),
        }
    }

    /// Closes a connection obtained from `route` instead of pooling it again.
    pub fn discard_connection(&self, conn: PooledConnection<K::Connection>) {
        match self.topology.pool_for_host(conn.host()) {
            Some(pool) => pool.discard(conn),
            None => close_orphan(conn),
        }
    }

    /// Routes `row_key`, runs `f` on the connection and always hands the
    /// connection back.
    ///
    /// A connection whose statement failed at the transport level or timed
    /// out is discarded rather than pooled again.
    pub fn with_connection<T, F>(&self, row_key: &[u8], f: F) -> Result<T>
    where
        F: FnOnce(&mut K::Connection) -> Result<T>,
    {
        let mut conn = self.route(row_key)?;
        let result = f(&mut *conn);
        match &result {
            Err(err) if err.is_retryable() => self.discard_connection(conn),
            _ => self.return_connection(conn),
        }
        result
    }

    /// Refreshes the partition map and the pool set, swapping both in at
    /// once so routing never lands on a host without a pool.
    ///
    /// Safe to call while other threads route and return connections. If the
    /// ring cannot be fetched the previous topology is kept and the error is
    /// returned.
    pub fn refresh_topology(&self) -> Result<()> {
        self.topology.refresh()
    }

    /// Replaces the partition map only. Hosts new to the ring route to
    /// [`RoutingError::NoPool`] until the pools are refreshed too.
    pub fn refresh_endpoint_map(&self) -> Result<()> {
        self.topology.refresh_endpoint_map()
    }

    pub fn refresh_client_pools(&self) {
        self.topology.refresh_client_pools()
    }

    /// Hosts of the current ring, in first-seen order.
    pub fn hosts(&self) -> Vec<Host> {
        self.topology.snapshot().hosts().to_vec()
    }

    /// Ranges of the current ring with their replicas, in token order.
    pub fn ranges(&self) -> Vec<(TokenRange, Vec<Host>)> {
        self.topology
            .snapshot()
            .ranges()
            .map(|view| (view.range, view.replicas.into_iter().cloned().collect()))
            .collect()
    }

    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        self.topology.snapshot()
    }

    pub fn topology(&self) -> &RingTopology<D, K> {
        &self.topology
    }

    /// Closes every pool. Connections still checked out are closed when
    /// they are returned.
    pub fn shutdown(&self) {
        self.topology.shutdown();
    }
}

fn close_orphan<C: Connection>(mut conn: PooledConnection<C>) {
    warn!(host = %conn.host(), id = %conn.id(), "no pool for returned connection, closing it");
    if let Err(err) = conn.close() {
        warn!(host = %conn.host(), error = %err, "failed to close orphaned connection");
    }
}
