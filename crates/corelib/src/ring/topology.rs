//! Refreshable ring topology cache.
//!
//! [`RingTopology`] owns the current [`RingSnapshot`] and one
//! [`ConnectionPool`] per known host, all behind a single reader/writer
//! lock. Lookups take the read lock; refreshes build the replacement state
//! without the lock and then swap it in under the write lock, so a reader
//! sees either the old state or the new one, never a mix.
//!
//! # Pool lifecycle
//!
//! - A host that appears in the ring gets its pool in the same
//!   [`refresh`](RingTopology::refresh) that installs the ring naming it.
//! - A host that leaves the ring has its pool moved to a retired set. Returns
//!   for that host still land in the retired pool.
//! - A retired pool with nothing checked out is drained and closed on the
//!   next pool refresh. If the host comes back first, its pool is revived.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::error::{Error, Result, RoutingError};
use crate::network::{Connector, RingDescriber};
use crate::node::Host;
use crate::pool::ConnectionPool;
use crate::ring::ring::RingSnapshot;

type PoolMap<K> = HashMap<Host, Arc<ConnectionPool<K>>>;

struct TopologyState<K: Connector> {
    ring: Arc<RingSnapshot>,
    pools: PoolMap<K>,
    retired: PoolMap<K>,
}

/// Partition map plus per-host pools, replaced as one unit on refresh.
pub struct RingTopology<D: RingDescriber, K: Connector> {
    config: RouterConfig,
    describer: D,
    connector: Arc<K>,
    state: RwLock<TopologyState<K>>,
}

impl<D: RingDescriber, K: Connector> RingTopology<D, K> {
    /// Creates an empty topology. Nothing is fetched until the first refresh.
    pub fn new(config: RouterConfig, describer: D, connector: K) -> Self {
        Self {
            config,
            describer,
            connector: Arc::new(connector),
            state: RwLock::new(TopologyState {
                ring: Arc::new(RingSnapshot::empty()),
                pools: HashMap::new(),
                retired: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Fetches the ring description and installs the new partition map
    /// together with a pool for every host it names.
    ///
    /// Pools for new hosts are built before the write lock is taken, and the
    /// snapshot, live pools and retired pools are swapped in one write-lock
    /// section. A reader never sees a snapshot naming a host without a pool.
    /// On failure nothing changes and the cause is returned wrapped in
    /// [`Error::Refresh`].
    pub fn refresh(&self) -> Result<()> {
        let snapshot = self.fetch_snapshot()?;
        let mut created = PoolMap::new();
        let mut disposable = Vec::new();
        loop {
            let missing = missing_hosts(&self.state.read(), &snapshot, &created);
            created.extend(self.build_pools(missing));

            let mut state = self.state.write();
            // A concurrent refresh may have disposed a pool we counted on.
            if !missing_hosts(&state, &snapshot, &created).is_empty() {
                continue;
            }
            let ranges = snapshot.range_count();
            let hosts = snapshot.hosts().len();
            state.ring = Arc::new(snapshot);
            reconcile(&mut state, created, &mut disposable);
            drop(state);
            info!(ranges, hosts, "topology refreshed");
            break;
        }
        dispose(disposable);
        Ok(())
    }

    /// Fetches the ring description and replaces the partition map, host set
    /// and round-robin cursors in one step, leaving the pools alone.
    ///
    /// Hosts new to the ring have no pool until
    /// [`refresh_client_pools`](Self::refresh_client_pools) runs; use
    /// [`refresh`](Self::refresh) to do both at once. On failure the previous
    /// snapshot stays in place and the cause is returned wrapped in
    /// [`Error::Refresh`].
    pub fn refresh_endpoint_map(&self) -> Result<()> {
        let snapshot = self.fetch_snapshot()?;
        let ranges = snapshot.range_count();
        let hosts = snapshot.hosts().len();
        self.state.write().ring = Arc::new(snapshot);
        info!(ranges, hosts, "endpoint map refreshed");
        Ok(())
    }

    /// Brings the pool set in line with the current snapshot.
    ///
    /// New pools are constructed (and their seed connections opened) outside
    /// the lock; only the map updates happen under the write lock.
    pub fn refresh_client_pools(&self) {
        let missing = {
            let state = self.state.read();
            missing_hosts(&state, &state.ring, &PoolMap::new())
        };
        let created = self.build_pools(missing);

        let mut disposable = Vec::new();
        reconcile(&mut self.state.write(), created, &mut disposable);
        dispose(disposable);
    }

    fn fetch_snapshot(&self) -> Result<RingSnapshot> {
        let snapshot = self
            .describer
            .describe_ring(&self.config.keyspace)
            .and_then(|descriptions| RingSnapshot::from_descriptions(&descriptions))
            .map_err(|err| {
                warn!(keyspace = %self.config.keyspace, error = %err, "ring refresh failed, keeping previous snapshot");
                counter!("ringpool.refresh.failures").increment(1);
                Error::Refresh(Box::new(err))
            })?;

        if !snapshot.covers_ring() {
            warn!(ranges = snapshot.range_count(), "ring description leaves tokens uncovered");
        }
        Ok(snapshot)
    }

    fn build_pools(&self, hosts: Vec<Host>) -> PoolMap<K> {
        hosts
            .into_iter()
            .map(|host| {
                let pool = ConnectionPool::new(host.clone(), &self.config, Arc::clone(&self.connector));
                (host, Arc::new(pool))
            })
            .collect()
    }

    /// Current partition map.
    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        Arc::clone(&self.state.read().ring)
    }

    /// Picks the replica for `token` and returns its pool.
    ///
    /// The range lookup, the cursor step and the pool lookup all happen under
    /// one read lock, so they see the same snapshot.
    pub fn pool_for_token(&self, token: i64) -> Result<Arc<ConnectionPool<K>>> {
        let state = self.state.read();
        let host = state.ring.locate(token)?;
        state
            .pools
            .get(host)
            .cloned()
            .ok_or_else(|| RoutingError::NoPool { host: host.clone() }.into())
    }

    /// Pool a connection for `host` should be returned to, live or retired.
    pub fn pool_for_host(&self, host: &Host) -> Option<Arc<ConnectionPool<K>>> {
        let state = self.state.read();
        state
            .pools
            .get(host)
            .or_else(|| state.retired.get(host))
            .cloned()
    }

    /// Hosts with a live pool, sorted.
    pub fn pooled_hosts(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self.state.read().pools.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Hosts whose pools are retired but still have checkouts, sorted.
    pub fn retired_hosts(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self.state.read().retired.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Drops every pool, closing their idle connections.
    pub fn shutdown(&self) {
        let pools: Vec<Arc<ConnectionPool<K>>> = {
            let mut state = self.state.write();
            let live = std::mem::take(&mut state.pools);
            let retired = std::mem::take(&mut state.retired);
            live.into_values().chain(retired.into_values()).collect()
        };
        let count = pools.len();
        for pool in pools {
            pool.shutdown();
        }
        info!(pools = count, "topology shut down");
    }
}

/// Hosts of `ring` with no pool in `state` or `created`.
fn missing_hosts<K: Connector>(state: &TopologyState<K>, ring: &RingSnapshot, created: &PoolMap<K>) -> Vec<Host> {
    ring.hosts()
        .iter()
        .filter(|h| !state.pools.contains_key(*h) && !state.retired.contains_key(*h) && !created.contains_key(*h))
        .cloned()
        .collect()
}

/// Aligns the pool maps with `state.ring`: revives retired pools of hosts
/// that rejoined, installs `created`, retires pools of departed hosts and
/// sweeps retired pools with nothing checked out into `disposable`.
fn reconcile<K: Connector>(
    state: &mut TopologyState<K>,
    created: PoolMap<K>,
    disposable: &mut Vec<Arc<ConnectionPool<K>>>,
) {
    let TopologyState {
        ring,
        pools,
        retired,
    } = state;

    for host in ring.hosts() {
        if !pools.contains_key(host) {
            if let Some(pool) = retired.remove(host) {
                info!(%host, "host rejoined ring, reviving its pool");
                pools.insert(host.clone(), pool);
            }
        }
    }

    for (host, pool) in created {
        match pools.entry(host) {
            Entry::Vacant(slot) => {
                slot.insert(pool);
            }
            // A concurrent refresh got there first.
            Entry::Occupied(_) => disposable.push(pool),
        }
    }

    let departed: Vec<Host> = pools
        .keys()
        .filter(|h| !ring.contains_host(h))
        .cloned()
        .collect();
    for host in departed {
        if let Some(pool) = pools.remove(&host) {
            info!(%host, outstanding = pool.outstanding(), "host left ring, retiring its pool");
            retired.insert(host, pool);
        }
    }

    retired.retain(|_, pool| {
        if pool.outstanding() == 0 {
            disposable.push(Arc::clone(pool));
            false
        } else {
            true
        }
    });
}

fn dispose<K: Connector>(pools: Vec<Arc<ConnectionPool<K>>>) {
    for pool in pools {
        let closed = pool.shutdown();
        debug!(host = %pool.host(), closed, "disposed pool");
    }
}
