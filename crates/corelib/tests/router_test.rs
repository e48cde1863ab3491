//! End-to-end tests for the router over the in-memory cluster.
//!
//! # Test Strategy
//!
//! 1. **Routing**: replica rotation, gaps, empty rings, key hashing
//! 2. **Refresh**: failures keep the old topology, hosts leave and rejoin
//! 3. **Connection hand-back**: discards on transport failures, orphans

use corelib::memory::MemoryCluster;
use corelib::{Connection, Error, Host, Router, RouterConfig, RoutingError, TokenRangeDescription};

type MemoryRouter = Router<MemoryCluster, MemoryCluster>;

fn config() -> RouterConfig {
    RouterConfig::new("hostA", "ks").with_connections_per_pool(2)
}

fn router(cluster: &MemoryCluster) -> MemoryRouter {
    Router::new(config(), cluster.clone(), cluster.clone()).unwrap()
}

fn two_range_cluster() -> MemoryCluster {
    MemoryCluster::with_ring(vec![
        TokenRangeDescription::new(100, 200, ["hostA", "hostB"]),
        TokenRangeDescription::new(200, 300, ["hostC"]),
    ])
}

/// Routes `token`, returns the connection and reports its host.
fn route_host(router: &MemoryRouter, token: i64) -> String {
    let conn = router.route_token(token).unwrap();
    let host = conn.host().to_string();
    router.return_connection(conn);
    host
}

// ============================================================================
// Routing
// ============================================================================

#[test]
fn test_round_robin_across_replicas() {
    let cluster = two_range_cluster();
    let router = router(&cluster);

    let picks: Vec<String> = (0..3).map(|_| route_host(&router, 150)).collect();
    assert_eq!(picks, vec!["hostA", "hostB", "hostA"]);

    for _ in 0..4 {
        assert_eq!(route_host(&router, 250), "hostC");
    }
    // Three pools seeded with two connections each, none grown.
    assert_eq!(cluster.opened(), 6);
}

#[test]
fn test_token_outside_every_range() {
    let cluster = two_range_cluster();
    let router = router(&cluster);

    let err = router.route_token(50).unwrap_err();
    assert!(matches!(err, Error::Routing(RoutingError::NoRange { token: 50 })));
}

#[test]
fn test_empty_ring_fails_routing() {
    let cluster = MemoryCluster::new();
    let router = router(&cluster);

    assert!(router.hosts().is_empty());
    let err = router.route(b"anything").unwrap_err();
    assert!(matches!(err, Error::Routing(RoutingError::EmptyRing)));
}

#[test]
fn test_route_by_key_uses_murmur_token() {
    let cluster = MemoryCluster::with_ring(MemoryCluster::evenly_split(&["a", "b", "c", "d"], 1));
    let router = router(&cluster);

    assert_eq!(router.token_for(b"hello"), -3758069500696749310);
    let snapshot = router.snapshot();
    for key in ["hello", "test-key", "key-1", "key-2", ""] {
        let token = router.token_for(key.as_bytes());
        let range = snapshot.find_range(token).expect("evenly split ring has no gaps");
        let owner = snapshot.replicas(range).next().unwrap().clone();

        let conn = router.route(key.as_bytes()).unwrap();
        assert_eq!(conn.host(), &owner, "key {key:?} routed to the wrong host");
        router.return_connection(conn);
    }
}

#[test]
fn test_ranges_report_current_ring() {
    let cluster = two_range_cluster();
    let router = router(&cluster);

    let ranges = router.ranges();
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[0].0.to_string(), "(100, 200]");
    assert_eq!(ranges[0].1, vec![Host::from("hostA"), Host::from("hostB")]);
    assert_eq!(ranges[1].1, vec![Host::from("hostC")]);
}

#[test]
fn test_invalid_config_rejected() {
    let cluster = MemoryCluster::new();
    let bad = RouterConfig::new("hostA", "ks").with_port(0);
    assert!(matches!(
        Router::new(bad, cluster.clone(), cluster.clone()),
        Err(Error::Protocol(_))
    ));
}

// ============================================================================
// Refresh
// ============================================================================

#[test]
fn test_initial_refresh_failure_fails_construction() {
    let cluster = two_range_cluster();
    cluster.fail_next_describes(1);
    let result = Router::new(config(), cluster.clone(), cluster.clone());
    assert!(matches!(result, Err(Error::Refresh(_))));
}

#[test]
fn test_refresh_failure_keeps_previous_topology() {
    let cluster = two_range_cluster();
    let router = router(&cluster);

    cluster.set_ring(MemoryCluster::evenly_split(&["other"], 1));
    cluster.fail_next_describes(1);
    assert!(matches!(router.refresh_topology(), Err(Error::Refresh(_))));

    assert_eq!(router.ranges().len(), 2);
    assert_eq!(route_host(&router, 250), "hostC");

    // The next refresh succeeds and picks up the new layout.
    router.refresh_topology().unwrap();
    assert_eq!(router.hosts(), vec![Host::from("other")]);
    assert_eq!(route_host(&router, 250), "other");
}

#[test]
fn test_malformed_ring_is_a_refresh_error() {
    let cluster = two_range_cluster();
    let router = router(&cluster);

    cluster.set_ring(vec![TokenRangeDescription {
        start_token: "not-a-token".into(),
        end_token: "5".into(),
        endpoints: vec!["hostA".into()],
    }]);
    match router.refresh_endpoint_map() {
        Err(Error::Refresh(cause)) => assert!(matches!(*cause, Error::Protocol(_))),
        other => panic!("expected refresh error, got {other:?}"),
    }
    assert_eq!(router.ranges().len(), 2);
}

#[test]
fn test_new_host_routable_after_refresh() {
    let cluster = two_range_cluster();
    let router = router(&cluster);

    cluster.set_ring(vec![
        TokenRangeDescription::new(100, 200, ["hostA", "hostB"]),
        TokenRangeDescription::new(200, 300, ["hostD"]),
    ]);
    router.refresh_topology().unwrap();

    assert_eq!(route_host(&router, 250), "hostD");
    assert_eq!(
        router.topology().pooled_hosts(),
        ["hostA", "hostB", "hostD"].map(Host::from).to_vec()
    );
    assert!(router.topology().retired_hosts().is_empty());
}

#[test]
fn test_endpoint_map_alone_leaves_new_host_unpooled() {
    let cluster = two_range_cluster();
    let router = router(&cluster);

    cluster.set_ring(vec![
        TokenRangeDescription::new(100, 200, ["hostA", "hostB"]),
        TokenRangeDescription::new(200, 300, ["hostD"]),
    ]);
    router.refresh_endpoint_map().unwrap();

    let err = router.route_token(250).unwrap_err();
    assert!(matches!(
        err,
        Error::Routing(RoutingError::NoPool { ref host }) if host.as_str() == "hostD"
    ));

    router.refresh_client_pools();
    assert_eq!(route_host(&router, 250), "hostD");
}

#[test]
fn test_departed_host_pool_retired_then_swept() {
    let cluster = MemoryCluster::with_ring(MemoryCluster::evenly_split(&["a", "b"], 1));
    let router = router(&cluster);
    assert_eq!(cluster.opened(), 4);

    // Hold a connection to "a" across its removal.
    let token_on_a = i64::MIN + 1;
    let held = router.route_token(token_on_a).unwrap();
    assert_eq!(held.host().as_str(), "a");

    cluster.set_ring(MemoryCluster::evenly_split(&["b"], 1));
    router.refresh_topology().unwrap();
    assert_eq!(router.topology().pooled_hosts(), vec![Host::from("b")]);
    assert_eq!(router.topology().retired_hosts(), vec![Host::from("a")]);
    assert_eq!(cluster.closed(), 0);

    // The late return lands in the retired pool, the next refresh sweeps it.
    router.return_connection(held);
    router.refresh_client_pools();
    assert!(router.topology().retired_hosts().is_empty());
    assert!(router.topology().pool_for_host(&Host::from("a")).is_none());
    assert_eq!(cluster.closed(), 2);
}

#[test]
fn test_rejoining_host_revives_pool() {
    let layout = MemoryCluster::evenly_split(&["a", "b"], 1);
    let cluster = MemoryCluster::with_ring(layout.clone());
    let router = router(&cluster);

    let held = router.route_token(i64::MIN + 1).unwrap();
    cluster.set_ring(MemoryCluster::evenly_split(&["b"], 1));
    router.refresh_topology().unwrap();
    assert_eq!(router.topology().retired_hosts(), vec![Host::from("a")]);

    cluster.set_ring(layout);
    router.refresh_topology().unwrap();
    assert_eq!(
        router.topology().pooled_hosts(),
        vec![Host::from("a"), Host::from("b")]
    );
    assert!(router.topology().retired_hosts().is_empty());

    router.return_connection(held);
    // Revived rather than rebuilt.
    assert_eq!(cluster.opened(), 4);
    assert_eq!(cluster.closed(), 0);
}

// ============================================================================
// Connection hand-back
// ============================================================================

#[test]
fn test_with_connection_returns_connection() {
    let cluster = MemoryCluster::with_ring(MemoryCluster::evenly_split(&["solo"], 1));
    let router = router(&cluster);

    router
        .with_connection(b"k", |conn| conn.execute("INSERT INTO t(id) VALUES('k');"))
        .unwrap();
    let rows = router
        .with_connection(b"k", |conn| conn.execute("SELECT * FROM t WHERE id = 'k';"))
        .unwrap()
        .rows;
    assert_eq!(rows, vec![vec!["k".to_string()]]);

    let pool = router.topology().pool_for_host(&Host::from("solo")).unwrap();
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.size(), 2);
}

#[test]
fn test_with_connection_discards_after_timeout() {
    let cluster = MemoryCluster::with_ring(MemoryCluster::evenly_split(&["solo"], 1));
    let router = router(&cluster);
    cluster.set_timeouts("solo", true);

    let result = router.with_connection(b"k", |conn| conn.execute("SELECT * FROM t WHERE id = 'k';"));
    assert!(matches!(result, Err(Error::Timeout(_))));

    let pool = router.topology().pool_for_host(&Host::from("solo")).unwrap();
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(cluster.closed(), 1);
}

#[test]
fn test_with_connection_keeps_connection_on_bad_statement() {
    let cluster = MemoryCluster::with_ring(MemoryCluster::evenly_split(&["solo"], 1));
    let router = router(&cluster);

    let result = router.with_connection(b"k", |conn| conn.execute("DROP TABLE t;"));
    assert!(matches!(result, Err(Error::Protocol(_))));
    assert_eq!(cluster.closed(), 0);
}

#[test]
fn test_return_after_shutdown_closes_connection() {
    let cluster = two_range_cluster();
    let router = router(&cluster);

    let held = router.route_token(250).unwrap();
    router.shutdown();
    assert!(router.topology().pooled_hosts().is_empty());

    router.return_connection(held);
    assert_eq!(cluster.closed(), cluster.opened());
}

#[test]
fn test_routing_after_shutdown_opens_nothing() {
    let cluster = two_range_cluster();
    let router = router(&cluster);
    router.shutdown();
    let opened = cluster.opened();

    let err = router.route_token(250).unwrap_err();
    assert!(matches!(err, Error::Routing(RoutingError::NoPool { .. })));
    assert_eq!(cluster.opened(), opened);
}

#[test]
fn test_swept_pool_refuses_checkouts() {
    let cluster = two_range_cluster();
    let router = router(&cluster);
    let swept = router.topology().pool_for_host(&Host::from("hostC")).unwrap();

    cluster.set_ring(vec![
        TokenRangeDescription::new(100, 200, ["hostA", "hostB"]),
        TokenRangeDescription::new(200, 300, ["hostD"]),
    ]);
    router.refresh_topology().unwrap();
    assert!(swept.is_closed());

    let opened = cluster.opened();
    let err = swept.acquire().unwrap_err();
    assert!(matches!(err, Error::Routing(RoutingError::PoolClosed { ref host }) if host.as_str() == "hostC"));
    assert_eq!(swept.size(), 0);
    assert_eq!(cluster.opened(), opened);
    assert_eq!(route_host(&router, 250), "hostD");
}
