//! Message store tests against the in-memory cluster.

use std::sync::Arc;
use std::thread;

use corelib::memory::MemoryCluster;
use corelib::{Error, Router, RouterConfig};
use store::{Message, MessageStore, StoreError};

type MemoryStore = MessageStore<MemoryCluster, MemoryCluster>;

fn setup(hosts: &[&str], replication: usize) -> (MemoryCluster, MemoryStore) {
    let cluster = MemoryCluster::with_ring(MemoryCluster::evenly_split(hosts, replication));
    let config = RouterConfig::new(hosts[0], "offline_keyspace").with_connections_per_pool(2);
    let router = Router::new(config, cluster.clone(), cluster.clone()).unwrap();
    (cluster, MessageStore::new(Arc::new(router)))
}

fn message(receiver: &str, msg_id: &str, body: &str) -> Message {
    Message {
        receiver_id: receiver.into(),
        timestamp: "1700000000".into(),
        msg_id: msg_id.into(),
        group_id: "group".into(),
        msg: body.into(),
        sender_id: "sender".into(),
    }
}

#[test]
fn test_store_then_retrieve() {
    let (_cluster, store) = setup(&["a", "b", "c"], 2);
    let first = message("bob", "1", "hi bob");
    let second = message("bob", "2", "still there?");
    store.store(&first).unwrap();
    store.store(&second).unwrap();
    store.store(&message("carol", "3", "hi carol")).unwrap();

    assert_eq!(store.retrieve("bob").unwrap(), vec![first, second]);
    assert_eq!(store.retrieve("carol").unwrap().len(), 1);
    assert!(store.retrieve("nobody").unwrap().is_empty());
}

#[test]
fn test_quotes_survive_round_trip() {
    let (_cluster, store) = setup(&["a"], 1);
    let tricky = message("o'brien", "1", "it's '); DROP TABLE receiver_table; --");
    store.store(&tricky).unwrap();
    assert_eq!(store.retrieve("o'brien").unwrap(), vec![tricky]);
}

#[test]
fn test_failures_are_reported_and_connections_returned() {
    let (cluster, store) = setup(&["a"], 1);
    cluster.set_host_down("a", true);

    let err = store.store(&message("bob", "1", "lost")).unwrap_err();
    assert!(matches!(err, StoreError::Core(Error::Transport { .. })));
    assert!(err.is_retryable());

    let pool = store
        .router()
        .topology()
        .pool_for_host(&"a".into())
        .unwrap();
    assert_eq!(pool.outstanding(), 0);

    cluster.set_host_down("a", false);
    store.store(&message("bob", "2", "delivered")).unwrap();
    assert_eq!(store.retrieve("bob").unwrap().len(), 1);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_concurrent_writers() {
    let (cluster, store) = setup(&["a", "b", "c", "d"], 3);

    thread::scope(|s| {
        for t in 0..4 {
            let store = store.clone();
            s.spawn(move || {
                for i in 0..50 {
                    store
                        .store(&message(&format!("user-{t}"), &i.to_string(), "payload"))
                        .unwrap();
                }
            });
        }
    });

    for t in 0..4 {
        assert_eq!(store.retrieve(&format!("user-{t}")).unwrap().len(), 50);
    }
    assert_eq!(cluster.row_count("offline_keyspace", "receiver_table"), 200);
}
