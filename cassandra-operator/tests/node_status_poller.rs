//! Integration tests for the node status poller feeding the cache.

use cassandra_operator::cache::{MemberRegistry, NodeStatusCache};
use cassandra_operator::crd::NodeStatus;
use cassandra_operator::names::{ClusterKey, DataCenterNames, MemberKey, Rack};
use cassandra_operator::poller::NodeStatusPoller;
use cassandra_operator::testing::ScriptedSidecars;
use cassandra_operator::testing::fixtures::NAMESPACE;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

struct Setup {
    cache: Arc<NodeStatusCache>,
    registry: Arc<MemberRegistry>,
    sidecars: ScriptedSidecars,
}

impl Setup {
    fn new() -> Self {
        Self {
            cache: Arc::new(NodeStatusCache::new()),
            registry: Arc::new(MemberRegistry::new()),
            sidecars: ScriptedSidecars::new(),
        }
    }

    fn poller(&self, timeout: Duration) -> NodeStatusPoller {
        NodeStatusPoller::new(
            self.cache.clone(),
            self.registry.clone(),
            Arc::new(self.sidecars.clone()),
            Duration::from_secs(60),
            timeout,
        )
    }

    /// Register `replicas` members of datacenter `name`, pods `c1-<name>-rack1-<n>`.
    fn register(&self, name: &str, replicas: i32) -> ClusterKey {
        let naming = DataCenterNames::new("c1", name, NAMESPACE);
        let key = ClusterKey::new(NAMESPACE, name);
        self.registry
            .register(key.clone(), naming.members(&Rack::new(0), replicas));
        key
    }
}

fn pod(name: &str) -> MemberKey {
    MemberKey::new(NAMESPACE, name)
}

#[tokio::test]
async fn test_first_round_records_every_member() {
    let s = Setup::new();
    let key = s.register("dc1", 2);
    s.sidecars.set_status("c1-dc1-rack1-0", NodeStatus::Normal);
    s.sidecars.set_status("c1-dc1-rack1-1", NodeStatus::Joining);

    let changed = s.poller(Duration::from_secs(1)).poll_once().await;

    assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec![key]);
    assert_eq!(s.cache.get(&pod("c1-dc1-rack1-0")), Some(NodeStatus::Normal));
    assert_eq!(s.cache.get(&pod("c1-dc1-rack1-1")), Some(NodeStatus::Joining));
}

#[tokio::test]
async fn test_unchanged_statuses_emit_nothing() {
    let s = Setup::new();
    s.register("dc1", 1);
    s.sidecars.set_status("c1-dc1-rack1-0", NodeStatus::Normal);
    let poller = s.poller(Duration::from_secs(1));

    poller.poll_once().await;
    assert!(poller.poll_once().await.is_empty());

    s.sidecars.set_status("c1-dc1-rack1-0", NodeStatus::Leaving);
    assert_eq!(poller.poll_once().await.len(), 1);
}

#[tokio::test]
async fn test_unreachable_member_is_unknown_and_invalidated() {
    let s = Setup::new();
    s.register("dc1", 1);

    s.poller(Duration::from_secs(1)).poll_once().await;

    assert_eq!(s.cache.get(&pod("c1-dc1-rack1-0")), Some(NodeStatus::Unknown));
    assert_eq!(s.sidecars.invalidated(), vec!["c1-dc1-rack1-0".to_string()]);
}

#[tokio::test]
async fn test_slow_probe_times_out_as_unknown() {
    let s = Setup::new();
    s.register("dc1", 1);
    s.sidecars.set_status("c1-dc1-rack1-0", NodeStatus::Normal);
    s.sidecars.set_latency(Duration::from_millis(200));

    s.poller(Duration::from_millis(20)).poll_once().await;

    assert_eq!(s.cache.get(&pod("c1-dc1-rack1-0")), Some(NodeStatus::Unknown));
}

#[tokio::test]
async fn test_unregistered_members_leave_the_cache() {
    let s = Setup::new();
    let key = s.register("dc1", 1);
    s.sidecars.set_status("c1-dc1-rack1-0", NodeStatus::Normal);
    let poller = s.poller(Duration::from_secs(1));
    poller.poll_once().await;

    s.registry.unregister(&key);
    poller.poll_once().await;

    assert!(s.cache.get(&pod("c1-dc1-rack1-0")).is_none());
    assert!(s.cache.is_empty());
}

#[tokio::test]
async fn test_changes_are_sent_per_cluster() {
    let s = Setup::new();
    let first = s.register("a", 1);
    let second = s.register("b", 1);
    s.sidecars.set_status("c1-a-rack1-0", NodeStatus::Normal);
    s.sidecars.set_status("c1-b-rack1-0", NodeStatus::Normal);

    let (tx, rx) = futures::channel::mpsc::unbounded();
    let poller = s.poller(Duration::from_secs(1)).with_notifications(tx);
    poller.poll_once().await;
    drop(poller);

    let mut keys: Vec<ClusterKey> = rx.collect().await;
    keys.sort();
    assert_eq!(keys, vec![first, second]);
}
