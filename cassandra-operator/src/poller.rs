//! Node status poller.
//!
//! Periodically probes the sidecar of every registered member and writes the
//! result into the [`NodeStatusCache`]. When a member's status changes, the
//! owning [`ClusterKey`] is emitted so that DataCenter gets reconciled.

use crate::cache::{MemberRegistry, NodeStatusCache};
use crate::crd::NodeStatus;
use crate::names::{ClusterKey, Member};
use crate::sidecar::SidecarClientFactory;
use futures::channel::mpsc::UnboundedSender;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Timer-driven producer feeding the node status cache.
pub struct NodeStatusPoller {
    cache: Arc<NodeStatusCache>,
    registry: Arc<MemberRegistry>,
    sidecars: Arc<dyn SidecarClientFactory>,
    interval: Duration,
    timeout: Duration,
    changes: Option<UnboundedSender<ClusterKey>>,
}

impl NodeStatusPoller {
    /// Poller probing every `interval`, each probe bounded by `timeout`.
    pub fn new(
        cache: Arc<NodeStatusCache>,
        registry: Arc<MemberRegistry>,
        sidecars: Arc<dyn SidecarClientFactory>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            registry,
            sidecars,
            interval,
            timeout,
            changes: None,
        }
    }

    /// Emit the cluster key of every member whose status changed.
    pub fn with_notifications(mut self, changes: UnboundedSender<ClusterKey>) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Probe forever.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting node status poller"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let changed = self.poll_once().await;
            if !changed.is_empty() {
                tracing::debug!(clusters = changed.len(), "Node status changed");
            }
        }
    }

    /// Run one probe round and return the keys whose members changed status.
    pub async fn poll_once(&self) -> BTreeSet<ClusterKey> {
        self.cache.retain(&self.registry.member_keys());

        let entries = self.registry.entries();
        let probes = entries.iter().map(|(key, member)| async move {
            let status = self.probe(member).await;
            (key, member, status)
        });

        let mut changed = BTreeSet::new();
        for (key, member, status) in join_all(probes).await {
            let previous = self.cache.set(member.key(), status);
            if previous != Some(status) {
                tracing::info!(
                    pod = %member.name,
                    previous = ?previous,
                    status = %status,
                    "Node status changed"
                );
                changed.insert(key.clone());
            }
        }

        if let Some(changes) = &self.changes {
            for key in &changed {
                if changes.unbounded_send(key.clone()).is_err() {
                    tracing::warn!(key = %key, "Status change receiver dropped");
                }
            }
        }
        changed
    }

    async fn probe(&self, member: &Member) -> NodeStatus {
        let client = match self.sidecars.client_for(member) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(pod = %member.name, error = %e, "Cannot build sidecar client");
                return NodeStatus::Unknown;
            }
        };

        match tokio::time::timeout(self.timeout, client.status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                tracing::debug!(pod = %member.name, error = %e, "Status probe failed");
                self.sidecars.invalidate(member);
                NodeStatus::Unknown
            }
            Err(_) => {
                tracing::debug!(pod = %member.name, "Status probe timed out");
                self.sidecars.invalidate(member);
                NodeStatus::Unknown
            }
        }
    }
}
