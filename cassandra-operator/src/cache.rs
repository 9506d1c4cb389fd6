//! Process-wide node status cache and member registry.
//!
//! The poller is the only writer of statuses; reconciliation passes read a
//! [`StatusSnapshot`] copied at pass start so one pass never mixes stale and
//! fresh observations.

use crate::crd::NodeStatus;
use crate::names::{ClusterKey, Member, MemberKey};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

/// Last known status per namespace-qualified pod.
#[derive(Debug, Default)]
pub struct NodeStatusCache {
    statuses: DashMap<MemberKey, NodeStatus>,
}

impl NodeStatusCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of one pod, if observed.
    pub fn get(&self, key: &MemberKey) -> Option<NodeStatus> {
        self.statuses.get(key).map(|s| *s)
    }

    /// Record a status and return the previous one.
    pub fn set(&self, key: MemberKey, status: NodeStatus) -> Option<NodeStatus> {
        self.statuses.insert(key, status)
    }

    /// Drop one pod.
    pub fn remove(&self, key: &MemberKey) {
        self.statuses.remove(key);
    }

    /// Drop every pod not in `keep`.
    pub fn retain(&self, keep: &HashSet<MemberKey>) {
        self.statuses.retain(|key, _| keep.contains(key));
    }

    /// Number of cached pods.
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Copy the statuses of `members` for the duration of one pass.
    ///
    /// The members of one pass share a namespace, so the copy is indexed by
    /// pod name.
    pub fn snapshot<'a, I>(&self, members: I) -> StatusSnapshot
    where
        I: IntoIterator<Item = &'a Member>,
    {
        let statuses = members
            .into_iter()
            .filter_map(|m| self.get(&m.key()).map(|s| (m.name.clone(), s)))
            .collect();
        StatusSnapshot { statuses }
    }
}

/// Immutable per-pass copy of member statuses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    statuses: HashMap<String, NodeStatus>,
}

impl StatusSnapshot {
    /// Snapshot from explicit pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, NodeStatus)>,
        S: Into<String>,
    {
        Self {
            statuses: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Status of a pod; pods never observed are UNKNOWN.
    pub fn status_of(&self, pod: &str) -> NodeStatus {
        self.statuses.get(pod).copied().unwrap_or(NodeStatus::Unknown)
    }
}

/// Members to probe, grouped by the DataCenter that owns them.
#[derive(Debug, Default)]
pub struct MemberRegistry {
    members: DashMap<ClusterKey, Vec<Member>>,
}

impl MemberRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the members registered for `key`.
    pub fn register(&self, key: ClusterKey, members: Vec<Member>) {
        self.members.insert(key, members);
    }

    /// Forget every member of `key`.
    pub fn unregister(&self, key: &ClusterKey) {
        self.members.remove(key);
    }

    /// Members registered for `key`.
    pub fn members_of(&self, key: &ClusterKey) -> Vec<Member> {
        self.members
            .get(key)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    /// Every registered member with its owning key.
    pub fn entries(&self) -> Vec<(ClusterKey, Member)> {
        self.members
            .iter()
            .flat_map(|entry| {
                let key = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .map(move |m| (key.clone(), m.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Cache keys of every registered member.
    pub fn member_keys(&self) -> HashSet<MemberKey> {
        self.members
            .iter()
            .flat_map(|entry| entry.value().iter().map(Member::key).collect::<Vec<_>>())
            .collect()
    }
}
