//! Observed state of one DataCenter, frozen for the duration of a pass.
//!
//! Everything in here is pure: the snapshot is assembled from objects the
//! controller already fetched and from a [`StatusSnapshot`] copy of the node
//! status cache.

use crate::cache::StatusSnapshot;
use crate::crd::{NodeStatus, RackMode};
use crate::names::{DataCenterNames, Member, Rack};
use crate::resources::{recorded_generation, spec_replicas};
use k8s_openapi::api::apps::v1::StatefulSet;
use std::collections::BTreeMap;

/// Classify a rack from its desired and existing replica counts and the
/// generation its StatefulSet was built from.
///
/// A missing recorded generation never counts as stale.
pub fn classify_rack(
    desired_replicas: i32,
    existing_replicas: i32,
    recorded_generation: Option<i64>,
    current_generation: Option<i64>,
) -> RackMode {
    if desired_replicas > existing_replicas {
        return RackMode::ScaleUp;
    }
    if desired_replicas < existing_replicas {
        return RackMode::ScaleDown;
    }
    match (recorded_generation, current_generation) {
        (Some(recorded), Some(current)) if recorded < current => RackMode::Behind,
        _ => RackMode::Normal,
    }
}

/// Whether a StatefulSet has finished converging on its own spec.
///
/// Replicas, ready replicas and current replicas must all match the spec and
/// no revision rollout may be in progress.
pub fn is_statefulset_ready(sts: &StatefulSet) -> bool {
    let wanted = spec_replicas(sts);
    let Some(status) = sts.status.as_ref() else {
        return wanted == 0;
    };
    let rollout_done = match status.update_revision.as_deref() {
        None | Some("") => true,
        Some(update) => status.current_revision.as_deref() == Some(update),
    };
    status.replicas == wanted
        && status.ready_replicas.unwrap_or(0) == wanted
        && status.current_replicas.unwrap_or(0) == wanted
        && rollout_done
}

/// One rack: the StatefulSet that exists and the one the spec asks for.
#[derive(Debug, Clone)]
pub struct ReplicaGroup {
    /// Rack.
    pub rack: Rack,
    /// StatefulSet currently applied.
    pub existing: StatefulSet,
    /// StatefulSet built from the current spec and planned replica count.
    pub desired: StatefulSet,
}

impl ReplicaGroup {
    /// Pair an existing StatefulSet with its desired counterpart.
    pub fn new(rack: Rack, existing: StatefulSet, desired: StatefulSet) -> Self {
        Self {
            rack,
            existing,
            desired,
        }
    }

    /// Replicas the applied StatefulSet asks for.
    pub fn existing_replicas(&self) -> i32 {
        spec_replicas(&self.existing)
    }

    /// Replicas the spec asks for.
    pub fn desired_replicas(&self) -> i32 {
        spec_replicas(&self.desired)
    }

    /// Replicas reported by the applied StatefulSet's status.
    pub fn status_replicas(&self) -> i32 {
        self.existing.status.as_ref().map(|s| s.replicas).unwrap_or(0)
    }

    /// Ready replicas reported by the applied StatefulSet's status.
    pub fn ready_replicas(&self) -> i32 {
        self.existing
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
    }
}

struct RackView {
    group: ReplicaGroup,
    mode: RackMode,
    ready: bool,
    members: Vec<Member>,
}

/// Immutable view of a DataCenter for one reconciliation pass.
pub struct ObservedState {
    racks: Vec<RackView>,
    statuses: StatusSnapshot,
}

impl ObservedState {
    /// Classify every group against `generation` and resolve member statuses.
    ///
    /// Members are enumerated from each rack's existing replica count.
    pub fn new(
        naming: &DataCenterNames,
        generation: Option<i64>,
        mut groups: Vec<ReplicaGroup>,
        statuses: StatusSnapshot,
    ) -> Self {
        groups.sort_by(|a, b| a.rack.cmp(&b.rack));
        let racks = groups
            .into_iter()
            .map(|group| {
                let mode = classify_rack(
                    group.desired_replicas(),
                    group.existing_replicas(),
                    recorded_generation(&group.existing),
                    generation,
                );
                let ready = is_statefulset_ready(&group.existing);
                let members = naming.members(&group.rack, group.existing_replicas());
                RackView {
                    group,
                    mode,
                    ready,
                    members,
                }
            })
            .collect();
        Self { racks, statuses }
    }

    /// Every rack group, in rack order.
    pub fn groups(&self) -> impl Iterator<Item = &ReplicaGroup> {
        self.racks.iter().map(|r| &r.group)
    }

    /// Group of `rack`.
    pub fn group(&self, rack: &Rack) -> Option<&ReplicaGroup> {
        self.racks
            .iter()
            .find(|r| &r.group.rack == rack)
            .map(|r| &r.group)
    }

    /// Mode of `rack`.
    pub fn mode_of(&self, rack: &Rack) -> Option<RackMode> {
        self.racks.iter().find(|r| &r.group.rack == rack).map(|r| r.mode)
    }

    /// Racks grouped by mode, each list in rack order.
    pub fn racks_by_mode(&self) -> BTreeMap<RackMode, Vec<Rack>> {
        let mut by_mode: BTreeMap<RackMode, Vec<Rack>> = BTreeMap::new();
        for view in &self.racks {
            by_mode
                .entry(view.mode)
                .or_default()
                .push(view.group.rack.clone());
        }
        by_mode
    }

    /// Racks in `mode`, in rack order.
    pub fn racks_in(&self, mode: RackMode) -> Vec<Rack> {
        self.racks
            .iter()
            .filter(|r| r.mode == mode)
            .map(|r| r.group.rack.clone())
            .collect()
    }

    /// Racks split by readiness, each list in rack order.
    pub fn readiness_by_rack(&self) -> BTreeMap<bool, Vec<Rack>> {
        let mut by_ready: BTreeMap<bool, Vec<Rack>> = BTreeMap::new();
        for view in &self.racks {
            by_ready
                .entry(view.ready)
                .or_default()
                .push(view.group.rack.clone());
        }
        by_ready
    }

    /// Whether `rack` has converged.
    pub fn is_ready(&self, rack: &Rack) -> bool {
        self.racks
            .iter()
            .any(|r| &r.group.rack == rack && r.ready)
    }

    /// Member names grouped by status, each list in member order.
    pub fn members_by_status(&self) -> BTreeMap<NodeStatus, Vec<String>> {
        let mut by_status: BTreeMap<NodeStatus, Vec<String>> = BTreeMap::new();
        for member in self.all_members() {
            by_status
                .entry(self.statuses.status_of(&member.name))
                .or_default()
                .push(member.name.clone());
        }
        by_status
    }

    /// Every member, ordered by rack then ordinal.
    pub fn all_members(&self) -> impl Iterator<Item = &Member> {
        self.racks.iter().flat_map(|r| r.members.iter())
    }

    /// Members of `rack`, by ordinal.
    pub fn members_of(&self, rack: &Rack) -> &[Member] {
        self.racks
            .iter()
            .find(|r| &r.group.rack == rack)
            .map(|r| r.members.as_slice())
            .unwrap_or(&[])
    }

    /// Status of a member as of pass start.
    pub fn status_of(&self, member: &Member) -> NodeStatus {
        self.statuses.status_of(&member.name)
    }

    /// Members whose status blocks topology changes.
    pub fn moving_members(&self) -> Vec<&Member> {
        self.all_members()
            .filter(|m| self.status_of(m).is_moving())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{StatefulSetSpec, StatefulSetStatus};

    fn sts(replicas: i32, status: StatefulSetStatus) -> StatefulSet {
        StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: Some(status),
            ..Default::default()
        }
    }

    fn converged(replicas: i32) -> StatefulSetStatus {
        StatefulSetStatus {
            replicas,
            ready_replicas: Some(replicas),
            current_replicas: Some(replicas),
            current_revision: Some("a".into()),
            update_revision: Some("a".into()),
            ..Default::default()
        }
    }

    #[test]
    fn classification_compares_counts_first() {
        assert_eq!(classify_rack(3, 2, Some(1), Some(5)), RackMode::ScaleUp);
        assert_eq!(classify_rack(1, 2, Some(1), Some(5)), RackMode::ScaleDown);
        assert_eq!(classify_rack(2, 2, Some(1), Some(5)), RackMode::Behind);
        assert_eq!(classify_rack(2, 2, Some(5), Some(5)), RackMode::Normal);
    }

    #[test]
    fn missing_generation_is_not_stale() {
        assert_eq!(classify_rack(2, 2, None, Some(5)), RackMode::Normal);
        assert_eq!(classify_rack(2, 2, Some(1), None), RackMode::Normal);
    }

    #[test]
    fn ready_requires_every_counter() {
        assert!(is_statefulset_ready(&sts(3, converged(3))));

        let mut not_ready = converged(3);
        not_ready.ready_replicas = Some(2);
        assert!(!is_statefulset_ready(&sts(3, not_ready)));

        let mut not_current = converged(3);
        not_current.current_replicas = Some(2);
        assert!(!is_statefulset_ready(&sts(3, not_current)));

        assert!(!is_statefulset_ready(&sts(4, converged(3))));
    }

    #[test]
    fn rollout_in_progress_is_not_ready() {
        let mut rolling = converged(3);
        rolling.update_revision = Some("b".into());
        assert!(!is_statefulset_ready(&sts(3, rolling)));

        let mut no_update = converged(3);
        no_update.update_revision = None;
        assert!(is_statefulset_ready(&sts(3, no_update)));
    }

    #[test]
    fn observed_state_groups_racks_and_members() {
        use crate::testing::fixtures;

        let dc = fixtures::datacenter("dc1", 4, 2);
        let naming = DataCenterNames::of(&dc);
        let racks = fixtures::racks(&dc);
        let groups = vec![
            ReplicaGroup::new(
                racks[1].clone(),
                fixtures::ready_statefulset(&dc, &racks[1], 1),
                fixtures::ready_statefulset(&dc, &racks[1], 2),
            ),
            ReplicaGroup::new(
                racks[0].clone(),
                fixtures::converging_statefulset(&dc, &racks[0], 2, 1),
                fixtures::ready_statefulset(&dc, &racks[0], 2),
            ),
        ];
        let statuses = StatusSnapshot::from_pairs([
            (fixtures::pod(&dc, 0, 0), NodeStatus::Normal),
            (fixtures::pod(&dc, 0, 1), NodeStatus::Joining),
        ]);

        let state = ObservedState::new(&naming, Some(1), groups, statuses);

        let by_mode = state.racks_by_mode();
        assert_eq!(by_mode.get(&RackMode::Normal), Some(&vec![racks[0].clone()]));
        assert_eq!(by_mode.get(&RackMode::ScaleUp), Some(&vec![racks[1].clone()]));

        let by_ready = state.readiness_by_rack();
        assert_eq!(by_ready.get(&false), Some(&vec![racks[0].clone()]));
        assert_eq!(by_ready.get(&true), Some(&vec![racks[1].clone()]));

        let names: Vec<_> = state.all_members().map(|m| m.name.clone()).collect();
        assert_eq!(
            names,
            vec!["c1-dc1-rack1-0", "c1-dc1-rack1-1", "c1-dc1-rack2-0"]
        );

        let by_status = state.members_by_status();
        assert_eq!(by_status.get(&NodeStatus::Unknown), Some(&vec!["c1-dc1-rack2-0".to_string()]));
        assert_eq!(state.moving_members().len(), 2);
    }
}
