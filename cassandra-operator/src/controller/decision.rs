//! Scaling and update decisions.
//!
//! [`decide`] looks at one [`ObservedState`] and picks at most one mutating
//! step. It performs no I/O; the DataCenter controller applies the result.
//!
//! Guards, checked in order, each ending the pass without a mutation:
//! 1. racks scaling up and down at the same time: inconsistent
//! 2. more than one rack scaling in the same direction: inconsistent
//! 3. a rack StatefulSet still converging: wait
//! 4. a member in a moving node status: wait
//!
//! Then the first rule that matches wins: roll a BEHIND rack, grow a
//! SCALE_UP rack by one, shrink a SCALE_DOWN rack by one once its last member
//! is decommissioned, or report convergence.

use super::snapshot::ObservedState;
use super::topology::{pick_scale_down_rack, pick_scale_up_rack};
use crate::crd::{DataCenterPhase, DataCenterStatus, NodeStatus, PodStatus, RackMode, RackStatus};
use crate::names::{Member, Rack};

/// The single step chosen for a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The observed topology breaks the one-rack-at-a-time rule.
    Inconsistent {
        /// What is wrong.
        reason: String,
    },
    /// Some rack StatefulSets have not converged yet.
    WaitForRacks {
        /// Racks not ready.
        racks: Vec<Rack>,
    },
    /// Some members are in a moving status.
    WaitForMembers {
        /// Names of the moving members.
        members: Vec<String>,
    },
    /// Roll a rack to the current spec.
    UpdateRack {
        /// Rack to roll.
        rack: Rack,
    },
    /// Grow a rack by one member.
    ScaleUp {
        /// Rack to grow.
        rack: Rack,
        /// Replica count to apply.
        replicas: i32,
    },
    /// Ask the member about to be removed to leave the ring first.
    Decommission {
        /// Rack being shrunk.
        rack: Rack,
        /// Member to decommission.
        member: Member,
    },
    /// Shrink a rack by one member whose decommission has completed.
    ScaleDown {
        /// Rack to shrink.
        rack: Rack,
        /// Replica count to apply.
        replicas: i32,
        /// Member being removed.
        member: Member,
    },
    /// The member to remove is neither NORMAL nor DECOMMISSIONED.
    WaitForDecommission {
        /// Rack being shrunk.
        rack: Rack,
        /// Member to remove.
        member: Member,
        /// Its current status.
        status: NodeStatus,
    },
    /// Every rack is NORMAL.
    Converged {
        /// Whether a cleanup task should be created.
        trigger_cleanup: bool,
    },
}

impl Decision {
    /// Phase the DataCenter is in after this decision.
    ///
    /// Waiting keeps the previous phase.
    pub fn phase(&self, previous: DataCenterPhase) -> DataCenterPhase {
        match self {
            Decision::Inconsistent { .. } => DataCenterPhase::Error,
            Decision::WaitForRacks { .. } | Decision::WaitForMembers { .. } => previous,
            Decision::UpdateRack { .. } => DataCenterPhase::Updating,
            Decision::ScaleUp { .. } => DataCenterPhase::ScalingUp,
            Decision::Decommission { .. }
            | Decision::ScaleDown { .. }
            | Decision::WaitForDecommission { .. } => DataCenterPhase::ScalingDown,
            Decision::Converged { .. } => DataCenterPhase::Running,
        }
    }

    /// Whether applying this decision writes a StatefulSet.
    pub fn writes_statefulset(&self) -> bool {
        matches!(
            self,
            Decision::UpdateRack { .. } | Decision::ScaleUp { .. } | Decision::ScaleDown { .. }
        )
    }
}

/// Pick the step for this pass.
///
/// `desired_size` is the DataCenter's total replica count; it only matters for
/// deciding whether a scale-up convergence needs a cleanup.
pub fn decide(
    state: &ObservedState,
    previous_phase: DataCenterPhase,
    desired_size: i32,
) -> Decision {
    let scale_up = state.racks_in(RackMode::ScaleUp);
    let scale_down = state.racks_in(RackMode::ScaleDown);

    if !scale_up.is_empty() && !scale_down.is_empty() {
        return Decision::Inconsistent {
            reason: format!(
                "racks {} scale up while racks {} scale down",
                join(&scale_up),
                join(&scale_down)
            ),
        };
    }
    if scale_up.len() > 1 {
        return Decision::Inconsistent {
            reason: format!("more than one rack scales up: {}", join(&scale_up)),
        };
    }
    if scale_down.len() > 1 {
        return Decision::Inconsistent {
            reason: format!("more than one rack scales down: {}", join(&scale_down)),
        };
    }

    let not_ready = state
        .readiness_by_rack()
        .remove(&false)
        .unwrap_or_default();
    if !not_ready.is_empty() {
        return Decision::WaitForRacks { racks: not_ready };
    }

    let moving: Vec<String> = state
        .moving_members()
        .into_iter()
        .map(|m| m.name.clone())
        .collect();
    if !moving.is_empty() {
        return Decision::WaitForMembers { members: moving };
    }

    if let Some(rack) = state.racks_in(RackMode::Behind).into_iter().next() {
        return Decision::UpdateRack { rack };
    }

    let candidates = |racks: &[Rack]| -> Vec<(Rack, i32)> {
        racks
            .iter()
            .filter_map(|r| state.group(r).map(|g| (r.clone(), g.existing_replicas())))
            .collect()
    };

    let up = candidates(&scale_up);
    if let Some(rack) = pick_scale_up_rack(up.iter().map(|(r, n)| (r, *n))) {
        let replicas = state
            .group(rack)
            .map(|g| g.existing_replicas() + 1)
            .unwrap_or(1);
        return Decision::ScaleUp {
            rack: rack.clone(),
            replicas,
        };
    }

    let down = candidates(&scale_down);
    if let Some(rack) = pick_scale_down_rack(down.iter().map(|(r, n)| (r, *n))) {
        let replicas = state
            .group(rack)
            .map(|g| g.existing_replicas() - 1)
            .unwrap_or(0)
            .max(0);
        // the member left out once the rack runs `replicas` pods
        let Some(member) = state
            .members_of(rack)
            .iter()
            .find(|m| m.ordinal == replicas)
            .cloned()
        else {
            return Decision::Inconsistent {
                reason: format!("rack {} has no member with ordinal {}", rack, replicas),
            };
        };
        return match state.status_of(&member) {
            NodeStatus::Normal => Decision::Decommission {
                rack: rack.clone(),
                member,
            },
            NodeStatus::Decommissioned => Decision::ScaleDown {
                rack: rack.clone(),
                replicas,
                member,
            },
            status => Decision::WaitForDecommission {
                rack: rack.clone(),
                member,
                status,
            },
        };
    }

    let trigger_cleanup = match previous_phase {
        DataCenterPhase::ScalingDown => true,
        DataCenterPhase::ScalingUp => desired_size > 1,
        _ => false,
    };
    Decision::Converged { trigger_cleanup }
}

fn join(racks: &[Rack]) -> String {
    racks
        .iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Accumulates the DataCenter status over one pass; written once at the end.
#[derive(Debug, Clone)]
pub struct StatusBuilder {
    status: DataCenterStatus,
}

impl StatusBuilder {
    /// Start from the status persisted by the previous pass.
    pub fn from_previous(previous: Option<&DataCenterStatus>) -> Self {
        Self {
            status: previous.cloned().unwrap_or_default(),
        }
    }

    /// Recompute the aggregate, rack and member fields from `state`.
    pub fn observe(&mut self, state: &ObservedState, generation: Option<i64>) -> &mut Self {
        let mut replicas = 0;
        let mut ready_replicas = 0;
        let mut rack_statuses = Vec::new();
        for group in state.groups() {
            replicas += group.status_replicas();
            ready_replicas += group.ready_replicas();
            rack_statuses.push(RackStatus {
                name: group.rack.name.clone(),
                ready: state.is_ready(&group.rack),
                mode: state.mode_of(&group.rack).unwrap_or(RackMode::Unknown),
                replicas: group.existing_replicas(),
            });
        }

        let pod_statuses: Vec<PodStatus> = state
            .all_members()
            .map(|m| PodStatus {
                pod_name: m.name.clone(),
                mode: state.status_of(m),
            })
            .collect();
        let joined_replicas = pod_statuses
            .iter()
            .filter(|p| p.mode == NodeStatus::Normal)
            .count() as i32;

        self.status.replicas = replicas;
        self.status.ready_replicas = ready_replicas;
        self.status.joined_replicas = joined_replicas;
        self.status.rack_statuses = rack_statuses;
        self.status.pod_statuses = pod_statuses;
        self.status.observed_generation = generation;
        self
    }

    /// Set the phase.
    pub fn set_phase(&mut self, phase: DataCenterPhase) -> &mut Self {
        self.status.phase = phase;
        self
    }

    /// Record an error message.
    pub fn set_error(&mut self, message: impl Into<String>) -> &mut Self {
        self.status.last_error_message = Some(message.into());
        self
    }

    /// Drop the recorded error message.
    pub fn clear_error(&mut self) -> &mut Self {
        self.status.last_error_message = None;
        self
    }

    /// Final status.
    pub fn build(self) -> DataCenterStatus {
        self.status
    }
}
