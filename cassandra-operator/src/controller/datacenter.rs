//! DataCenter controller.
//!
//! Each reconciliation runs as one work queue unit under the DataCenter's
//! cluster key:
//! 1. ensure the headless Service
//! 2. create missing rack StatefulSets (and end the pass)
//! 3. plan per-rack counts and build the observed state
//! 4. register members with the poller
//! 5. decide and apply one step
//! 6. persist the status

use super::decision::{Decision, StatusBuilder, decide};
use super::snapshot::{ObservedState, ReplicaGroup};
use super::topology::{initial_distribution, plan_desired};
use super::{ControllerContext, ReconcileAction};
use crate::audit::audit_logger;
use crate::crd::{DataCenter, DataCenterPhase};
use crate::error::{OperatorError, OperatorResult};
use crate::names::{ClusterKey, DataCenterNames, Member, Rack};
use crate::resources::{
    build_cleanup_task, build_headless_service, build_statefulset, set_replicas, spec_replicas,
};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Controller for DataCenter resources.
#[derive(Clone)]
pub struct DataCenterController {
    ctx: Arc<ControllerContext>,
}

impl DataCenterController {
    /// Create a new DataCenter controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Reconcile a DataCenter resource.
    ///
    /// The pass itself is queued behind any task step running against the
    /// same DataCenter and re-reads the resource once it starts.
    pub async fn reconcile(&self, dc: Arc<DataCenter>) -> OperatorResult<ReconcileAction> {
        let name = dc.name_any();
        let namespace = dc
            .namespace()
            .ok_or_else(|| OperatorError::InvalidConfig("DataCenter must be namespaced".into()))?;
        let key = ClusterKey::new(&namespace, &name);

        if dc.metadata.deletion_timestamp.is_some() {
            tracing::info!(datacenter = %name, namespace = %namespace, "DataCenter is being deleted");
            self.ctx.registry.unregister(&key);
            return Ok(ReconcileAction::Done);
        }

        let ctx = self.ctx.clone();
        self.ctx
            .queue
            .submit(key, "reconcile datacenter", async move {
                Pass::new(&ctx, &namespace, &name).run().await
            })
            .result()
            .await
    }
}

/// Error policy for the DataCenter controller.
pub fn error_policy(
    dc: Arc<DataCenter>,
    error: &OperatorError,
    _ctx: Arc<ControllerContext>,
) -> kube::runtime::controller::Action {
    tracing::error!(datacenter = %dc.name_any(), error = %error, "Reconciliation error");
    kube::runtime::controller::Action::requeue(std::time::Duration::from_secs(30))
}

struct Pass<'a> {
    ctx: &'a ControllerContext,
    namespace: &'a str,
    name: &'a str,
}

impl<'a> Pass<'a> {
    fn new(ctx: &'a ControllerContext, namespace: &'a str, name: &'a str) -> Self {
        Self {
            ctx,
            namespace,
            name,
        }
    }

    async fn run(&self) -> OperatorResult<ReconcileAction> {
        let Some(dc) = self.ctx.store.get_datacenter(self.namespace, self.name).await? else {
            tracing::debug!(datacenter = %self.name, "DataCenter is gone, nothing to do");
            return Ok(ReconcileAction::Done);
        };
        let naming = DataCenterNames::of(&dc);
        let generation = dc.metadata.generation;

        tracing::info!(
            datacenter = %self.name,
            namespace = %self.namespace,
            replicas = dc.spec.replicas,
            racks = dc.spec.racks,
            generation = ?generation,
            "Reconciling DataCenter"
        );

        self.ctx
            .store
            .ensure_service(self.namespace, build_headless_service(&dc))
            .await?;

        let racks = Rack::all(dc.spec.racks.max(0) as usize);
        let mut existing = BTreeMap::new();
        let mut missing = Vec::new();
        for rack in &racks {
            let sts_name = naming.statefulset_name(rack);
            match self.ctx.store.get_statefulset(self.namespace, &sts_name).await? {
                Some(sts) => {
                    existing.insert(rack.clone(), sts);
                }
                None => missing.push(rack.clone()),
            }
        }

        if !missing.is_empty() {
            let initial = initial_distribution(dc.spec.replicas, racks.len());
            for rack in &missing {
                let replicas = initial.get(rack.index).copied().unwrap_or(0);
                self.ctx
                    .store
                    .create_statefulset(self.namespace, build_statefulset(&dc, rack, replicas))
                    .await?;
                tracing::info!(
                    datacenter = %self.name,
                    rack = %rack,
                    replicas = replicas,
                    "Created rack StatefulSet"
                );
            }
            return Ok(ReconcileAction::requeue_short());
        }

        let counts: BTreeMap<Rack, i32> = existing
            .iter()
            .map(|(rack, sts)| (rack.clone(), spec_replicas(sts)))
            .collect();
        let planned = plan_desired(&counts, dc.spec.replicas);
        let groups: Vec<ReplicaGroup> = existing
            .into_iter()
            .map(|(rack, sts)| {
                let replicas = planned.get(&rack).copied().unwrap_or(0);
                let desired = build_statefulset(&dc, &rack, replicas);
                ReplicaGroup::new(rack, sts, desired)
            })
            .collect();

        let members: Vec<Member> = groups
            .iter()
            .flat_map(|g| naming.members(&g.rack, g.existing_replicas()))
            .collect();
        self.ctx
            .registry
            .register(ClusterKey::new(self.namespace, self.name), members.clone());
        let statuses = self.ctx.cache.snapshot(&members);
        let state = ObservedState::new(&naming, generation, groups, statuses);

        let previous = dc.status.as_ref().map(|s| s.phase).unwrap_or_default();
        let decision = decide(&state, previous, dc.spec.replicas);
        tracing::debug!(datacenter = %self.name, decision = ?decision, "Decision taken");

        let mut status = StatusBuilder::from_previous(dc.status.as_ref());
        status.observe(&state, generation);
        self.apply(&dc, &state, &decision, previous, &mut status).await?;
        status.set_phase(decision.phase(previous));

        self.ctx
            .store
            .replace_datacenter_status(self.namespace, self.name, status.build())
            .await?;

        Ok(match decision {
            Decision::Converged { .. } => ReconcileAction::Requeue(self.ctx.config.requeue_interval),
            Decision::Inconsistent { .. } => ReconcileAction::requeue_medium(),
            _ => ReconcileAction::requeue_short(),
        })
    }

    async fn apply(
        &self,
        dc: &DataCenter,
        state: &ObservedState,
        decision: &Decision,
        previous: DataCenterPhase,
        status: &mut StatusBuilder,
    ) -> OperatorResult<()> {
        let audit = audit_logger();
        match decision {
            Decision::Inconsistent { reason } => {
                tracing::error!(datacenter = %self.name, reason = %reason, "Inconsistent topology");
                audit.log_inconsistent(self.name, self.namespace, reason);
                status.set_error(reason.clone());
            }
            Decision::WaitForRacks { racks } => {
                tracing::debug!(
                    datacenter = %self.name,
                    racks = ?racks.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
                    "Waiting for racks to converge"
                );
            }
            Decision::WaitForMembers { members } => {
                tracing::info!(
                    datacenter = %self.name,
                    members = ?members,
                    "Waiting for moving members"
                );
            }
            Decision::UpdateRack { rack } => {
                let group = self.group(state, rack)?;
                self.ctx
                    .store
                    .replace_statefulset(self.namespace, group.desired.clone())
                    .await?;
                tracing::info!(datacenter = %self.name, rack = %rack, "Rolling rack to current spec");
                audit.log_rack_updated(self.name, self.namespace, &rack.name, dc.metadata.generation);
            }
            Decision::ScaleUp { rack, replicas } => {
                let group = self.group(state, rack)?;
                let mut sts = group.desired.clone();
                set_replicas(&mut sts, *replicas);
                self.ctx.store.replace_statefulset(self.namespace, sts).await?;
                tracing::info!(
                    datacenter = %self.name,
                    rack = %rack,
                    from = group.existing_replicas(),
                    to = replicas,
                    "Scaling rack up"
                );
                audit.log_rack_scaled(
                    self.name,
                    self.namespace,
                    &rack.name,
                    group.existing_replicas(),
                    *replicas,
                );
            }
            Decision::Decommission { rack, member } => {
                tracing::info!(
                    datacenter = %self.name,
                    rack = %rack,
                    pod = %member.name,
                    "Decommissioning member before scale down"
                );
                match self.decommission(member).await {
                    Ok(()) => audit.log_decommission(self.name, self.namespace, &member.name),
                    Err(e) => {
                        let message = format!("decommission of {} failed: {}", member.name, e);
                        tracing::error!(datacenter = %self.name, pod = %member.name, error = %e, "Decommission failed");
                        audit.log_decommission_failed(
                            self.name,
                            self.namespace,
                            &member.name,
                            &e.to_string(),
                        );
                        status.set_error(message);
                    }
                }
            }
            Decision::ScaleDown {
                rack,
                replicas,
                member,
            } => {
                let group = self.group(state, rack)?;
                let mut sts = group.desired.clone();
                set_replicas(&mut sts, *replicas);
                self.ctx.store.replace_statefulset(self.namespace, sts).await?;
                tracing::info!(
                    datacenter = %self.name,
                    rack = %rack,
                    pod = %member.name,
                    from = group.existing_replicas(),
                    to = replicas,
                    "Scaling rack down"
                );
                audit.log_rack_scaled(
                    self.name,
                    self.namespace,
                    &rack.name,
                    group.existing_replicas(),
                    *replicas,
                );
            }
            Decision::WaitForDecommission {
                rack,
                member,
                status: node_status,
            } => {
                tracing::info!(
                    datacenter = %self.name,
                    rack = %rack,
                    pod = %member.name,
                    status = %node_status,
                    "Waiting for member to become decommissionable"
                );
            }
            Decision::Converged { trigger_cleanup } => {
                status.clear_error();
                if *trigger_cleanup {
                    let task = self
                        .ctx
                        .store
                        .create_task(self.namespace, build_cleanup_task(dc))
                        .await?;
                    let task_name = task.name_any();
                    tracing::info!(
                        datacenter = %self.name,
                        task = %task_name,
                        "Scaling converged, cleanup task created"
                    );
                    audit.log_cleanup_triggered(self.name, self.namespace, &task_name);
                } else if previous != DataCenterPhase::Running {
                    tracing::info!(datacenter = %self.name, "DataCenter converged");
                }
            }
        }
        Ok(())
    }

    fn group<'s>(&self, state: &'s ObservedState, rack: &Rack) -> OperatorResult<&'s ReplicaGroup> {
        state
            .group(rack)
            .ok_or_else(|| OperatorError::InconsistentState {
                datacenter: self.name.to_string(),
                reason: format!("rack {} missing from observed state", rack),
            })
    }

    async fn decommission(&self, member: &Member) -> OperatorResult<()> {
        let client = self.ctx.sidecars.client_for(member)?;
        self.ctx
            .config
            .decommission_retry()
            .run("decommission", || client.decommission())
            .await
    }
}
