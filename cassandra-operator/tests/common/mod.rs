//! Common test utilities for integration tests.

#![allow(dead_code)]

use cassandra_operator::config::OperatorConfig;
use cassandra_operator::controller::{
    ControllerContext, DataCenterController, ReconcileAction, TaskController,
};
use cassandra_operator::crd::{CassandraTask, DataCenter, DataCenterStatus, NodeStatus, TaskStatus};
use cassandra_operator::names::{DataCenterNames, MemberKey, Rack};
use cassandra_operator::resources::spec_replicas;
use cassandra_operator::testing::{MemoryStore, ScriptedSidecars, fixtures};
use k8s_openapi::api::apps::v1::StatefulSetStatus;
use std::sync::Arc;

pub use cassandra_operator::testing::fixtures::NAMESPACE;

/// Controllers wired to an in-memory store and scripted sidecars.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sidecars: ScriptedSidecars,
    pub ctx: Arc<ControllerContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OperatorConfig::immediate())
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let sidecars = ScriptedSidecars::new();
        let ctx = Arc::new(ControllerContext::new(
            store.clone(),
            Arc::new(sidecars.clone()),
            config,
        ));
        Self {
            store,
            sidecars,
            ctx,
        }
    }

    /// Seed `dc` with one ready StatefulSet per entry of `counts`, every
    /// member NORMAL.
    pub fn seed(&self, dc: &DataCenter, counts: &[i32]) {
        self.store.insert_datacenter(dc.clone());
        for (index, replicas) in counts.iter().enumerate() {
            let rack = Rack::new(index);
            self.store
                .insert_statefulset(fixtures::ready_statefulset(dc, &rack, *replicas));
            for member in fixtures::members(dc, &rack, *replicas) {
                self.ctx.cache.set(member.key(), NodeStatus::Normal);
                self.sidecars.set_status(&member.name, NodeStatus::Normal);
            }
        }
    }

    /// Observed status of a member, as the poller would record it.
    pub fn set_status(&self, pod: &str, status: NodeStatus) {
        self.ctx.cache.set(MemberKey::new(NAMESPACE, pod), status);
        self.sidecars.set_status(pod, status);
    }

    /// Finish the rollout of a rack: status matches the stored spec.
    pub fn roll_out(&self, dc: &DataCenter, rack_index: usize) {
        let naming = DataCenterNames::of(dc);
        let name = naming.statefulset_name(&Rack::new(rack_index));
        let mut sts = self
            .store
            .statefulset(NAMESPACE, &name)
            .expect("statefulset exists");
        let replicas = spec_replicas(&sts);
        sts.status = Some(StatefulSetStatus {
            replicas,
            ready_replicas: Some(replicas),
            current_replicas: Some(replicas),
            current_revision: Some("rev-1".to_string()),
            update_revision: Some("rev-1".to_string()),
            ..Default::default()
        });
        self.store.insert_statefulset(sts);
        for member in naming.members(&Rack::new(rack_index), replicas) {
            if self.ctx.cache.get(&member.key()).is_none() {
                self.set_status(&member.name, NodeStatus::Normal);
            }
        }
    }

    /// Spec replicas of a rack's stored StatefulSet.
    pub fn rack_replicas(&self, dc: &DataCenter, rack_index: usize) -> i32 {
        let name = DataCenterNames::of(dc).statefulset_name(&Rack::new(rack_index));
        self.store
            .statefulset(NAMESPACE, &name)
            .map(|sts| spec_replicas(&sts))
            .expect("statefulset exists")
    }

    pub async fn reconcile(&self, name: &str) -> ReconcileAction {
        let dc = self
            .store
            .datacenter(NAMESPACE, name)
            .expect("datacenter exists");
        DataCenterController::new(self.ctx.clone())
            .reconcile(Arc::new(dc))
            .await
            .expect("reconcile succeeds")
    }

    pub fn dc_status(&self, name: &str) -> DataCenterStatus {
        self.store
            .datacenter(NAMESPACE, name)
            .and_then(|dc| dc.status)
            .expect("datacenter status written")
    }

    pub fn add_task(&self, task: CassandraTask) {
        self.store.insert_task(task);
    }

    pub async fn advance(&self, name: &str) -> ReconcileAction {
        let task = self.store.task(NAMESPACE, name).expect("task exists");
        TaskController::new(self.ctx.clone())
            .reconcile(Arc::new(task))
            .await
            .expect("task reconcile succeeds")
    }

    pub fn task_status(&self, name: &str) -> TaskStatus {
        self.store
            .task(NAMESPACE, name)
            .and_then(|t| t.status)
            .unwrap_or_default()
    }
}
