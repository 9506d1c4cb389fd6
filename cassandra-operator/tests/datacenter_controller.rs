//! Integration tests for the DataCenter controller.
//!
//! Each test drives reconciliation passes against an in-memory store and
//! scripted sidecars, rolling StatefulSets out by hand between passes.

mod common;

use cassandra_operator::controller::{DataCenterController, ReconcileAction};
use cassandra_operator::crd::{DataCenterPhase, NodeStatus, RackMode};
use cassandra_operator::testing::{Mutation, fixtures};
use common::{Harness, NAMESPACE};
use std::sync::Arc;

fn replaced(name: &str, replicas: i32) -> Mutation {
    Mutation::ReplaceStatefulSet {
        name: name.to_string(),
        replicas,
    }
}

#[tokio::test]
async fn test_missing_racks_are_created_with_even_spread() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 5, 3);
    h.store.insert_datacenter(dc.clone());

    let action = h.reconcile("dc1").await;
    assert_eq!(action, ReconcileAction::requeue_short());

    let created: Vec<_> = h
        .store
        .mutations()
        .into_iter()
        .filter_map(|m| match m {
            Mutation::CreateStatefulSet { name, replicas } => Some((name, replicas)),
            _ => None,
        })
        .collect();
    assert_eq!(
        created,
        vec![
            ("c1-dc1-rack1".to_string(), 2),
            ("c1-dc1-rack2".to_string(), 2),
            ("c1-dc1-rack3".to_string(), 1),
        ]
    );
    assert!(
        h.store
            .mutations()
            .iter()
            .any(|m| matches!(m, Mutation::CreateService { .. }))
    );
    // no status on the creation pass
    assert!(h.store.datacenter(NAMESPACE, "dc1").unwrap().status.is_none());
}

#[tokio::test]
async fn test_converged_datacenter_is_left_alone() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 3, 3);
    h.seed(&dc, &[1, 1, 1]);

    let action = h.reconcile("dc1").await;

    assert_eq!(action, ReconcileAction::Requeue(h.ctx.config.requeue_interval));
    assert!(h.store.statefulset_writes().is_empty());
    let status = h.dc_status("dc1");
    assert_eq!(status.phase, DataCenterPhase::Running);
    assert_eq!(status.replicas, 3);
    assert_eq!(status.ready_replicas, 3);
    assert_eq!(status.joined_replicas, 3);
    assert_eq!(status.observed_generation, Some(1));
    assert!(status.rack_statuses.iter().all(|r| r.mode == RackMode::Normal && r.ready));
}

#[tokio::test]
async fn test_scale_up_adds_one_member_per_pass() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 5, 1);
    h.seed(&dc, &[1]);

    h.reconcile("dc1").await;
    assert_eq!(h.store.statefulset_writes(), vec![replaced("c1-dc1-rack1", 2)]);
    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::ScalingUp);

    // the new pod has not rolled out yet: nothing more happens
    h.store.clear_mutations();
    h.reconcile("dc1").await;
    assert!(h.store.statefulset_writes().is_empty());
    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::ScalingUp);

    h.roll_out(&dc, 0);
    h.reconcile("dc1").await;
    assert_eq!(h.store.statefulset_writes(), vec![replaced("c1-dc1-rack1", 3)]);
}

#[tokio::test]
async fn test_scale_up_grows_the_smallest_rack() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 4, 3);
    h.seed(&dc, &[1, 1, 1]);

    h.reconcile("dc1").await;

    assert_eq!(h.store.statefulset_writes(), vec![replaced("c1-dc1-rack1", 2)]);
    assert_eq!(h.rack_replicas(&dc, 1), 1);
    assert_eq!(h.rack_replicas(&dc, 2), 1);
}

#[tokio::test]
async fn test_scale_up_convergence_creates_cleanup_task() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 4, 3);
    h.seed(&dc, &[1, 1, 1]);

    h.reconcile("dc1").await;
    h.roll_out(&dc, 0);
    h.reconcile("dc1").await;

    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::Running);
    let tasks = h.store.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].spec.datacenter, "dc1");
    assert!(tasks[0].spec.cleanup.is_some());
    assert!(tasks[0].metadata.name.as_deref().unwrap().starts_with("dc1-cleanup-"));

    // a later converged pass does not create another one
    h.reconcile("dc1").await;
    assert_eq!(h.store.tasks().len(), 1);
}

#[tokio::test]
async fn test_cleanup_task_survives_failed_status_write() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 4, 3);
    h.seed(&dc, &[1, 1, 1]);

    h.reconcile("dc1").await;
    h.roll_out(&dc, 0);

    h.store.fail_status_writes(1);
    let dc_now = h.store.datacenter(NAMESPACE, "dc1").unwrap();
    let result = DataCenterController::new(h.ctx.clone())
        .reconcile(Arc::new(dc_now))
        .await;
    assert!(result.is_err());
    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::ScalingUp);
    assert_eq!(h.store.tasks().len(), 1);

    // the retried pass lands on the same task
    h.reconcile("dc1").await;
    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::Running);
    assert_eq!(h.store.tasks().len(), 1);
}

#[tokio::test]
async fn test_single_member_scale_up_needs_no_cleanup() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 1, 1);
    h.seed(&dc, &[0]);

    h.reconcile("dc1").await;
    h.roll_out(&dc, 0);
    h.reconcile("dc1").await;

    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::Running);
    assert!(h.store.tasks().is_empty());
}

#[tokio::test]
async fn test_decommission_precedes_scale_down() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 6, 3);
    h.seed(&dc, &[3, 2, 2]);
    let leaving = fixtures::pod(&dc, 0, 2);

    // pass 1: decommission the highest ordinal of the largest rack
    h.reconcile("dc1").await;
    assert_eq!(h.sidecars.pods_called("decommission"), vec![leaving.clone()]);
    assert!(h.store.statefulset_writes().is_empty());
    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::ScalingDown);

    // pass 2: still leaving, wait
    h.set_status(&leaving, NodeStatus::Leaving);
    h.reconcile("dc1").await;
    assert!(h.store.statefulset_writes().is_empty());
    assert_eq!(h.sidecars.pods_called("decommission").len(), 1);

    // pass 3: decommissioned, shrink the rack
    h.set_status(&leaving, NodeStatus::Decommissioned);
    h.reconcile("dc1").await;
    assert_eq!(h.store.statefulset_writes(), vec![replaced("c1-dc1-rack1", 2)]);
    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::ScalingDown);

    // pass 4: converged after a scale down triggers cleanup
    h.roll_out(&dc, 0);
    h.reconcile("dc1").await;
    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::Running);
    assert_eq!(h.store.tasks().len(), 1);
}

#[tokio::test]
async fn test_scale_down_removes_exactly_one_member() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 2, 1);
    h.seed(&dc, &[3]);
    h.set_status(&fixtures::pod(&dc, 0, 2), NodeStatus::Decommissioned);

    h.reconcile("dc1").await;
    assert_eq!(h.rack_replicas(&dc, 0), 2);

    h.roll_out(&dc, 0);
    h.reconcile("dc1").await;
    assert_eq!(h.rack_replicas(&dc, 0), 2);
    assert_eq!(h.store.statefulset_writes(), vec![replaced("c1-dc1-rack1", 2)]);
}

#[tokio::test]
async fn test_failed_decommission_is_reported() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 1, 1);
    h.seed(&dc, &[2]);
    let leaving = fixtures::pod(&dc, 0, 1);
    h.sidecars.fail(&leaving, "decommission", None);

    h.reconcile("dc1").await;

    assert_eq!(
        h.sidecars.pods_called("decommission").len(),
        h.ctx.config.decommission_max_attempts as usize
    );
    let status = h.dc_status("dc1");
    assert_eq!(status.phase, DataCenterPhase::ScalingDown);
    let message = status.last_error_message.expect("error recorded");
    assert!(message.contains(&leaving));
    assert!(h.store.statefulset_writes().is_empty());
}

#[tokio::test]
async fn test_convergence_clears_previous_error() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 1, 1);
    h.seed(&dc, &[2]);
    let leaving = fixtures::pod(&dc, 0, 1);
    h.sidecars.fail(&leaving, "decommission", Some(5));

    h.reconcile("dc1").await;
    assert!(h.dc_status("dc1").last_error_message.is_some());

    h.set_status(&leaving, NodeStatus::Decommissioned);
    h.reconcile("dc1").await;
    h.roll_out(&dc, 0);
    h.reconcile("dc1").await;

    let status = h.dc_status("dc1");
    assert_eq!(status.phase, DataCenterPhase::Running);
    assert!(status.last_error_message.is_none());
}

#[tokio::test]
async fn test_no_mutation_while_a_rack_converges() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 4, 2);
    h.seed(&dc, &[1, 2]);
    let rack = cassandra_operator::names::Rack::new(1);
    h.store
        .insert_statefulset(fixtures::converging_statefulset(&dc, &rack, 2, 1));

    h.reconcile("dc1").await;

    assert!(h.store.statefulset_writes().is_empty());
    let status = h.dc_status("dc1");
    assert!(!status.rack_statuses[1].ready);
}

#[tokio::test]
async fn test_no_mutation_while_a_member_moves() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 4, 3);
    h.seed(&dc, &[1, 1, 1]);
    h.set_status(&fixtures::pod(&dc, 1, 0), NodeStatus::Joining);

    h.reconcile("dc1").await;
    assert!(h.store.statefulset_writes().is_empty());

    // unreachable members block as well
    h.set_status(&fixtures::pod(&dc, 1, 0), NodeStatus::Unknown);
    h.reconcile("dc1").await;
    assert!(h.store.statefulset_writes().is_empty());
    assert_eq!(h.dc_status("dc1").joined_replicas, 2);
}

#[tokio::test]
async fn test_spec_change_rolls_racks_one_at_a_time() {
    let h = Harness::new();
    let mut dc = fixtures::datacenter("dc1", 3, 3);
    h.seed(&dc, &[1, 1, 1]);

    dc.spec.image = "cassandra:5.0".to_string();
    dc.metadata.generation = Some(2);
    h.store.insert_datacenter(dc.clone());

    h.reconcile("dc1").await;
    assert_eq!(h.store.statefulset_writes(), vec![replaced("c1-dc1-rack1", 1)]);
    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::Updating);

    h.reconcile("dc1").await;
    h.reconcile("dc1").await;
    assert_eq!(
        h.store.statefulset_writes(),
        vec![
            replaced("c1-dc1-rack1", 1),
            replaced("c1-dc1-rack2", 1),
            replaced("c1-dc1-rack3", 1),
        ]
    );

    h.reconcile("dc1").await;
    assert_eq!(h.store.statefulset_writes().len(), 3);
    assert_eq!(h.dc_status("dc1").phase, DataCenterPhase::Running);
    // a finished rolling update is not a scaling event
    assert!(h.store.tasks().is_empty());
}

#[tokio::test]
async fn test_behind_rack_rolls_before_scaling() {
    let h = Harness::new();
    let mut dc = fixtures::datacenter("dc1", 4, 3);
    h.seed(&dc, &[1, 1, 1]);
    dc.metadata.generation = Some(2);
    h.store.insert_datacenter(dc.clone());

    h.reconcile("dc1").await;

    // rack1 is planned to grow; rack2 is behind and rolls first
    assert_eq!(h.store.statefulset_writes(), vec![replaced("c1-dc1-rack2", 1)]);
}

#[tokio::test]
async fn test_repeated_passes_are_idempotent() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 4, 2);
    h.seed(&dc, &[2, 1]);

    h.reconcile("dc1").await;
    let first = h.store.statefulset_writes();
    assert_eq!(first, vec![replaced("c1-dc1-rack2", 2)]);

    for _ in 0..3 {
        h.reconcile("dc1").await;
    }
    assert_eq!(h.store.statefulset_writes(), first);
}

#[tokio::test]
async fn test_members_are_registered_for_polling() {
    let h = Harness::new();
    let dc = fixtures::datacenter("dc1", 3, 3);
    h.seed(&dc, &[1, 1, 1]);

    h.reconcile("dc1").await;

    let key = cassandra_operator::names::ClusterKey::of(&dc);
    let members: Vec<String> = h
        .ctx
        .registry
        .members_of(&key)
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(
        members,
        vec!["c1-dc1-rack1-0", "c1-dc1-rack2-0", "c1-dc1-rack3-0"]
    );
}

#[tokio::test]
async fn test_deleted_datacenter_is_unregistered() {
    let h = Harness::new();
    let mut dc = fixtures::datacenter("dc1", 3, 3);
    h.seed(&dc, &[1, 1, 1]);
    h.reconcile("dc1").await;

    dc.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
        chrono::Utc::now(),
    ));
    h.store.insert_datacenter(dc.clone());
    h.store.clear_mutations();

    assert_eq!(h.reconcile("dc1").await, ReconcileAction::Done);
    assert!(h.ctx.registry.members_of(&cassandra_operator::names::ClusterKey::of(&dc)).is_empty());
    assert!(h.store.mutations().is_empty());
}
