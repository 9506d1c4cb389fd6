//! Builders for DataCenters, StatefulSets and tasks used in tests.

use crate::crd::{CassandraTask, CassandraTaskSpec, DataCenter, DataCenterSpec};
use crate::names::{DataCenterNames, GENERATION_ANNOTATION, Member, Rack};
use crate::resources::build_statefulset;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use std::collections::BTreeMap;

/// Namespace every fixture lives in.
pub const NAMESPACE: &str = "default";

/// DataCenter `name` of cluster `c1`, datacenter `dc1`, at generation 1.
pub fn datacenter(name: &str, replicas: i32, racks: i32) -> DataCenter {
    let spec = DataCenterSpec {
        replicas,
        racks,
        ..DataCenterSpec::new("c1", "dc1")
    };
    let mut dc = DataCenter::new(name, spec);
    dc.metadata.namespace = Some(NAMESPACE.to_string());
    dc.metadata.generation = Some(1);
    dc.metadata.uid = Some(format!("uid-{name}"));
    dc
}

/// Racks of `dc`.
pub fn racks(dc: &DataCenter) -> Vec<Rack> {
    Rack::all(dc.spec.racks.max(0) as usize)
}

/// Members of `rack` when it runs `replicas` pods.
pub fn members(dc: &DataCenter, rack: &Rack, replicas: i32) -> Vec<Member> {
    DataCenterNames::of(dc).members(rack, replicas)
}

/// Pod name of `rack`'s member at `ordinal`.
pub fn pod(dc: &DataCenter, rack_index: usize, ordinal: i32) -> String {
    DataCenterNames::of(dc).pod_name(&Rack::new(rack_index), ordinal)
}

/// StatefulSet of `rack` with `replicas` pods, fully rolled out.
pub fn ready_statefulset(dc: &DataCenter, rack: &Rack, replicas: i32) -> StatefulSet {
    let mut sts = build_statefulset(dc, rack, replicas);
    sts.status = Some(StatefulSetStatus {
        replicas,
        ready_replicas: Some(replicas),
        current_replicas: Some(replicas),
        current_revision: Some("rev-1".to_string()),
        update_revision: Some("rev-1".to_string()),
        ..Default::default()
    });
    sts
}

/// StatefulSet of `rack` that is still rolling out: only `ready` pods ready.
pub fn converging_statefulset(
    dc: &DataCenter,
    rack: &Rack,
    replicas: i32,
    ready: i32,
) -> StatefulSet {
    let mut sts = ready_statefulset(dc, rack, replicas);
    if let Some(status) = sts.status.as_mut() {
        status.ready_replicas = Some(ready);
    }
    sts
}

/// Overwrite the recorded generation of a StatefulSet.
pub fn with_generation(mut sts: StatefulSet, generation: i64) -> StatefulSet {
    sts.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(GENERATION_ANNOTATION.to_string(), generation.to_string());
    sts
}

/// Task `name` targeting DataCenter `datacenter`.
pub fn task(name: &str, datacenter: &str, spec: CassandraTaskSpec) -> CassandraTask {
    let mut task = CassandraTask::new(
        name,
        CassandraTaskSpec {
            datacenter: datacenter.to_string(),
            ..spec
        },
    );
    task.metadata.namespace = Some(NAMESPACE.to_string());
    task
}
