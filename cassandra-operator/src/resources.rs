//! Builders for the Kubernetes objects owned by a DataCenter.
//!
//! Node manifests are intentionally minimal: one Cassandra container, one
//! sidecar container and a data volume claim per pod.

use crate::crd::{CassandraTask, CassandraTaskSpec, CleanupSpec, DataCenter};
use crate::names::{
    CLUSTER_LABEL, DATACENTER_LABEL, DataCenterNames, GENERATION_ANNOTATION, RACK_LABEL, Rack,
    cleanup_task_name,
};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

fn common_labels(naming: &DataCenterNames) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "cassandra".to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "cassandra-operator".to_string(),
    );
    labels.insert(CLUSTER_LABEL.to_string(), naming.cluster().to_string());
    labels.insert(DATACENTER_LABEL.to_string(), naming.datacenter().to_string());
    labels
}

fn rack_labels(naming: &DataCenterNames, rack: &Rack) -> BTreeMap<String, String> {
    let mut labels = common_labels(naming);
    labels.insert(RACK_LABEL.to_string(), rack.name.clone());
    labels
}

fn owned_metadata(dc: &DataCenter, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: dc.meta().namespace.clone(),
        labels: Some(labels),
        owner_references: dc.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

fn quantities(spec: Option<&crate::crd::ResourceSpec>) -> Option<BTreeMap<String, Quantity>> {
    let spec = spec?;
    let mut map = BTreeMap::new();
    if let Some(cpu) = &spec.cpu {
        map.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &spec.memory {
        map.insert("memory".to_string(), Quantity(memory.clone()));
    }
    (!map.is_empty()).then_some(map)
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn value_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn port(name: &str, number: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: number,
        ..Default::default()
    }
}

/// Build the StatefulSet of one rack running `replicas` pods.
///
/// The DataCenter generation is recorded in [`GENERATION_ANNOTATION`] so the
/// rack can later be classified as up to date or behind.
pub fn build_statefulset(dc: &DataCenter, rack: &Rack, replicas: i32) -> StatefulSet {
    let naming = DataCenterNames::of(dc);
    let spec = &dc.spec;
    let labels = rack_labels(&naming, rack);

    let mut metadata = owned_metadata(dc, naming.statefulset_name(rack), labels.clone());
    if let Some(generation) = dc.meta().generation {
        metadata.annotations = Some(BTreeMap::from([(
            GENERATION_ANNOTATION.to_string(),
            generation.to_string(),
        )]));
    }

    let cassandra = Container {
        name: "cassandra".to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some(spec.image_pull_policy.clone()),
        ports: Some(vec![
            port("cql", spec.native_port),
            port("internode", spec.storage_port),
            port("jmx", spec.jmx_port),
        ]),
        env: Some(vec![
            value_env("CASSANDRA_CLUSTER_NAME", naming.cluster()),
            value_env("CASSANDRA_DC", naming.datacenter()),
            value_env("CASSANDRA_RACK", rack.name.clone()),
            value_env("CASSANDRA_ENDPOINT_SNITCH", "GossipingPropertyFileSnitch"),
            value_env(
                "CASSANDRA_SEEDS",
                naming.pod_fqdn(&naming.pod_name(&Rack::new(0), 0)),
            ),
            field_env("POD_NAME", "metadata.name"),
            field_env("POD_NAMESPACE", "metadata.namespace"),
            field_env("POD_IP", "status.podIP"),
        ]),
        resources: Some(ResourceRequirements {
            requests: quantities(spec.resources.requests.as_ref()),
            limits: quantities(spec.resources.limits.as_ref()),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: "data".to_string(),
            mount_path: "/var/lib/cassandra".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let sidecar = Container {
        name: "sidecar".to_string(),
        image: Some(spec.sidecar_image.clone()),
        image_pull_policy: Some(spec.image_pull_policy.clone()),
        ports: Some(vec![port("sidecar", spec.sidecar_port)]),
        env: Some(vec![
            field_env("POD_NAME", "metadata.name"),
            field_env("POD_NAMESPACE", "metadata.namespace"),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "data".to_string(),
            mount_path: "/var/lib/cassandra".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    StatefulSet {
        metadata,
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            service_name: naming.prefix(),
            pod_management_policy: Some("OrderedReady".to_string()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![cassandra, sidecar],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("data".to_string()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    storage_class_name: spec.storage.class.clone(),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(spec.storage.size.clone()),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the headless Service giving every pod a stable DNS name.
pub fn build_headless_service(dc: &DataCenter) -> Service {
    let naming = DataCenterNames::of(dc);
    let spec = &dc.spec;
    let labels = common_labels(&naming);

    Service {
        metadata: owned_metadata(dc, naming.prefix(), labels.clone()),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(labels),
            ports: Some(vec![
                ServicePort {
                    name: Some("cql".to_string()),
                    port: spec.native_port,
                    ..Default::default()
                },
                ServicePort {
                    name: Some("internode".to_string()),
                    port: spec.storage_port,
                    ..Default::default()
                },
                ServicePort {
                    name: Some("sidecar".to_string()),
                    port: spec.sidecar_port,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build a cleanup task for every member of `dc`, owned by the DataCenter.
pub fn build_cleanup_task(dc: &DataCenter) -> CassandraTask {
    let naming = DataCenterNames::of(dc);
    let dc_name = dc.name_any();
    let name = cleanup_task_name(
        &dc_name,
        dc.meta().uid.as_deref().unwrap_or_default(),
        dc.meta().generation.unwrap_or_default(),
        dc.spec.replicas,
    );
    CassandraTask {
        metadata: owned_metadata(dc, name, common_labels(&naming)),
        spec: CassandraTaskSpec {
            datacenter: dc_name,
            cleanup: Some(CleanupSpec::default()),
            ..Default::default()
        },
        status: None,
    }
}

/// Replica count a StatefulSet asks for.
pub fn spec_replicas(sts: &StatefulSet) -> i32 {
    sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
}

/// Set the replica count of a StatefulSet.
pub fn set_replicas(sts: &mut StatefulSet, replicas: i32) {
    if let Some(spec) = sts.spec.as_mut() {
        spec.replicas = Some(replicas);
    }
}

/// DataCenter generation a StatefulSet was built from, when recorded.
pub fn recorded_generation(sts: &StatefulSet) -> Option<i64> {
    sts.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(GENERATION_ANNOTATION))
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DataCenterSpec;

    fn datacenter() -> DataCenter {
        let spec: DataCenterSpec = serde_json::from_value(serde_json::json!({
            "clusterName": "c1",
            "datacenterName": "dc1",
            "replicas": 3,
            "racks": 3
        }))
        .expect("spec");
        let mut dc = DataCenter::new("dc1", spec);
        dc.metadata.namespace = Some("db".into());
        dc.metadata.generation = Some(4);
        dc.metadata.uid = Some("uid-1".into());
        dc
    }

    #[test]
    fn statefulset_records_generation_and_rack() {
        let sts = build_statefulset(&datacenter(), &Rack::new(1), 2);

        assert_eq!(sts.metadata.name.as_deref(), Some("c1-dc1-rack2"));
        assert_eq!(spec_replicas(&sts), 2);
        assert_eq!(sts.spec.as_ref().map(|s| s.service_name.as_str()), Some("c1-dc1"));
        assert_eq!(recorded_generation(&sts), Some(4));
        let labels = sts.metadata.labels.as_ref().expect("labels");
        assert_eq!(labels.get(RACK_LABEL).map(String::as_str), Some("rack2"));
        assert_eq!(
            sts.metadata.owner_references.as_ref().map(|o| o.len()),
            Some(1)
        );
    }

    #[test]
    fn unparsable_generation_is_absent() {
        let mut sts = build_statefulset(&datacenter(), &Rack::new(0), 1);
        sts.metadata.annotations = Some(BTreeMap::from([(
            GENERATION_ANNOTATION.to_string(),
            "abc".to_string(),
        )]));
        assert_eq!(recorded_generation(&sts), None);
    }

    #[test]
    fn cleanup_task_targets_datacenter() {
        let task = build_cleanup_task(&datacenter());
        assert_eq!(task.spec.datacenter, "dc1");
        assert!(task.spec.cleanup.is_some());
        assert!(task.name_any().starts_with("dc1-cleanup-"));
        assert_eq!(task.metadata.namespace.as_deref(), Some("db"));
    }

    #[test]
    fn headless_service_is_named_after_datacenter() {
        let svc = build_headless_service(&datacenter());
        assert_eq!(svc.metadata.name.as_deref(), Some("c1-dc1"));
        assert_eq!(
            svc.spec.and_then(|s| s.cluster_ip).as_deref(),
            Some("None")
        );
    }
}
