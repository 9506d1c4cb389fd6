//! DataCenter Custom Resource Definition.
//!
//! Declares the desired topology of one Cassandra datacenter: how many nodes it
//! runs and how they are spread over racks. Each rack maps to one StatefulSet.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DataCenter is the Schema for the datacenters API.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cassandra.operator.io",
    version = "v1",
    kind = "DataCenter",
    plural = "datacenters",
    shortname = "cdc",
    namespaced,
    status = "DataCenterStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Joined", "type":"integer", "jsonPath":".status.joinedReplicas"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DataCenterSpec {
    /// Cassandra cluster name.
    pub cluster_name: String,

    /// Cassandra datacenter name.
    pub datacenter_name: String,

    /// Total number of nodes in the datacenter.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Number of racks the nodes are spread over.
    #[serde(default = "default_racks")]
    pub racks: i32,

    /// Cassandra node image.
    #[serde(default = "default_image")]
    pub image: String,

    /// Sidecar (management endpoint) image.
    #[serde(default = "default_sidecar_image")]
    pub sidecar_image: String,

    /// Image pull policy.
    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,

    /// CQL native transport port.
    #[serde(default = "default_native_port")]
    pub native_port: i32,

    /// Inter-node storage port.
    #[serde(default = "default_storage_port")]
    pub storage_port: i32,

    /// JMX port.
    #[serde(default = "default_jmx_port")]
    pub jmx_port: i32,

    /// Port of the sidecar management endpoint.
    #[serde(default = "default_sidecar_port")]
    pub sidecar_port: i32,

    /// Persistent storage for each node.
    #[serde(default)]
    pub storage: StorageSpec,

    /// Resource requirements for the Cassandra container.
    #[serde(default)]
    pub resources: ResourceRequirements,
}

impl DataCenterSpec {
    /// Spec for one datacenter with every optional field at its default.
    pub fn new(cluster_name: impl Into<String>, datacenter_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            datacenter_name: datacenter_name.into(),
            replicas: default_replicas(),
            racks: default_racks(),
            image: default_image(),
            sidecar_image: default_sidecar_image(),
            image_pull_policy: default_image_pull_policy(),
            native_port: default_native_port(),
            storage_port: default_storage_port(),
            jmx_port: default_jmx_port(),
            sidecar_port: default_sidecar_port(),
            storage: StorageSpec::default(),
            resources: ResourceRequirements::default(),
        }
    }
}

fn default_replicas() -> i32 {
    1
}

fn default_racks() -> i32 {
    1
}

fn default_image() -> String {
    "cassandra:4.1".to_string()
}

fn default_sidecar_image() -> String {
    "ghcr.io/cassandra-operator/sidecar:latest".to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_native_port() -> i32 {
    9042
}

fn default_storage_port() -> i32 {
    7000
}

fn default_jmx_port() -> i32 {
    7199
}

fn default_sidecar_port() -> i32 {
    8080
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Storage class name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    /// Storage size (e.g., "50Gi").
    #[serde(default = "default_storage_size")]
    pub size: String,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            class: None,
            size: default_storage_size(),
        }
    }
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

/// Resource requirements for the Cassandra container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Resource requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceSpec>,

    /// Resource limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSpec>,
}

/// CPU and memory quantities.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// CPU quantity (e.g., "2").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory quantity (e.g., "8Gi").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Observed state of a DataCenter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataCenterStatus {
    /// Current phase.
    #[serde(default)]
    pub phase: DataCenterPhase,

    /// Sum of the replicas reported by every rack StatefulSet.
    #[serde(default)]
    pub replicas: i32,

    /// Sum of the ready replicas reported by every rack StatefulSet.
    #[serde(default)]
    pub ready_replicas: i32,

    /// Number of members whose node status is NORMAL.
    #[serde(default)]
    pub joined_replicas: i32,

    /// Per-rack status, ordered by rack.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rack_statuses: Vec<RackStatus>,

    /// Per-member status, ordered by rack then ordinal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_statuses: Vec<PodStatus>,

    /// Last error met while driving the topology.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,

    /// Generation of the spec this status was computed from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// DataCenter phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataCenterPhase {
    /// All racks are up to date and sized as requested.
    #[default]
    Running,
    /// A rack is being grown by one member.
    ScalingUp,
    /// A rack is being shrunk by one member.
    ScalingDown,
    /// A rack is rolling out a new spec.
    Updating,
    /// The observed topology is inconsistent; operator intervention required.
    Error,
}

impl std::fmt::Display for DataCenterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataCenterPhase::Running => "RUNNING",
            DataCenterPhase::ScalingUp => "SCALING_UP",
            DataCenterPhase::ScalingDown => "SCALING_DOWN",
            DataCenterPhase::Updating => "UPDATING",
            DataCenterPhase::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Status of one rack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RackStatus {
    /// Rack name.
    pub name: String,
    /// Whether the rack StatefulSet has fully converged.
    pub ready: bool,
    /// Mode the rack was classified in.
    pub mode: RackMode,
    /// Replica count of the existing StatefulSet.
    pub replicas: i32,
}

/// Status of one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    /// Pod name.
    pub pod_name: String,
    /// Last known operational status.
    pub mode: NodeStatus,
}

/// What a rack needs to converge, recomputed every pass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RackMode {
    /// Replica counts match and the StatefulSet carries the current generation.
    Normal,
    /// Replica counts match but the StatefulSet was built from an older generation.
    Behind,
    /// More replicas are desired than exist.
    ScaleUp,
    /// Fewer replicas are desired than exist.
    ScaleDown,
    /// Not classified (status reporting only).
    Unknown,
}

impl std::fmt::Display for RackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RackMode::Normal => "NORMAL",
            RackMode::Behind => "BEHIND",
            RackMode::ScaleUp => "SCALE_UP",
            RackMode::ScaleDown => "SCALE_DOWN",
            RackMode::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Operational status of a Cassandra node as reported by its sidecar.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Process is starting.
    Starting,
    /// Bootstrapping into the ring.
    Joining,
    /// Serving its token ranges.
    Normal,
    /// Streaming its data away.
    Leaving,
    /// Left the ring; safe to remove.
    Decommissioned,
    /// Draining before shutdown.
    Draining,
    /// Moving tokens.
    Moving,
    /// Unreachable or never observed.
    Unknown,
}

impl NodeStatus {
    /// Every status, in declaration order.
    pub const ALL: [NodeStatus; 8] = [
        NodeStatus::Starting,
        NodeStatus::Joining,
        NodeStatus::Normal,
        NodeStatus::Leaving,
        NodeStatus::Decommissioned,
        NodeStatus::Draining,
        NodeStatus::Moving,
        NodeStatus::Unknown,
    ];

    /// Whether a member in this status blocks topology changes.
    ///
    /// Only NORMAL and DECOMMISSIONED are stable.
    pub fn is_moving(self) -> bool {
        !matches!(self, NodeStatus::Normal | NodeStatus::Decommissioned)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Starting => "STARTING",
            NodeStatus::Joining => "JOINING",
            NodeStatus::Normal => "NORMAL",
            NodeStatus::Leaving => "LEAVING",
            NodeStatus::Decommissioned => "DECOMMISSIONED",
            NodeStatus::Draining => "DRAINING",
            NodeStatus::Moving => "MOVING",
            NodeStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_apply() {
        let spec: DataCenterSpec = serde_json::from_value(serde_json::json!({
            "clusterName": "c1",
            "datacenterName": "dc1"
        }))
        .expect("minimal spec should deserialize");

        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.racks, 1);
        assert_eq!(spec.sidecar_port, 8080);
        assert_eq!(spec.storage.size, "10Gi");
    }

    #[test]
    fn only_normal_and_decommissioned_are_stable() {
        let stable: Vec<_> = NodeStatus::ALL
            .iter()
            .filter(|s| !s.is_moving())
            .collect();
        assert_eq!(stable, vec![&NodeStatus::Normal, &NodeStatus::Decommissioned]);
    }

    #[test]
    fn status_serializes_phase_in_screaming_case() {
        let status = DataCenterStatus {
            phase: DataCenterPhase::ScalingDown,
            ..Default::default()
        };
        let json = serde_json::to_string(&status).expect("status should serialize");
        assert!(json.contains("\"SCALING_DOWN\""));
    }
}
