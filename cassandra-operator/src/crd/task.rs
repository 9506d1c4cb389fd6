//! CassandraTask Custom Resource Definition.
//!
//! A task is a multi-member administrative operation run against one
//! DataCenter. The spec carries exactly one task variant.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// CassandraTask is the Schema for the cassandratasks API.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cassandra.operator.io",
    version = "v1",
    kind = "CassandraTask",
    plural = "cassandratasks",
    shortname = "ctask",
    namespaced,
    status = "TaskStatus",
    printcolumn = r#"{"name":"DataCenter", "type":"string", "jsonPath":".spec.datacenter"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CassandraTaskSpec {
    /// Name of the target DataCenter resource in the same namespace.
    pub datacenter: String,

    /// Run `nodetool cleanup` on every member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupSpec>,

    /// Back up every member to object storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupSpec>,

    /// Add or remove a datacenter from keyspace replication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationSpec>,

    /// Run an anti-entropy repair on every member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairSpec>,

    /// Rebuild every member from another datacenter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebuild: Option<RebuildSpec>,
}

/// Cleanup task parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSpec {
    /// Restrict cleanup to one keyspace (all keyspaces when absent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
}

/// Backup task parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Storage provider (e.g., "s3", "gcp", "azure").
    pub provider: String,

    /// Destination bucket.
    pub bucket: String,
}

/// Replication change parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSpec {
    /// Whether the datacenter is being added or removed.
    pub action: ReplicationAction,

    /// Datacenter whose replication changes.
    #[serde(default)]
    pub dc_name: String,

    /// Replication factor for the datacenter.
    #[serde(default)]
    pub dc_size: i32,

    /// Keyspace to replication factor overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub replication_map: BTreeMap<String, i32>,
}

/// Replication change direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationAction {
    /// Add the datacenter to replication.
    #[default]
    Add,
    /// Remove the datacenter from replication.
    Remove,
}

/// Repair task parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepairSpec {
    /// Restrict repair to one keyspace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
}

/// Rebuild task parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RebuildSpec {
    /// Datacenter to stream data from.
    pub source_dc: String,

    /// Restrict rebuild to one keyspace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
}

/// Observed state of a CassandraTask.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Overall phase.
    #[serde(default)]
    pub phase: TaskPhase,

    /// Per-member progress, keyed by pod name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pods: BTreeMap<String, TaskPhase>,

    /// Last error or diagnostic message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,

    /// When processing started (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// When the task reached a terminal phase (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<String>,
}

/// Task phase, used both for the task and for each member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPhase {
    /// Not started.
    #[default]
    Waiting,
    /// In progress.
    Running,
    /// Finished successfully.
    Succeed,
    /// Finished with a failure.
    Failed,
}

impl TaskPhase {
    /// Whether no further processing happens in this phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Succeed | TaskPhase::Failed)
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskPhase::Waiting => "WAITING",
            TaskPhase::Running => "RUNNING",
            TaskPhase::Succeed => "SUCCEED",
            TaskPhase::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl CassandraTask {
    /// Current phase, WAITING when no status has been written yet.
    pub fn phase(&self) -> TaskPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}
