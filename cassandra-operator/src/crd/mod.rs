//! Custom Resource Definitions for the Cassandra operator.
//!
//! This module defines the CRDs that the operator manages:
//!
//! - [`DataCenter`]: A multi-rack Cassandra datacenter
//! - [`CassandraTask`]: An administrative task run against a datacenter

mod datacenter;
mod task;

pub use datacenter::{
    DataCenter, DataCenterPhase, DataCenterSpec, DataCenterStatus, NodeStatus, PodStatus,
    RackMode, RackStatus, ResourceRequirements, ResourceSpec, StorageSpec,
};
pub use task::{
    BackupSpec, CassandraTask, CassandraTaskSpec, CleanupSpec, RebuildSpec, RepairSpec,
    ReplicationAction, ReplicationSpec, TaskPhase, TaskStatus,
};
