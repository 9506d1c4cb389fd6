//! Cassandra Kubernetes Operator
//!
//! This crate provides a Kubernetes operator that drives multi-rack Cassandra
//! datacenters toward their declared size, one safe step at a time, and runs
//! administrative tasks against their members.
//!
//! # Custom Resource Definitions
//!
//! - **DataCenter**: One StatefulSet per rack, scaled and updated by the operator
//! - **CassandraTask**: Cleanup, backup, replication, repair or rebuild across a datacenter
//!
//! # Example
//!
//! ```yaml
//! apiVersion: cassandra.operator.io/v1
//! kind: DataCenter
//! metadata:
//!   name: dc1
//! spec:
//!   clusterName: production
//!   datacenterName: dc1
//!   replicas: 6
//!   racks: 3
//!   image: cassandra:4.1
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod audit;
pub mod cache;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod names;
pub mod poller;
pub mod resources;
pub mod retry;
pub mod sidecar;
pub mod store;
pub mod testing;
pub mod workqueue;

pub use crd::{CassandraTask, CassandraTaskSpec, DataCenter, DataCenterSpec};
pub use error::{OperatorError, OperatorResult};
