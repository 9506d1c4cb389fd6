//! Kubernetes controllers for Cassandra resources.
//!
//! - [`DataCenterController`]: drives a DataCenter's racks one safe step per pass
//! - [`TaskController`]: runs CassandraTasks member by member
//!
//! Both submit their mutating work to the shared [`WorkQueue`] under the
//! DataCenter's [`ClusterKey`](crate::names::ClusterKey), so a reconciliation
//! pass and a task step never touch the same datacenter at once.
//!
//! # Usage with kube-runtime
//!
//! ```ignore
//! use cassandra_operator::controller::{DataCenterController, datacenter_error_policy};
//!
//! Controller::new(datacenters, watcher_config)
//!     .run(|dc, ctx| async move {
//!         let controller = DataCenterController::new(ctx.clone());
//!         controller.reconcile(dc).await
//!     }, datacenter_error_policy, context)
//!     .for_each(|_| futures::future::ready(()))
//!     .await;
//! ```

mod datacenter;
pub mod decision;
pub mod snapshot;
mod steps;
mod task;
pub mod topology;

pub use datacenter::{DataCenterController, error_policy as datacenter_error_policy};
pub use decision::{Decision, StatusBuilder, decide};
pub use snapshot::{ObservedState, ReplicaGroup, classify_rack, is_statefulset_ready};
pub use steps::{Execution, TaskKind, TaskStep};
pub use task::{TaskController, error_policy as task_error_policy};

use crate::cache::{MemberRegistry, NodeStatusCache};
use crate::config::OperatorConfig;
use crate::sidecar::SidecarClientFactory;
use crate::store::OrchestrationStore;
use crate::workqueue::WorkQueue;
use std::sync::Arc;

/// Shared context for controllers.
pub struct ControllerContext {
    /// Reads and writes against the orchestration API.
    pub store: Arc<dyn OrchestrationStore>,
    /// Member management endpoint clients.
    pub sidecars: Arc<dyn SidecarClientFactory>,
    /// Node statuses written by the poller.
    pub cache: Arc<NodeStatusCache>,
    /// Members the poller probes.
    pub registry: Arc<MemberRegistry>,
    /// Per-datacenter serialization of mutating work.
    pub queue: WorkQueue,
    /// Runtime configuration.
    pub config: OperatorConfig,
}

impl ControllerContext {
    /// Create a new controller context with an empty cache and registry.
    pub fn new(
        store: Arc<dyn OrchestrationStore>,
        sidecars: Arc<dyn SidecarClientFactory>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            sidecars,
            cache: Arc::new(NodeStatusCache::new()),
            registry: Arc::new(MemberRegistry::new()),
            queue: WorkQueue::new(config.worker_pool_size),
            config,
        }
    }
}

/// Result type for reconciliation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Requeue after the specified duration.
    Requeue(std::time::Duration),
    /// Don't requeue (reconciliation complete).
    Done,
}

impl ReconcileAction {
    /// Requeue after 5 seconds (waiting on a rollout or a moving member).
    pub fn requeue_short() -> Self {
        Self::Requeue(std::time::Duration::from_secs(5))
    }

    /// Requeue after 30 seconds (default for waiting on external resources).
    pub fn requeue_medium() -> Self {
        Self::Requeue(std::time::Duration::from_secs(30))
    }

    /// Requeue after 5 minutes (default for periodic reconciliation).
    pub fn requeue_long() -> Self {
        Self::Requeue(std::time::Duration::from_secs(300))
    }
}
