//! Scripted sidecar clients.

use crate::crd::NodeStatus;
use crate::error::{OperatorError, OperatorResult};
use crate::names::Member;
use crate::sidecar::{
    BackupArgs, BackupResponse, SidecarClient, SidecarClientFactory, SidecarFuture,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One recorded sidecar call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarCall {
    /// Pod the call targeted.
    pub pod: String,
    /// Operation name (`status`, `decommission`, `cleanup`, ...).
    pub operation: String,
    /// Keyspace or source datacenter argument, if any.
    pub argument: Option<String>,
}

#[derive(Default)]
struct Script {
    statuses: HashMap<String, NodeStatus>,
    // (pod, operation) -> remaining failures; None fails forever
    failures: HashMap<(String, String), Option<u32>>,
    backup_statuses: HashMap<String, String>,
    calls: Vec<SidecarCall>,
    invalidated: Vec<String>,
    decommission_completes: bool,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// [`SidecarClientFactory`] whose clients answer from a script.
///
/// Status probes of pods without a scripted status fail, like an unreachable
/// sidecar. Every call is recorded.
#[derive(Clone, Default)]
pub struct ScriptedSidecars {
    shared: Arc<Shared>,
}

impl ScriptedSidecars {
    /// Script with no statuses and no failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status reported by `pod`.
    pub fn set_status(&self, pod: impl Into<String>, status: NodeStatus) {
        self.shared.script.lock().statuses.insert(pod.into(), status);
    }

    /// Make `operation` on `pod` fail `times` times, or forever when `None`.
    pub fn fail(&self, pod: impl Into<String>, operation: &str, times: Option<u32>) {
        self.shared
            .script
            .lock()
            .failures
            .insert((pod.into(), operation.to_string()), times);
    }

    /// Status string a backup of `pod` reports (default `success`).
    pub fn set_backup_status(&self, pod: impl Into<String>, status: &str) {
        self.shared
            .script
            .lock()
            .backup_statuses
            .insert(pod.into(), status.to_string());
    }

    /// Report DECOMMISSIONED for a pod as soon as its decommission succeeds.
    pub fn complete_decommission_immediately(&self) {
        self.shared.script.lock().decommission_completes = true;
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.shared.latency.lock() = latency;
    }

    /// Every recorded call, oldest first.
    pub fn calls(&self) -> Vec<SidecarCall> {
        self.shared.script.lock().calls.clone()
    }

    /// Pods that received `operation`, in call order.
    pub fn pods_called(&self, operation: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.pod)
            .collect()
    }

    /// Pods whose cached client was invalidated.
    pub fn invalidated(&self) -> Vec<String> {
        self.shared.script.lock().invalidated.clone()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }
}

impl SidecarClientFactory for ScriptedSidecars {
    fn client_for(&self, member: &Member) -> OperatorResult<Arc<dyn SidecarClient>> {
        Ok(Arc::new(ScriptedClient {
            pod: member.name.clone(),
            shared: self.shared.clone(),
        }))
    }

    fn invalidate(&self, member: &Member) {
        self.shared.script.lock().invalidated.push(member.name.clone());
    }
}

struct ScriptedClient {
    pod: String,
    shared: Arc<Shared>,
}

impl ScriptedClient {
    async fn call(&self, operation: &str, argument: Option<String>) -> OperatorResult<()> {
        let now = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.shared.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = {
            let mut script = self.shared.script.lock();
            script.calls.push(SidecarCall {
                pod: self.pod.clone(),
                operation: operation.to_string(),
                argument,
            });
            let failure_key = (self.pod.clone(), operation.to_string());
            let fails = match script.failures.get_mut(&failure_key) {
                Some(None) => true,
                Some(Some(0)) => false,
                Some(Some(remaining)) => {
                    *remaining -= 1;
                    true
                }
                None => false,
            };
            if fails {
                Err(OperatorError::Sidecar {
                    pod: self.pod.clone(),
                    operation: operation.to_string(),
                    cause: "scripted failure".into(),
                })
            } else {
                Ok(())
            }
        };

        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl SidecarClient for ScriptedClient {
    fn status(&self) -> SidecarFuture<'_, NodeStatus> {
        Box::pin(async move {
            self.call("status", None).await?;
            let status = self.shared.script.lock().statuses.get(&self.pod).copied();
            status.ok_or_else(|| OperatorError::Sidecar {
                pod: self.pod.clone(),
                operation: "status".into(),
                cause: "unreachable".into(),
            })
        })
    }

    fn decommission(&self) -> SidecarFuture<'_, ()> {
        Box::pin(async move {
            self.call("decommission", None).await?;
            let mut script = self.shared.script.lock();
            if script.decommission_completes {
                script
                    .statuses
                    .insert(self.pod.clone(), NodeStatus::Decommissioned);
            }
            Ok(())
        })
    }

    fn cleanup(&self, keyspace: Option<String>) -> SidecarFuture<'_, ()> {
        Box::pin(async move { self.call("cleanup", keyspace).await })
    }

    fn flush(&self, keyspace: Option<String>) -> SidecarFuture<'_, ()> {
        Box::pin(async move { self.call("flush", keyspace).await })
    }

    fn backup(&self, args: BackupArgs) -> SidecarFuture<'_, BackupResponse> {
        Box::pin(async move {
            self.call("backup", Some(args.snapshot_tag.clone())).await?;
            let status = self
                .shared
                .script
                .lock()
                .backup_statuses
                .get(&self.pod)
                .cloned()
                .unwrap_or_else(|| "success".to_string());
            Ok(BackupResponse {
                status,
                message: None,
            })
        })
    }

    fn repair(&self, keyspace: Option<String>) -> SidecarFuture<'_, ()> {
        Box::pin(async move { self.call("repair", keyspace).await })
    }

    fn rebuild(&self, source_dc: String, _keyspace: Option<String>) -> SidecarFuture<'_, ()> {
        Box::pin(async move { self.call("rebuild", Some(source_dc)).await })
    }
}
