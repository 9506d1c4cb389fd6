//! Task variants and their per-member steps.
//!
//! A [`CassandraTaskSpec`] carries its variant as optional fields; parsing it
//! into a [`TaskKind`] enforces that exactly one is set, after which dispatch
//! is a plain match.

use crate::cache::StatusSnapshot;
use crate::config::OperatorConfig;
use crate::crd::{
    BackupSpec, CassandraTaskSpec, CleanupSpec, NodeStatus, RebuildSpec, RepairSpec,
    ReplicationAction, ReplicationSpec,
};
use crate::error::{OperatorError, OperatorResult};
use crate::names::Member;
use crate::sidecar::{BackupArgs, SidecarClient};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Type alias for async step futures.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = OperatorResult<()>> + Send + 'a>>;

/// The one variant a task carries.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// Drop data no longer owned by each member.
    Cleanup(CleanupSpec),
    /// Snapshot each member to object storage.
    Backup(BackupSpec),
    /// Change keyspace replication for a datacenter.
    Replication(ReplicationSpec),
    /// Anti-entropy repair of each member.
    Repair(RepairSpec),
    /// Stream each member's data from another datacenter.
    Rebuild(RebuildSpec),
}

impl TaskKind {
    /// Parse the variant out of a task spec.
    ///
    /// Fails when no variant or more than one is set.
    pub fn from_spec(spec: &CassandraTaskSpec) -> Result<TaskKind, String> {
        let mut kinds = Vec::new();
        if let Some(cleanup) = &spec.cleanup {
            kinds.push(TaskKind::Cleanup(cleanup.clone()));
        }
        if let Some(backup) = &spec.backup {
            kinds.push(TaskKind::Backup(backup.clone()));
        }
        if let Some(replication) = &spec.replication {
            kinds.push(TaskKind::Replication(replication.clone()));
        }
        if let Some(repair) = &spec.repair {
            kinds.push(TaskKind::Repair(repair.clone()));
        }
        if let Some(rebuild) = &spec.rebuild {
            kinds.push(TaskKind::Rebuild(rebuild.clone()));
        }

        match kinds.len() {
            0 => Err("task sets no variant".to_string()),
            1 => Ok(kinds.remove(0)),
            _ => Err(format!(
                "task sets more than one variant: {}",
                kinds.iter().map(TaskKind::name).collect::<Vec<_>>().join(", ")
            )),
        }
    }

    /// Variant name.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Cleanup(_) => "cleanup",
            TaskKind::Backup(_) => "backup",
            TaskKind::Replication(_) => "replication",
            TaskKind::Repair(_) => "repair",
            TaskKind::Rebuild(_) => "rebuild",
        }
    }

    /// Step implementation for this variant.
    ///
    /// `task_name` and `datacenter` (the DataCenter resource name) feed the
    /// backup arguments.
    pub fn step(&self, task_name: &str, datacenter: &str, config: &OperatorConfig) -> Box<dyn TaskStep> {
        match self {
            TaskKind::Cleanup(spec) => Box::new(CleanupStep {
                keyspace: spec.keyspace.clone(),
                pacing: config.cleanup_pacing,
            }),
            TaskKind::Backup(spec) => Box::new(BackupStep {
                snapshot_tag: task_name.to_string(),
                cluster_id: datacenter.to_string(),
                provider: spec.provider.clone(),
                bucket: spec.bucket.clone(),
            }),
            TaskKind::Replication(spec) => Box::new(ReplicationStep { spec: spec.clone() }),
            TaskKind::Repair(spec) => Box::new(RepairStep {
                keyspace: spec.keyspace.clone(),
            }),
            TaskKind::Rebuild(spec) => Box::new(RebuildStep {
                source_dc: spec.source_dc.clone(),
                keyspace: spec.keyspace.clone(),
            }),
        }
    }
}

impl TryFrom<&CassandraTaskSpec> for TaskKind {
    type Error = String;

    fn try_from(spec: &CassandraTaskSpec) -> Result<Self, Self::Error> {
        TaskKind::from_spec(spec)
    }
}

/// How the members of a task are walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// One member at a time.
    Sequential {
        /// Delay between two members.
        pacing: Duration,
        /// Stop at the first failed member.
        fail_fast: bool,
    },
    /// Every member at once; failures are aggregated.
    Parallel,
}

/// Per-member behavior of one task variant.
pub trait TaskStep: Send + Sync {
    /// Variant name.
    fn kind(&self) -> &'static str;

    /// How members are walked.
    fn execution(&self) -> Execution;

    /// Reject parameters the step cannot run with. The task fails outright.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Members the progress map is initialized with.
    fn select(&self, members: &[Member], _statuses: &StatusSnapshot) -> Vec<Member> {
        members.to_vec()
    }

    /// Run the step against one member.
    fn run<'a>(&'a self, member: &'a Member, client: Arc<dyn SidecarClient>) -> StepFuture<'a>;
}

struct CleanupStep {
    keyspace: Option<String>,
    pacing: Duration,
}

impl TaskStep for CleanupStep {
    fn kind(&self) -> &'static str {
        "cleanup"
    }

    fn execution(&self) -> Execution {
        Execution::Sequential {
            pacing: self.pacing,
            fail_fast: false,
        }
    }

    fn run<'a>(&'a self, _member: &'a Member, client: Arc<dyn SidecarClient>) -> StepFuture<'a> {
        Box::pin(async move { client.cleanup(self.keyspace.clone()).await })
    }
}

struct BackupStep {
    snapshot_tag: String,
    cluster_id: String,
    provider: String,
    bucket: String,
}

impl BackupStep {
    fn args(&self, member: &Member) -> BackupArgs {
        BackupArgs {
            snapshot_tag: self.snapshot_tag.clone(),
            provider: self.provider.clone(),
            bucket: self.bucket.clone(),
            cluster_id: self.cluster_id.clone(),
            backup_id: member.name.clone(),
        }
    }
}

impl TaskStep for BackupStep {
    fn kind(&self) -> &'static str {
        "backup"
    }

    fn execution(&self) -> Execution {
        Execution::Sequential {
            pacing: Duration::ZERO,
            fail_fast: true,
        }
    }

    fn run<'a>(&'a self, member: &'a Member, client: Arc<dyn SidecarClient>) -> StepFuture<'a> {
        Box::pin(async move {
            let response = client.backup(self.args(member)).await?;
            if response.is_success() {
                Ok(())
            } else {
                Err(OperatorError::Sidecar {
                    pod: member.name.clone(),
                    operation: "backup".into(),
                    cause: match response.message {
                        Some(message) => format!("status {}: {}", response.status, message),
                        None => format!("status {}", response.status),
                    },
                })
            }
        })
    }
}

struct ReplicationStep {
    spec: ReplicationSpec,
}

impl TaskStep for ReplicationStep {
    fn kind(&self) -> &'static str {
        "replication"
    }

    fn execution(&self) -> Execution {
        Execution::Parallel
    }

    fn validate(&self) -> Result<(), String> {
        if self.spec.dc_name.trim().is_empty() {
            return Err("replication task needs a dcName".to_string());
        }
        Ok(())
    }

    fn select(&self, members: &[Member], statuses: &StatusSnapshot) -> Vec<Member> {
        match self.spec.action {
            // flushing needs a reachable node
            ReplicationAction::Add => members
                .iter()
                .filter(|m| statuses.status_of(&m.name) != NodeStatus::Unknown)
                .cloned()
                .collect(),
            ReplicationAction::Remove => Vec::new(),
        }
    }

    fn run<'a>(&'a self, _member: &'a Member, client: Arc<dyn SidecarClient>) -> StepFuture<'a> {
        Box::pin(async move { client.flush(None).await })
    }
}

struct RepairStep {
    keyspace: Option<String>,
}

impl TaskStep for RepairStep {
    fn kind(&self) -> &'static str {
        "repair"
    }

    fn execution(&self) -> Execution {
        Execution::Sequential {
            pacing: Duration::ZERO,
            fail_fast: true,
        }
    }

    fn run<'a>(&'a self, _member: &'a Member, client: Arc<dyn SidecarClient>) -> StepFuture<'a> {
        Box::pin(async move { client.repair(self.keyspace.clone()).await })
    }
}

struct RebuildStep {
    source_dc: String,
    keyspace: Option<String>,
}

impl TaskStep for RebuildStep {
    fn kind(&self) -> &'static str {
        "rebuild"
    }

    fn execution(&self) -> Execution {
        Execution::Sequential {
            pacing: Duration::ZERO,
            fail_fast: false,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.source_dc.trim().is_empty() {
            return Err("rebuild task needs a sourceDc".to_string());
        }
        Ok(())
    }

    fn run<'a>(&'a self, _member: &'a Member, client: Arc<dyn SidecarClient>) -> StepFuture<'a> {
        Box::pin(async move {
            client
                .rebuild(self.source_dc.clone(), self.keyspace.clone())
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{DataCenterNames, Rack};

    fn spec() -> CassandraTaskSpec {
        CassandraTaskSpec {
            datacenter: "dc1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn exactly_one_variant_parses() {
        let task = CassandraTaskSpec {
            cleanup: Some(CleanupSpec::default()),
            ..spec()
        };
        assert_eq!(
            TaskKind::try_from(&task),
            Ok(TaskKind::Cleanup(CleanupSpec::default()))
        );
    }

    #[test]
    fn zero_or_many_variants_are_rejected() {
        assert!(TaskKind::from_spec(&spec()).is_err());

        let both = CassandraTaskSpec {
            cleanup: Some(CleanupSpec::default()),
            repair: Some(RepairSpec::default()),
            ..spec()
        };
        let err = TaskKind::from_spec(&both).unwrap_err();
        assert!(err.contains("cleanup"));
        assert!(err.contains("repair"));
    }

    #[test]
    fn execution_policies() {
        let config = OperatorConfig::default();
        let cleanup = TaskKind::Cleanup(CleanupSpec::default()).step("t", "dc1", &config);
        assert_eq!(
            cleanup.execution(),
            Execution::Sequential {
                pacing: config.cleanup_pacing,
                fail_fast: false
            }
        );

        let backup = TaskKind::Backup(BackupSpec::default()).step("t", "dc1", &config);
        assert!(matches!(
            backup.execution(),
            Execution::Sequential { fail_fast: true, .. }
        ));

        let replication =
            TaskKind::Replication(ReplicationSpec::default()).step("t", "dc1", &config);
        assert_eq!(replication.execution(), Execution::Parallel);
    }

    #[test]
    fn replication_add_skips_unknown_members() {
        let naming = DataCenterNames::new("c1", "dc1", "db");
        let members = naming.members(&Rack::new(0), 3);
        let statuses = StatusSnapshot::from_pairs([
            (members[0].name.clone(), NodeStatus::Normal),
            (members[2].name.clone(), NodeStatus::Joining),
        ]);
        let step = TaskKind::Replication(ReplicationSpec {
            action: ReplicationAction::Add,
            dc_name: "dc2".into(),
            ..Default::default()
        })
        .step("t", "dc1", &OperatorConfig::default());

        let selected: Vec<_> = step
            .select(&members, &statuses)
            .into_iter()
            .map(|m| m.ordinal)
            .collect();
        assert_eq!(selected, vec![0, 2]);
    }

    #[test]
    fn replication_without_dc_name_is_invalid() {
        let step = TaskKind::Replication(ReplicationSpec::default()).step(
            "t",
            "dc1",
            &OperatorConfig::default(),
        );
        assert!(step.validate().is_err());
    }
}
