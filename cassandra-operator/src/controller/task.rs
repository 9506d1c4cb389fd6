//! CassandraTask controller.
//!
//! A task advances as one work queue unit under its DataCenter's cluster key,
//! so it never overlaps a reconciliation pass of the same DataCenter. Progress
//! is recorded per member in the task status and persisted after every step.

use super::steps::{Execution, TaskKind, TaskStep};
use super::{ControllerContext, ReconcileAction};
use crate::audit::audit_logger;
use crate::crd::{CassandraTask, TaskPhase, TaskStatus};
use crate::error::{OperatorError, OperatorResult};
use crate::names::{ClusterKey, DataCenterNames, Member, Rack};
use crate::resources::spec_replicas;
use futures::future::join_all;
use kube::ResourceExt;
use std::collections::HashSet;
use std::sync::Arc;

/// Controller for CassandraTask resources.
#[derive(Clone)]
pub struct TaskController {
    ctx: Arc<ControllerContext>,
}

impl TaskController {
    /// Create a new task controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Reconcile a CassandraTask resource.
    pub async fn reconcile(&self, task: Arc<CassandraTask>) -> OperatorResult<ReconcileAction> {
        let name = task.name_any();
        let namespace = task
            .namespace()
            .ok_or_else(|| OperatorError::InvalidConfig("CassandraTask must be namespaced".into()))?;

        if task.metadata.deletion_timestamp.is_some() {
            // TODO: cancel the remaining members of a running task on deletion
            tracing::info!(task = %name, namespace = %namespace, "Task deleted, nothing to cancel");
            return Ok(ReconcileAction::Done);
        }

        if task.phase().is_terminal() {
            return self.expire(&task, &namespace).await;
        }

        if let Err(reason) = TaskKind::from_spec(&task.spec) {
            return self.reject(&task, &namespace, reason).await;
        }

        let key = ClusterKey::new(&namespace, &task.spec.datacenter);
        let ctx = self.ctx.clone();
        self.ctx
            .queue
            .submit(key, format!("advance task {}", name), async move {
                TaskRun::new(&ctx, &namespace, &name).advance().await
            })
            .result()
            .await
    }

    /// Delete a terminal task once it is older than the retention window.
    async fn expire(&self, task: &CassandraTask, namespace: &str) -> OperatorResult<ReconcileAction> {
        let name = task.name_any();
        let Some(finished) = task
            .status
            .as_ref()
            .and_then(|s| s.finish_time.as_deref())
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        else {
            return Ok(ReconcileAction::Done);
        };

        let age = chrono::Utc::now()
            .signed_duration_since(finished)
            .to_std()
            .unwrap_or_default();
        let retention = self.ctx.config.task_retention;
        if age < retention {
            return Ok(ReconcileAction::Requeue(retention - age));
        }

        self.ctx.store.delete_task(namespace, &name).await?;
        tracing::info!(
            task = %name,
            namespace = %namespace,
            age_hours = age.as_secs() / 3600,
            "Deleted expired task"
        );
        Ok(ReconcileAction::Done)
    }

    /// Surface a payload error on the task status without running anything.
    async fn reject(
        &self,
        task: &CassandraTask,
        namespace: &str,
        reason: String,
    ) -> OperatorResult<ReconcileAction> {
        let name = task.name_any();
        tracing::warn!(task = %name, namespace = %namespace, reason = %reason, "Rejecting task");

        let mut status = task.status.clone().unwrap_or_default();
        if status.last_message.as_deref() != Some(reason.as_str()) {
            status.last_message = Some(reason);
            self.ctx
                .store
                .replace_task_status(namespace, &name, status)
                .await?;
        }
        Ok(ReconcileAction::Done)
    }
}

/// Error policy for the task controller.
pub fn error_policy(
    task: Arc<CassandraTask>,
    error: &OperatorError,
    _ctx: Arc<ControllerContext>,
) -> kube::runtime::controller::Action {
    tracing::error!(task = %task.name_any(), error = %error, "Task reconciliation error");
    kube::runtime::controller::Action::requeue(std::time::Duration::from_secs(30))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

struct TaskRun<'a> {
    ctx: &'a ControllerContext,
    namespace: &'a str,
    name: &'a str,
}

impl<'a> TaskRun<'a> {
    fn new(ctx: &'a ControllerContext, namespace: &'a str, name: &'a str) -> Self {
        Self {
            ctx,
            namespace,
            name,
        }
    }

    async fn persist(&self, status: &TaskStatus) -> OperatorResult<()> {
        self.ctx
            .store
            .replace_task_status(self.namespace, self.name, status.clone())
            .await
    }

    async fn advance(&self) -> OperatorResult<ReconcileAction> {
        let Some(task) = self.ctx.store.get_task(self.namespace, self.name).await? else {
            return Ok(ReconcileAction::Done);
        };
        let mut status = task.status.clone().unwrap_or_default();
        if status.phase.is_terminal() {
            return Ok(ReconcileAction::Done);
        }

        let kind = TaskKind::from_spec(&task.spec).map_err(|reason| OperatorError::InvalidTask {
            name: self.name.to_string(),
            reason,
        })?;

        let datacenter = &task.spec.datacenter;
        let Some(dc) = self.ctx.store.get_datacenter(self.namespace, datacenter).await? else {
            let message = format!("datacenter {} not found", datacenter);
            tracing::warn!(task = %self.name, datacenter = %datacenter, "Task target not found");
            if status.last_message.as_deref() != Some(message.as_str()) {
                status.last_message = Some(message);
                self.persist(&status).await?;
            }
            return Ok(ReconcileAction::requeue_medium());
        };

        let step = kind.step(self.name, datacenter, &self.ctx.config);
        if let Err(reason) = step.validate() {
            tracing::warn!(task = %self.name, reason = %reason, "Task parameters are invalid");
            status.phase = TaskPhase::Failed;
            status.last_message = Some(reason);
            status.finish_time = Some(now());
            self.persist(&status).await?;
            self.log_finished(step.kind(), &status);
            return Ok(ReconcileAction::Requeue(self.ctx.config.task_retention));
        }

        let naming = DataCenterNames::of(&dc);
        let mut members = Vec::new();
        for rack in Rack::all(dc.spec.racks.max(0) as usize) {
            let sts_name = naming.statefulset_name(&rack);
            if let Some(sts) = self.ctx.store.get_statefulset(self.namespace, &sts_name).await? {
                members.extend(naming.members(&rack, spec_replicas(&sts)));
            }
        }
        let statuses = self.ctx.cache.snapshot(&members);

        if status.pods.is_empty() {
            let selected = step.select(&members, &statuses);
            status.pods = selected
                .iter()
                .map(|m| (m.name.clone(), TaskPhase::Waiting))
                .collect();
            status.phase = TaskPhase::Running;
            status.start_time = Some(now());
            self.persist(&status).await?;
            tracing::info!(
                task = %self.name,
                kind = step.kind(),
                members = status.pods.len(),
                "Task started"
            );
            audit_logger().log_task_started(self.name, self.namespace, step.kind(), status.pods.len());
        }

        self.fail_stale_entries(&mut status, &members);

        let pending: Vec<Member> = members
            .into_iter()
            .filter(|m| status.pods.get(&m.name) == Some(&TaskPhase::Waiting))
            .collect();

        match step.execution() {
            Execution::Sequential { pacing, fail_fast } => {
                for (idx, member) in pending.iter().enumerate() {
                    if idx > 0 && !pacing.is_zero() {
                        tokio::time::sleep(pacing).await;
                    }
                    status.pods.insert(member.name.clone(), TaskPhase::Running);
                    self.persist(&status).await?;

                    let outcome = self.run_step(step.as_ref(), member).await;
                    let failed = outcome.is_err();
                    self.record(&mut status, member, outcome);
                    self.persist(&status).await?;

                    if failed && fail_fast {
                        tracing::warn!(task = %self.name, pod = %member.name, "Stopping task at first failure");
                        break;
                    }
                }
            }
            Execution::Parallel => {
                if !pending.is_empty() {
                    for member in &pending {
                        status.pods.insert(member.name.clone(), TaskPhase::Running);
                    }
                    self.persist(&status).await?;

                    let step = step.as_ref();
                    let outcomes = join_all(
                        pending
                            .iter()
                            .map(|member| async move { (member, self.run_step(step, member).await) }),
                    )
                    .await;
                    for (member, outcome) in outcomes {
                        self.record(&mut status, member, outcome);
                    }
                    self.persist(&status).await?;
                }
            }
        }

        status.phase = aggregate(&status);
        if status.phase.is_terminal() {
            status.finish_time = Some(now());
            self.persist(&status).await?;
            self.log_finished(step.kind(), &status);
            return Ok(ReconcileAction::Requeue(self.ctx.config.task_retention));
        }
        self.persist(&status).await?;
        Ok(ReconcileAction::requeue_short())
    }

    async fn run_step(&self, step: &dyn TaskStep, member: &Member) -> OperatorResult<()> {
        let client = self.ctx.sidecars.client_for(member)?;
        step.run(member, client).await
    }

    fn record(&self, status: &mut TaskStatus, member: &Member, outcome: OperatorResult<()>) {
        match outcome {
            Ok(()) => {
                tracing::info!(task = %self.name, pod = %member.name, "Task step succeeded");
                status.pods.insert(member.name.clone(), TaskPhase::Succeed);
            }
            Err(e) => {
                tracing::warn!(task = %self.name, pod = %member.name, error = %e, "Task step failed");
                status.pods.insert(member.name.clone(), TaskPhase::Failed);
                status.last_message = Some(format!("{}: {}", member.name, e));
            }
        }
    }

    /// Fail entries that can no longer make progress: members interrupted
    /// mid-step and members that no longer exist.
    fn fail_stale_entries(&self, status: &mut TaskStatus, members: &[Member]) {
        let live: HashSet<&str> = members.iter().map(|m| m.name.as_str()).collect();
        let mut last_message = None;
        for (pod, phase) in status.pods.iter_mut() {
            let reason = match phase {
                TaskPhase::Running => "step interrupted",
                TaskPhase::Waiting if !live.contains(pod.as_str()) => "member no longer exists",
                _ => continue,
            };
            tracing::warn!(task = %self.name, pod = %pod, reason = reason, "Failing task member");
            *phase = TaskPhase::Failed;
            last_message = Some(format!("{}: {}", pod, reason));
        }
        if last_message.is_some() {
            status.last_message = last_message;
        }
    }

    fn log_finished(&self, kind: &str, status: &TaskStatus) {
        tracing::info!(
            task = %self.name,
            kind = kind,
            phase = %status.phase,
            "Task finished"
        );
        audit_logger().log_task_finished(
            self.name,
            self.namespace,
            kind,
            &status.phase.to_string(),
            status.last_message.as_deref(),
        );
    }
}

/// Overall phase from the per-member phases.
fn aggregate(status: &TaskStatus) -> TaskPhase {
    let phases = status.pods.values();
    if phases.clone().any(|p| *p == TaskPhase::Failed) {
        TaskPhase::Failed
    } else if phases.clone().any(|p| !p.is_terminal()) {
        TaskPhase::Running
    } else {
        TaskPhase::Succeed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn status(pods: &[(&str, TaskPhase)]) -> TaskStatus {
        TaskStatus {
            pods: pods
                .iter()
                .map(|(name, phase)| (name.to_string(), *phase))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn any_failure_fails_the_task() {
        let s = status(&[("a", TaskPhase::Succeed), ("b", TaskPhase::Failed), ("c", TaskPhase::Waiting)]);
        assert_eq!(aggregate(&s), TaskPhase::Failed);
    }

    #[test]
    fn all_succeeded_or_empty_succeeds() {
        assert_eq!(aggregate(&status(&[("a", TaskPhase::Succeed)])), TaskPhase::Succeed);
        assert_eq!(aggregate(&status(&[])), TaskPhase::Succeed);
    }

    #[test]
    fn waiting_members_keep_running() {
        let s = status(&[("a", TaskPhase::Succeed), ("b", TaskPhase::Waiting)]);
        assert_eq!(aggregate(&s), TaskPhase::Running);
    }
}
