//! Orchestration store: reads and writes against the Kubernetes API.
//!
//! The controllers only talk to Kubernetes through [`OrchestrationStore`], so
//! the decision engine and the task engine can run against the in-memory
//! store from [`crate::testing`].

use crate::crd::{CassandraTask, DataCenter, DataCenterStatus, TaskStatus};
use crate::error::{OperatorError, OperatorResult};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use std::future::Future;
use std::pin::Pin;

/// Type alias for async store futures.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = OperatorResult<T>> + Send + 'a>>;

/// Field manager used for every write.
pub const FIELD_MANAGER: &str = "cassandra-operator";

/// Read/create/replace access to the resources the operator drives.
///
/// `get_*` return `None` for a missing object. `create_*` fall back to a
/// replace when the object already exists.
pub trait OrchestrationStore: Send + Sync {
    /// Fetch a StatefulSet.
    fn get_statefulset<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<StatefulSet>>;

    /// Create a StatefulSet, replacing it if it already exists.
    fn create_statefulset<'a>(
        &'a self,
        namespace: &'a str,
        sts: StatefulSet,
    ) -> StoreFuture<'a, StatefulSet>;

    /// Replace a StatefulSet's spec and metadata.
    fn replace_statefulset<'a>(
        &'a self,
        namespace: &'a str,
        sts: StatefulSet,
    ) -> StoreFuture<'a, StatefulSet>;

    /// Create a Service unless it already exists.
    fn ensure_service<'a>(&'a self, namespace: &'a str, svc: Service) -> StoreFuture<'a, ()>;

    /// Fetch a DataCenter.
    fn get_datacenter<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<DataCenter>>;

    /// Replace the status of a DataCenter.
    fn replace_datacenter_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        status: DataCenterStatus,
    ) -> StoreFuture<'a, ()>;

    /// Fetch a task.
    fn get_task<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<CassandraTask>>;

    /// Create a task, replacing it if it already exists.
    fn create_task<'a>(
        &'a self,
        namespace: &'a str,
        task: CassandraTask,
    ) -> StoreFuture<'a, CassandraTask>;

    /// Delete a task. Deleting a missing task succeeds.
    fn delete_task<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ()>;

    /// Replace the status of a task.
    fn replace_task_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        status: TaskStatus,
    ) -> StoreFuture<'a, ()>;
}

/// Status value with absent optional fields set to null, so a merge patch
/// clears them instead of keeping the stored value.
fn status_value<S: serde::Serialize>(
    status: &S,
    nullable: &[&str],
) -> OperatorResult<serde_json::Value> {
    let mut value = serde_json::to_value(status)?;
    if let Some(obj) = value.as_object_mut() {
        for key in nullable {
            obj.entry(*key).or_insert(serde_json::Value::Null);
        }
    }
    Ok(value)
}

fn not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

fn conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

/// [`OrchestrationStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Store using `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> OperatorResult<Option<K>>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        match self.api::<K>(namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_sts(
        &self,
        namespace: &str,
        mut sts: StatefulSet,
    ) -> OperatorResult<StatefulSet> {
        let api: Api<StatefulSet> = self.api(namespace);
        let name = sts.name_any();
        let current = match api.get(&name).await {
            Ok(current) => current,
            Err(e) if not_found(&e) => {
                return Err(OperatorError::NotFound {
                    kind: "StatefulSet".into(),
                    name,
                    namespace: namespace.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        sts.metadata.resource_version = current.metadata.resource_version;
        sts.status = None;
        Ok(api.replace(&name, &PostParams::default(), &sts).await?)
    }

    async fn patch_status<K>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> OperatorResult<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let patch = serde_json::json!({ "status": status });
        match self
            .api::<K>(namespace)
            .patch_status(name, &Self::patch_params(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if not_found(&e) => Err(OperatorError::NotFound {
                kind: K::kind(&Default::default()).to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl OrchestrationStore for KubeStore {
    fn get_statefulset<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<StatefulSet>> {
        Box::pin(self.get_opt(namespace, name))
    }

    fn create_statefulset<'a>(
        &'a self,
        namespace: &'a str,
        sts: StatefulSet,
    ) -> StoreFuture<'a, StatefulSet> {
        Box::pin(async move {
            let api: Api<StatefulSet> = self.api(namespace);
            match api.create(&PostParams::default(), &sts).await {
                Ok(created) => {
                    tracing::info!(
                        namespace = %namespace,
                        statefulset = %created.name_any(),
                        "Created StatefulSet"
                    );
                    Ok(created)
                }
                Err(e) if conflict(&e) => {
                    tracing::debug!(statefulset = %sts.name_any(), "StatefulSet exists, replacing");
                    self.replace_sts(namespace, sts).await
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn replace_statefulset<'a>(
        &'a self,
        namespace: &'a str,
        sts: StatefulSet,
    ) -> StoreFuture<'a, StatefulSet> {
        Box::pin(self.replace_sts(namespace, sts))
    }

    fn ensure_service<'a>(&'a self, namespace: &'a str, svc: Service) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let api: Api<Service> = self.api(namespace);
            match api.create(&PostParams::default(), &svc).await {
                Ok(_) => {
                    tracing::info!(service = %svc.name_any(), "Created headless Service");
                    Ok(())
                }
                Err(e) if conflict(&e) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn get_datacenter<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<DataCenter>> {
        Box::pin(self.get_opt(namespace, name))
    }

    fn replace_datacenter_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        status: DataCenterStatus,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let value = status_value(
                &status,
                &["rackStatuses", "podStatuses", "lastErrorMessage"],
            )?;
            self.patch_status::<DataCenter>(namespace, name, value).await
        })
    }

    fn get_task<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<CassandraTask>> {
        Box::pin(self.get_opt(namespace, name))
    }

    fn create_task<'a>(
        &'a self,
        namespace: &'a str,
        task: CassandraTask,
    ) -> StoreFuture<'a, CassandraTask> {
        Box::pin(async move {
            let api: Api<CassandraTask> = self.api(namespace);
            match api.create(&PostParams::default(), &task).await {
                Ok(created) => Ok(created),
                Err(e) if conflict(&e) => {
                    let name = task.name_any();
                    let current = api.get(&name).await?;
                    let mut replacement = task;
                    replacement.metadata.resource_version = current.metadata.resource_version;
                    Ok(api.replace(&name, &PostParams::default(), &replacement).await?)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete_task<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let api: Api<CassandraTask> = self.api(namespace);
            match api.delete(name, &DeleteParams::default()).await {
                Ok(_) => Ok(()),
                Err(e) if not_found(&e) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn replace_task_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        status: TaskStatus,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let value = status_value(&status, &["lastMessage"])?;
            self.patch_status::<CassandraTask>(namespace, name, value).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DataCenterPhase, TaskPhase};

    #[test]
    fn cleared_fields_are_sent_as_null() {
        let status = DataCenterStatus {
            phase: DataCenterPhase::Running,
            ..Default::default()
        };
        let value = status_value(&status, &["lastErrorMessage", "podStatuses"]).expect("value");
        assert_eq!(value["lastErrorMessage"], serde_json::Value::Null);
        assert!(value.as_object().is_some_and(|o| o.contains_key("podStatuses")));
        assert_eq!(value["phase"], "RUNNING");
    }

    #[test]
    fn present_fields_are_kept() {
        let status = TaskStatus {
            phase: TaskPhase::Failed,
            last_message: Some("boom".into()),
            ..Default::default()
        };
        let value = status_value(&status, &["lastMessage"]).expect("value");
        assert_eq!(value["lastMessage"], "boom");
    }
}
