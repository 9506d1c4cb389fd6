//! In-memory orchestration store.

use crate::crd::{CassandraTask, DataCenter, DataCenterStatus, TaskStatus};
use crate::error::OperatorError;
use crate::resources::spec_replicas;
use crate::store::{OrchestrationStore, StoreFuture};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use kube::core::ErrorResponse;
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// A write performed through the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// StatefulSet created with the given replica count.
    CreateStatefulSet {
        /// StatefulSet name.
        name: String,
        /// Requested replicas.
        replicas: i32,
    },
    /// StatefulSet replaced with the given replica count.
    ReplaceStatefulSet {
        /// StatefulSet name.
        name: String,
        /// Requested replicas.
        replicas: i32,
    },
    /// Service created.
    CreateService {
        /// Service name.
        name: String,
    },
    /// DataCenter status written.
    DataCenterStatus {
        /// DataCenter name.
        name: String,
        /// Written status.
        status: DataCenterStatus,
    },
    /// Task created.
    CreateTask {
        /// Task name.
        name: String,
    },
    /// Task deleted.
    DeleteTask {
        /// Task name.
        name: String,
    },
    /// Task status written.
    TaskStatus {
        /// Task name.
        name: String,
        /// Written status.
        status: TaskStatus,
    },
}

impl Mutation {
    /// Whether this mutation changes a StatefulSet.
    pub fn is_statefulset_write(&self) -> bool {
        matches!(
            self,
            Mutation::CreateStatefulSet { .. } | Mutation::ReplaceStatefulSet { .. }
        )
    }
}

#[derive(Default)]
struct State {
    statefulsets: BTreeMap<Key, StatefulSet>,
    services: BTreeMap<Key, Service>,
    datacenters: BTreeMap<Key, DataCenter>,
    tasks: BTreeMap<Key, CassandraTask>,
    mutations: Vec<Mutation>,
    next_version: u64,
    failing_status_writes: usize,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// [`OrchestrationStore`] keeping every object in memory and recording writes.
///
/// Objects seeded through the `insert_*` helpers are not recorded as
/// mutations.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a DataCenter.
    pub fn insert_datacenter(&self, dc: DataCenter) {
        let k = key(&dc.namespace().unwrap_or_default(), &dc.name_any());
        self.state.write().datacenters.insert(k, dc);
    }

    /// Seed a StatefulSet.
    pub fn insert_statefulset(&self, sts: StatefulSet) {
        let k = key(&sts.namespace().unwrap_or_default(), &sts.name_any());
        self.state.write().statefulsets.insert(k, sts);
    }

    /// Seed a task.
    pub fn insert_task(&self, task: CassandraTask) {
        let k = key(&task.namespace().unwrap_or_default(), &task.name_any());
        self.state.write().tasks.insert(k, task);
    }

    /// Fail the next `count` DataCenter status writes with a 409 conflict.
    pub fn fail_status_writes(&self, count: usize) {
        self.state.write().failing_status_writes = count;
    }

    /// Stored DataCenter.
    pub fn datacenter(&self, namespace: &str, name: &str) -> Option<DataCenter> {
        self.state.read().datacenters.get(&key(namespace, name)).cloned()
    }

    /// Stored StatefulSet.
    pub fn statefulset(&self, namespace: &str, name: &str) -> Option<StatefulSet> {
        self.state.read().statefulsets.get(&key(namespace, name)).cloned()
    }

    /// Stored task.
    pub fn task(&self, namespace: &str, name: &str) -> Option<CassandraTask> {
        self.state.read().tasks.get(&key(namespace, name)).cloned()
    }

    /// Every stored task.
    pub fn tasks(&self) -> Vec<CassandraTask> {
        self.state.read().tasks.values().cloned().collect()
    }

    /// Every recorded write, oldest first.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.state.read().mutations.clone()
    }

    /// Recorded StatefulSet writes, oldest first.
    pub fn statefulset_writes(&self) -> Vec<Mutation> {
        self.mutations()
            .into_iter()
            .filter(Mutation::is_statefulset_write)
            .collect()
    }

    /// Forget every recorded write.
    pub fn clear_mutations(&self) {
        self.state.write().mutations.clear();
    }
}

impl OrchestrationStore for MemoryStore {
    fn get_statefulset<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<StatefulSet>> {
        Box::pin(async move { Ok(self.statefulset(namespace, name)) })
    }

    fn create_statefulset<'a>(
        &'a self,
        namespace: &'a str,
        mut sts: StatefulSet,
    ) -> StoreFuture<'a, StatefulSet> {
        Box::pin(async move {
            let mut state = self.state.write();
            let name = sts.name_any();
            let k = key(namespace, &name);
            let replicas = spec_replicas(&sts);
            sts.metadata.namespace = Some(namespace.to_string());
            sts.metadata.resource_version = Some(state.bump());
            let mutation = if let Some(existing) = state.statefulsets.get(&k) {
                sts.status = existing.status.clone();
                Mutation::ReplaceStatefulSet { name, replicas }
            } else {
                Mutation::CreateStatefulSet { name, replicas }
            };
            state.statefulsets.insert(k, sts.clone());
            state.mutations.push(mutation);
            Ok(sts)
        })
    }

    fn replace_statefulset<'a>(
        &'a self,
        namespace: &'a str,
        mut sts: StatefulSet,
    ) -> StoreFuture<'a, StatefulSet> {
        Box::pin(async move {
            let mut state = self.state.write();
            let name = sts.name_any();
            let k = key(namespace, &name);
            let Some(existing) = state.statefulsets.get(&k) else {
                return Err(OperatorError::NotFound {
                    kind: "StatefulSet".into(),
                    name,
                    namespace: namespace.to_string(),
                });
            };
            sts.status = existing.status.clone();
            sts.metadata.namespace = Some(namespace.to_string());
            sts.metadata.resource_version = Some(state.bump());
            let replicas = spec_replicas(&sts);
            state.statefulsets.insert(k, sts.clone());
            state
                .mutations
                .push(Mutation::ReplaceStatefulSet { name, replicas });
            Ok(sts)
        })
    }

    fn ensure_service<'a>(&'a self, namespace: &'a str, svc: Service) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.write();
            let name = svc.name_any();
            let k = key(namespace, &name);
            if !state.services.contains_key(&k) {
                state.services.insert(k, svc);
                state.mutations.push(Mutation::CreateService { name });
            }
            Ok(())
        })
    }

    fn get_datacenter<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<DataCenter>> {
        Box::pin(async move { Ok(self.datacenter(namespace, name)) })
    }

    fn replace_datacenter_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        status: DataCenterStatus,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.write();
            if state.failing_status_writes > 0 {
                state.failing_status_writes -= 1;
                return Err(OperatorError::KubeError(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: format!("the object {} has been modified", name),
                    reason: "Conflict".to_string(),
                    code: 409,
                })));
            }
            let Some(dc) = state.datacenters.get_mut(&key(namespace, name)) else {
                return Err(OperatorError::NotFound {
                    kind: "DataCenter".into(),
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                });
            };
            dc.status = Some(status.clone());
            state.mutations.push(Mutation::DataCenterStatus {
                name: name.to_string(),
                status,
            });
            Ok(())
        })
    }

    fn get_task<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<CassandraTask>> {
        Box::pin(async move { Ok(self.task(namespace, name)) })
    }

    fn create_task<'a>(
        &'a self,
        namespace: &'a str,
        mut task: CassandraTask,
    ) -> StoreFuture<'a, CassandraTask> {
        Box::pin(async move {
            let mut state = self.state.write();
            let name = task.name_any();
            task.metadata.namespace = Some(namespace.to_string());
            task.metadata.resource_version = Some(state.bump());
            // An existing task of the same name is replaced; its status stays.
            if let Some(existing) = state.tasks.get(&key(namespace, &name)) {
                task.status = existing.status.clone();
            }
            state.tasks.insert(key(namespace, &name), task.clone());
            state.mutations.push(Mutation::CreateTask { name });
            Ok(task)
        })
    }

    fn delete_task<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.write();
            if state.tasks.remove(&key(namespace, name)).is_some() {
                state.mutations.push(Mutation::DeleteTask {
                    name: name.to_string(),
                });
            }
            Ok(())
        })
    }

    fn replace_task_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        status: TaskStatus,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.write();
            let Some(task) = state.tasks.get_mut(&key(namespace, name)) else {
                return Err(OperatorError::NotFound {
                    kind: "CassandraTask".into(),
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                });
            };
            task.status = Some(status.clone());
            state.mutations.push(Mutation::TaskStatus {
                name: name.to_string(),
                status,
            });
            Ok(())
        })
    }
}
