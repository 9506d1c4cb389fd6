//! Member management endpoint (sidecar) client.
//!
//! Each Cassandra pod runs a sidecar exposing a small JSON/HTTP API used to
//! read the node status and to run administrative operations against it.

use crate::crd::NodeStatus;
use crate::error::{OperatorError, OperatorResult};
use crate::names::Member;
use dashmap::DashMap;
use reqwest::{Client as HttpClient, Response};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Type alias for async sidecar futures.
pub type SidecarFuture<'a, T> = Pin<Box<dyn Future<Output = OperatorResult<T>> + Send + 'a>>;

/// Arguments of a backup request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupArgs {
    /// Snapshot tag, the task name.
    pub snapshot_tag: String,
    /// Storage provider.
    pub provider: String,
    /// Destination bucket.
    pub bucket: String,
    /// Cluster identifier, the DataCenter resource name.
    pub cluster_id: String,
    /// Backup identifier, the pod name.
    pub backup_id: String,
}

/// Response of a backup request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupResponse {
    /// Outcome reported by the sidecar; `success` on success.
    pub status: String,
    /// Optional detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BackupResponse {
    /// Whether the sidecar reported success.
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}

/// Operations exposed by a member's management endpoint.
///
/// All calls are remote; failures surface as [`OperatorError::Sidecar`].
pub trait SidecarClient: Send + Sync {
    /// Current operational status of the node.
    fn status(&self) -> SidecarFuture<'_, NodeStatus>;

    /// Decommission the node. Irreversible.
    fn decommission(&self) -> SidecarFuture<'_, ()>;

    /// Remove data the node no longer owns.
    fn cleanup(&self, keyspace: Option<String>) -> SidecarFuture<'_, ()>;

    /// Flush memtables to disk.
    fn flush(&self, keyspace: Option<String>) -> SidecarFuture<'_, ()>;

    /// Back up the node to object storage.
    fn backup(&self, args: BackupArgs) -> SidecarFuture<'_, BackupResponse>;

    /// Run an anti-entropy repair.
    fn repair(&self, keyspace: Option<String>) -> SidecarFuture<'_, ()>;

    /// Rebuild the node from another datacenter.
    fn rebuild(&self, source_dc: String, keyspace: Option<String>) -> SidecarFuture<'_, ()>;
}

/// Hands out sidecar clients per member.
pub trait SidecarClientFactory: Send + Sync {
    /// Client for `member`.
    fn client_for(&self, member: &Member) -> OperatorResult<Arc<dyn SidecarClient>>;

    /// Drop any cached client for `member`.
    fn invalidate(&self, member: &Member);
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    node_status: NodeStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyspaceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    keyspace: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RebuildRequest {
    source_dc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    keyspace: Option<String>,
}

/// JSON over HTTP sidecar client.
#[derive(Debug, Clone)]
pub struct HttpSidecarClient {
    pod: String,
    base_url: String,
    http: HttpClient,
}

impl HttpSidecarClient {
    /// Client for the sidecar of `pod` at `base_url` (e.g. `http://host:8080`).
    pub fn new(
        pod: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> OperatorResult<Self> {
        let pod = pod.into();
        let base_url = base_url.into();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(OperatorError::InvalidConfig(format!(
                "Sidecar URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OperatorError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            pod,
            base_url,
            http,
        })
    }

    /// Client for a member, reached on its pod FQDN.
    pub fn for_member(member: &Member, timeout: Duration) -> OperatorResult<Self> {
        Self::new(
            &member.name,
            format!("http://{}:{}", member.host, member.sidecar_port),
            timeout,
        )
    }

    fn url(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn error(&self, operation: &str, cause: impl ToString) -> OperatorError {
        OperatorError::Sidecar {
            pod: self.pod.clone(),
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    async fn check(&self, operation: &str, response: Response) -> OperatorResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(self.error(operation, format!("HTTP {}: {}", status, body)))
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> OperatorResult<Response> {
        tracing::debug!(pod = %self.pod, operation = operation, "Calling sidecar");
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.error(operation, e))?;
        self.check(operation, response).await
    }
}

impl SidecarClient for HttpSidecarClient {
    fn status(&self) -> SidecarFuture<'_, NodeStatus> {
        Box::pin(async move {
            let response = self
                .http
                .get(self.url("status"))
                .send()
                .await
                .map_err(|e| self.error("status", e))?;
            let response = self.check("status", response).await?;
            let body: StatusResponse = response
                .json()
                .await
                .map_err(|e| self.error("status", e))?;
            Ok(body.node_status)
        })
    }

    fn decommission(&self) -> SidecarFuture<'_, ()> {
        Box::pin(async move {
            self.post_json("decommission", "operations/decommission", &serde_json::json!({}))
                .await?;
            Ok(())
        })
    }

    fn cleanup(&self, keyspace: Option<String>) -> SidecarFuture<'_, ()> {
        Box::pin(async move {
            self.post_json("cleanup", "operations/cleanup", &KeyspaceRequest { keyspace })
                .await?;
            Ok(())
        })
    }

    fn flush(&self, keyspace: Option<String>) -> SidecarFuture<'_, ()> {
        Box::pin(async move {
            self.post_json("flush", "operations/flush", &KeyspaceRequest { keyspace })
                .await?;
            Ok(())
        })
    }

    fn backup(&self, args: BackupArgs) -> SidecarFuture<'_, BackupResponse> {
        Box::pin(async move {
            let response = self.post_json("backup", "backups", &args).await?;
            response
                .json::<BackupResponse>()
                .await
                .map_err(|e| self.error("backup", e))
        })
    }

    fn repair(&self, keyspace: Option<String>) -> SidecarFuture<'_, ()> {
        Box::pin(async move {
            self.post_json("repair", "operations/repair", &KeyspaceRequest { keyspace })
                .await?;
            Ok(())
        })
    }

    fn rebuild(&self, source_dc: String, keyspace: Option<String>) -> SidecarFuture<'_, ()> {
        Box::pin(async move {
            self.post_json(
                "rebuild",
                "operations/rebuild",
                &RebuildRequest {
                    source_dc,
                    keyspace,
                },
            )
            .await?;
            Ok(())
        })
    }
}

/// Builds and caches [`HttpSidecarClient`]s per pod host.
#[derive(Debug)]
pub struct HttpSidecarClientFactory {
    timeout: Duration,
    clients: DashMap<String, Arc<HttpSidecarClient>>,
}

impl HttpSidecarClientFactory {
    /// Factory whose clients use a per-request `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: DashMap::new(),
        }
    }

    /// Number of cached clients.
    pub fn cached(&self) -> usize {
        self.clients.len()
    }
}

impl SidecarClientFactory for HttpSidecarClientFactory {
    fn client_for(&self, member: &Member) -> OperatorResult<Arc<dyn SidecarClient>> {
        if let Some(client) = self.clients.get(&member.host) {
            return Ok(client.value().clone());
        }
        let client = Arc::new(HttpSidecarClient::for_member(member, self.timeout)?);
        self.clients.insert(member.host.clone(), client.clone());
        Ok(client)
    }

    fn invalidate(&self, member: &Member) {
        if self.clients.remove(&member.host).is_some() {
            tracing::debug!(pod = %member.name, "Invalidated sidecar client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{DataCenterNames, Rack};

    #[test]
    fn rejects_url_without_scheme() {
        let result = HttpSidecarClient::new("p", "localhost:8080", Duration::from_secs(1));
        assert!(matches!(result, Err(OperatorError::InvalidConfig(_))));
    }

    #[test]
    fn backup_success_is_case_insensitive() {
        let ok = BackupResponse {
            status: "SUCCESS".into(),
            message: None,
        };
        let ko = BackupResponse {
            status: "error".into(),
            message: Some("bucket missing".into()),
        };
        assert!(ok.is_success());
        assert!(!ko.is_success());
    }

    #[test]
    fn factory_caches_until_invalidated() {
        let factory = HttpSidecarClientFactory::new(Duration::from_secs(1));
        let member = DataCenterNames::new("c1", "dc1", "db")
            .members(&Rack::new(0), 1)
            .remove(0);

        factory.client_for(&member).expect("client");
        factory.client_for(&member).expect("client");
        assert_eq!(factory.cached(), 1);

        factory.invalidate(&member);
        assert_eq!(factory.cached(), 0);
    }
}
