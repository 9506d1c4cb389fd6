//! Admission validation for DataCenters and tasks.
//!
//! The validators are pure; the `webhook` binary wraps them in the
//! `admission.k8s.io/v1` AdmissionReview envelope defined here.

use crate::controller::TaskKind;
use crate::crd::{CassandraTask, DataCenter};
use serde::{Deserialize, Serialize};

/// Validate a task: one variant and a target datacenter.
pub fn validate_task(task: &CassandraTask) -> Result<(), String> {
    if task.spec.datacenter.trim().is_empty() {
        return Err("spec.datacenter must name a DataCenter".to_string());
    }
    TaskKind::from_spec(&task.spec).map(|_| ())
}

/// Validate a DataCenter, and on update the fields that must not change.
pub fn validate_datacenter(dc: &DataCenter, old: Option<&DataCenter>) -> Result<(), String> {
    let spec = &dc.spec;
    if spec.cluster_name.trim().is_empty() {
        return Err("spec.clusterName must not be empty".to_string());
    }
    if spec.datacenter_name.trim().is_empty() {
        return Err("spec.datacenterName must not be empty".to_string());
    }
    if spec.replicas < 0 {
        return Err(format!("spec.replicas must be >= 0, got {}", spec.replicas));
    }
    if spec.racks < 1 {
        return Err(format!("spec.racks must be >= 1, got {}", spec.racks));
    }

    if let Some(old) = old {
        if old.spec.racks != spec.racks {
            return Err(format!(
                "spec.racks is immutable ({} -> {})",
                old.spec.racks, spec.racks
            ));
        }
        if old.spec.cluster_name != spec.cluster_name {
            return Err("spec.clusterName is immutable".to_string());
        }
        if old.spec.datacenter_name != spec.datacenter_name {
            return Err("spec.datacenterName is immutable".to_string());
        }
    }
    Ok(())
}

/// Kubernetes AdmissionReview envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview<T> {
    /// API version, `admission.k8s.io/v1`.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Kind, `AdmissionReview`.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Incoming request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest<T>>,
    /// Outgoing response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

fn default_api_version() -> String {
    "admission.k8s.io/v1".to_string()
}

fn default_kind() -> String {
    "AdmissionReview".to_string()
}

impl<T> AdmissionReview<T> {
    /// Envelope carrying only a response.
    pub fn response(response: AdmissionResponse) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            request: None,
            response: Some(response),
        }
    }
}

/// Admission request for one object.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest<T> {
    /// Request identifier, echoed in the response.
    pub uid: String,
    /// CREATE, UPDATE, DELETE or CONNECT.
    pub operation: String,
    /// Object after the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<T>,
    /// Object before the operation (UPDATE and DELETE).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_object: Option<T>,
}

/// Admission decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    /// Request identifier.
    pub uid: String,
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Rejection detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

/// Rejection detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionStatus {
    /// HTTP-like code.
    pub code: i32,
    /// Human readable reason.
    pub message: String,
}

impl AdmissionResponse {
    /// Admit the request.
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            status: None,
        }
    }

    /// Reject the request.
    pub fn deny(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            status: Some(AdmissionStatus {
                code: 422,
                message: message.into(),
            }),
        }
    }

    fn from_result(uid: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::allow(uid),
            Err(message) => Self::deny(uid, message),
        }
    }
}

/// Review a DataCenter admission request.
pub fn review_datacenter(req: &AdmissionRequest<DataCenter>) -> AdmissionResponse {
    match (&req.object, req.operation.as_str()) {
        (Some(dc), "CREATE") => AdmissionResponse::from_result(&req.uid, validate_datacenter(dc, None)),
        (Some(dc), "UPDATE") => AdmissionResponse::from_result(
            &req.uid,
            validate_datacenter(dc, req.old_object.as_ref()),
        ),
        _ => AdmissionResponse::allow(&req.uid),
    }
}

/// Review a CassandraTask admission request.
pub fn review_task(req: &AdmissionRequest<CassandraTask>) -> AdmissionResponse {
    match (&req.object, req.operation.as_str()) {
        (Some(task), "CREATE" | "UPDATE") => {
            AdmissionResponse::from_result(&req.uid, validate_task(task))
        }
        _ => AdmissionResponse::allow(&req.uid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CassandraTaskSpec, CleanupSpec, DataCenterSpec};

    fn dc(replicas: i32, racks: i32) -> DataCenter {
        DataCenter::new(
            "dc1",
            DataCenterSpec {
                replicas,
                racks,
                ..DataCenterSpec::new("c1", "dc1")
            },
        )
    }

    #[test]
    fn rejects_invalid_counts() {
        assert!(validate_datacenter(&dc(3, 3), None).is_ok());
        assert!(validate_datacenter(&dc(-1, 3), None).is_err());
        assert!(validate_datacenter(&dc(3, 0), None).is_err());
    }

    #[test]
    fn racks_cannot_change() {
        let err = validate_datacenter(&dc(3, 2), Some(&dc(3, 3))).unwrap_err();
        assert!(err.contains("immutable"));
        assert!(validate_datacenter(&dc(5, 3), Some(&dc(3, 3))).is_ok());
    }

    #[test]
    fn task_needs_target_and_one_variant() {
        let task = CassandraTask::new(
            "t1",
            CassandraTaskSpec {
                datacenter: "dc1".into(),
                cleanup: Some(CleanupSpec::default()),
                ..Default::default()
            },
        );
        assert!(validate_task(&task).is_ok());

        let untargeted = CassandraTask::new(
            "t2",
            CassandraTaskSpec {
                cleanup: Some(CleanupSpec::default()),
                ..Default::default()
            },
        );
        assert!(validate_task(&untargeted).is_err());
    }

    #[test]
    fn review_echoes_uid_and_reason() {
        let req = AdmissionRequest {
            uid: "abc".to_string(),
            operation: "UPDATE".to_string(),
            object: Some(dc(3, 2)),
            old_object: Some(dc(3, 3)),
        };
        let response = review_datacenter(&req);
        assert_eq!(response.uid, "abc");
        assert!(!response.allowed);
        assert_eq!(response.status.map(|s| s.code), Some(422));
    }

    #[test]
    fn review_parses_kubernetes_payload() {
        let review: AdmissionReview<CassandraTask> = serde_json::from_value(serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "u1",
                "operation": "CREATE",
                "object": {
                    "apiVersion": "cassandra.operator.io/v1",
                    "kind": "CassandraTask",
                    "metadata": { "name": "t1" },
                    "spec": { "datacenter": "dc1" }
                }
            }
        }))
        .unwrap();

        let response = review_task(review.request.as_ref().unwrap());
        assert!(!response.allowed);
    }
}
