//! Audit logging for topology changes and administrative tasks.
//!
//! Irreversible or availability-affecting actions are emitted as structured
//! JSON under the `audit` tracing target:
//! - member decommission (requested, failed)
//! - rack scaled up or down, rack rolled to a new spec
//! - cleanup task triggered after a scaling convergence
//! - task started and finished

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A member was asked to leave the ring.
    DecommissionRequested,
    /// A decommission request failed after every retry.
    DecommissionFailed,
    /// A rack was grown by one member.
    RackScaledUp,
    /// A rack was shrunk by one member.
    RackScaledDown,
    /// A rack was rolled to the current spec.
    RackUpdated,
    /// A cleanup task was created after a scaling convergence.
    CleanupTriggered,
    /// A task started processing its members.
    TaskStarted,
    /// A task reached a terminal phase.
    TaskFinished,
    /// The observed topology was found inconsistent.
    InconsistentTopology,
}

/// Audit event severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    /// Routine operation.
    Info,
    /// Operation failed or needs attention.
    Warning,
    /// Operator intervention required.
    Critical,
}

/// Audit event metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Timestamp in RFC3339 format.
    pub timestamp: String,
    /// Event type.
    pub event_type: AuditEventType,
    /// Severity level.
    pub severity: AuditSeverity,
    /// Identity the operator acts as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Resource acted upon (DataCenter or task name).
    pub resource: String,
    /// Resource namespace.
    pub namespace: String,
    /// Target of the operation (rack, pod).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Outcome of the operation.
    pub outcome: String,
    /// Additional context or error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured metadata for the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(
        event_type: AuditEventType,
        severity: AuditSeverity,
        resource: impl Into<String>,
        namespace: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            severity,
            subject: None,
            resource: resource.into(),
            namespace: namespace.into(),
            target: None,
            outcome: outcome.into(),
            message: None,
            metadata: None,
        }
    }

    /// Set the subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the target.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set structured metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Log the audit event as JSON.
    pub fn log(&self) {
        let json = match serde_json::to_string(self) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit event");
                return;
            }
        };

        match self.severity {
            AuditSeverity::Info => {
                info!(
                    target: "audit",
                    event_type = ?self.event_type,
                    resource = %self.resource,
                    outcome = %self.outcome,
                    "{}",
                    json
                );
            }
            AuditSeverity::Warning => {
                warn!(
                    target: "audit",
                    event_type = ?self.event_type,
                    resource = %self.resource,
                    outcome = %self.outcome,
                    "{}",
                    json
                );
            }
            AuditSeverity::Critical => {
                tracing::error!(
                    target: "audit",
                    event_type = ?self.event_type,
                    resource = %self.resource,
                    outcome = %self.outcome,
                    "{}",
                    json
                );
            }
        }
    }
}

/// Audit logger for the Cassandra operator.
pub struct AuditLogger {
    service_account: String,
}

impl AuditLogger {
    /// Create a new audit logger acting as `service_account`.
    pub fn new(service_account: impl Into<String>) -> Self {
        Self {
            service_account: service_account.into(),
        }
    }

    fn event(
        &self,
        event_type: AuditEventType,
        severity: AuditSeverity,
        resource: &str,
        namespace: &str,
        outcome: &str,
    ) -> AuditEvent {
        AuditEvent::new(event_type, severity, resource, namespace, outcome)
            .with_subject(self.service_account.clone())
    }

    /// Log a decommission request.
    pub fn log_decommission(&self, datacenter: &str, namespace: &str, pod: &str) {
        self.event(
            AuditEventType::DecommissionRequested,
            AuditSeverity::Info,
            datacenter,
            namespace,
            "success",
        )
        .with_target(pod)
        .with_message(format!("Requested decommission of {}", pod))
        .log();
    }

    /// Log a decommission that failed after every retry.
    pub fn log_decommission_failed(&self, datacenter: &str, namespace: &str, pod: &str, error: &str) {
        self.event(
            AuditEventType::DecommissionFailed,
            AuditSeverity::Warning,
            datacenter,
            namespace,
            "error",
        )
        .with_target(pod)
        .with_message(error)
        .log();
    }

    /// Log a rack replica change.
    pub fn log_rack_scaled(
        &self,
        datacenter: &str,
        namespace: &str,
        rack: &str,
        from: i32,
        to: i32,
    ) {
        let event_type = if to > from {
            AuditEventType::RackScaledUp
        } else {
            AuditEventType::RackScaledDown
        };
        self.event(event_type, AuditSeverity::Info, datacenter, namespace, "success")
            .with_target(rack)
            .with_metadata(serde_json::json!({ "from": from, "to": to }))
            .log();
    }

    /// Log a rack rolled to a new spec generation.
    pub fn log_rack_updated(
        &self,
        datacenter: &str,
        namespace: &str,
        rack: &str,
        generation: Option<i64>,
    ) {
        self.event(
            AuditEventType::RackUpdated,
            AuditSeverity::Info,
            datacenter,
            namespace,
            "success",
        )
        .with_target(rack)
        .with_metadata(serde_json::json!({ "generation": generation }))
        .log();
    }

    /// Log an inconsistent topology.
    pub fn log_inconsistent(&self, datacenter: &str, namespace: &str, reason: &str) {
        self.event(
            AuditEventType::InconsistentTopology,
            AuditSeverity::Critical,
            datacenter,
            namespace,
            "rejected",
        )
        .with_message(reason)
        .log();
    }

    /// Log a cleanup task created after a convergence.
    pub fn log_cleanup_triggered(&self, datacenter: &str, namespace: &str, task: &str) {
        self.event(
            AuditEventType::CleanupTriggered,
            AuditSeverity::Info,
            datacenter,
            namespace,
            "success",
        )
        .with_target(task)
        .log();
    }

    /// Log a task starting on its members.
    pub fn log_task_started(&self, task: &str, namespace: &str, kind: &str, members: usize) {
        self.event(
            AuditEventType::TaskStarted,
            AuditSeverity::Info,
            task,
            namespace,
            "started",
        )
        .with_metadata(serde_json::json!({ "kind": kind, "members": members }))
        .log();
    }

    /// Log a task reaching a terminal phase.
    pub fn log_task_finished(
        &self,
        task: &str,
        namespace: &str,
        kind: &str,
        phase: &str,
        message: Option<&str>,
    ) {
        let severity = if phase == "SUCCEED" {
            AuditSeverity::Info
        } else {
            AuditSeverity::Warning
        };
        let mut event = self
            .event(AuditEventType::TaskFinished, severity, task, namespace, phase)
            .with_metadata(serde_json::json!({ "kind": kind }));
        if let Some(message) = message {
            event = event.with_message(message);
        }
        event.log();
    }
}

static AUDIT_LOGGER: once_cell::sync::Lazy<AuditLogger> = once_cell::sync::Lazy::new(|| {
    AuditLogger::new("system:serviceaccount:cassandra-system:cassandra-operator")
});

/// Get the process-wide audit logger.
pub fn audit_logger() -> &'static AuditLogger {
    &AUDIT_LOGGER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_builder_sets_fields() {
        let event = AuditEvent::new(
            AuditEventType::DecommissionRequested,
            AuditSeverity::Info,
            "dc1",
            "db",
            "success",
        )
        .with_target("c1-dc1-rack1-2")
        .with_message("Requested decommission");

        assert_eq!(event.resource, "dc1");
        assert_eq!(event.target.as_deref(), Some("c1-dc1-rack1-2"));
        assert_eq!(event.subject, None);
    }

    #[test]
    fn event_serializes_snake_case_type() {
        let event = AuditEvent::new(
            AuditEventType::RackScaledDown,
            AuditSeverity::Warning,
            "dc1",
            "db",
            "success",
        )
        .with_metadata(serde_json::json!({ "from": 3, "to": 2 }));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("rack_scaled_down"));
        assert!(json.contains("\"warning\""));
        assert!(!json.contains("\"target\""));
    }
}
