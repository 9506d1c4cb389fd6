//! Operator configuration.

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Runtime configuration shared by the controllers, the poller and the work queue.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Namespace to watch. `None` watches all namespaces.
    pub namespace: Option<String>,
    /// Interval between two node status probes.
    pub node_status_poll_interval: Duration,
    /// Timeout applied to every sidecar request.
    pub sidecar_timeout: Duration,
    /// Attempts made for a decommission request before giving up.
    pub decommission_max_attempts: u32,
    /// Fixed delay between decommission attempts.
    pub decommission_retry_delay: Duration,
    /// Delay between two members in a cleanup task.
    pub cleanup_pacing: Duration,
    /// Maximum number of work queue units running at once.
    pub worker_pool_size: usize,
    /// How long terminal tasks are kept before deletion.
    pub task_retention: Duration,
    /// Periodic requeue interval for DataCenters.
    pub requeue_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            node_status_poll_interval: Duration::from_secs(10),
            sidecar_timeout: Duration::from_secs(30),
            decommission_max_attempts: 5,
            decommission_retry_delay: Duration::from_secs(2),
            cleanup_pacing: Duration::from_secs(10),
            worker_pool_size: 16,
            task_retention: Duration::from_secs(192 * 3600),
            requeue_interval: Duration::from_secs(30),
        }
    }
}

impl OperatorConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables, falling back to the default
    /// when a variable is unset or does not parse:
    /// - `OPERATOR_NAMESPACE`: Namespace to watch (empty watches all)
    /// - `OPERATOR_NODE_STATUS_POLL_SECS`: Node status poll period
    /// - `OPERATOR_SIDECAR_TIMEOUT_SECS`: Sidecar request timeout
    /// - `OPERATOR_DECOMMISSION_MAX_ATTEMPTS`: Decommission attempts
    /// - `OPERATOR_DECOMMISSION_RETRY_DELAY_SECS`: Delay between decommission attempts
    /// - `OPERATOR_CLEANUP_PACING_SECS`: Delay between members during cleanup
    /// - `OPERATOR_WORKER_POOL_SIZE`: Concurrent work queue units
    /// - `OPERATOR_TASK_RETENTION_HOURS`: Retention of finished tasks
    /// - `OPERATOR_REQUEUE_SECS`: Periodic DataCenter requeue
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let namespace = lookup("OPERATOR_NAMESPACE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let decommission_max_attempts = lookup("OPERATOR_DECOMMISSION_MAX_ATTEMPTS")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.decommission_max_attempts);

        let worker_pool_size = lookup("OPERATOR_WORKER_POOL_SIZE")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.worker_pool_size);

        let task_retention = lookup("OPERATOR_TASK_RETENTION_HOURS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|hours| Duration::from_secs(hours * 3600))
            .unwrap_or(defaults.task_retention);

        Self {
            namespace,
            node_status_poll_interval: secs(
                "OPERATOR_NODE_STATUS_POLL_SECS",
                defaults.node_status_poll_interval,
            ),
            sidecar_timeout: secs("OPERATOR_SIDECAR_TIMEOUT_SECS", defaults.sidecar_timeout),
            decommission_max_attempts,
            decommission_retry_delay: secs(
                "OPERATOR_DECOMMISSION_RETRY_DELAY_SECS",
                defaults.decommission_retry_delay,
            ),
            cleanup_pacing: secs("OPERATOR_CLEANUP_PACING_SECS", defaults.cleanup_pacing),
            worker_pool_size,
            task_retention,
            requeue_interval: secs("OPERATOR_REQUEUE_SECS", defaults.requeue_interval),
        }
    }

    /// Retry policy for decommission requests.
    pub fn decommission_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.decommission_max_attempts, self.decommission_retry_delay)
    }

    /// Configuration with every delay set to zero, for tests.
    pub fn immediate() -> Self {
        Self {
            decommission_retry_delay: Duration::ZERO,
            cleanup_pacing: Duration::ZERO,
            ..Self::default()
        }
    }
}
