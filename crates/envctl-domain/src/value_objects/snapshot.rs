//! Service state lattice and the per-label snapshot carried in every update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::ServiceLabel;

/// Kind of a supervised service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ServiceType {
    /// Kubernetes port-forward tunnel
    PortForward,
    /// Local MCP helper process
    McpServer,
    /// Cluster connection health node
    K8sConnection,
    /// Orchestrator-level pseudo-service
    System,
}

/// Service lifecycle state.
///
/// Transitions: `Stopped → Starting → Running → Stopping → Stopped`, with
/// `Starting/Running → Retrying → Starting` on transient failures and
/// `→ Failed` once the retry budget is exhausted. `Failed` and `Stopped` are
/// terminal for the worker; only the service manager seeds a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ServiceState {
    /// Service is initializing.
    Starting,
    /// Service is fully operational.
    Running,
    /// Transient failure, waiting out the backoff before the next attempt.
    Retrying,
    /// Service is shutting down.
    Stopping,
    /// Service is stopped.
    #[default]
    Stopped,
    /// Service failed with error; the worker has exited.
    Failed,
}

impl ServiceState {
    /// Terminal with respect to the worker: leaving this state requires a new worker.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// States the event bus must never drop under backpressure.
    #[must_use]
    pub fn is_preserved_under_backpressure(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped | Self::Running)
    }
}

/// Result of one list-nodes health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    /// Nodes whose `Ready` condition is `True`
    pub ready: u32,
    /// All nodes in the cluster
    pub total: u32,
}

impl NodeHealth {
    /// Healthy when every node is ready and there is at least one.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.total > 0 && self.ready == self.total
    }
}

/// Point-in-time status of one supervised service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSnapshot {
    /// Process-unique label
    pub label: ServiceLabel,
    /// Kind of service
    pub service_type: ServiceType,
    /// Current lifecycle state
    pub state: ServiceState,
    /// Derived from `state == Running`, carried explicitly so downstream code
    /// does not re-derive
    pub is_ready: bool,
    /// OS process id, for MCP children
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Actually-bound local port, for port-forwards and MCP proxies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    /// Last error observed by the worker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Node counts, for `K8sConnection` snapshots produced by health checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeHealth>,
    /// When this snapshot was produced
    pub updated_at: DateTime<Utc>,
}

impl ServiceSnapshot {
    /// New snapshot in the given state, ready-flag derived, timestamped now.
    #[must_use]
    pub fn new(label: ServiceLabel, service_type: ServiceType, state: ServiceState) -> Self {
        let is_ready = state == ServiceState::Running;
        Self {
            label,
            service_type,
            state,
            is_ready,
            pid: None,
            local_port: None,
            last_error: None,
            nodes: None,
            updated_at: Utc::now(),
        }
    }

    /// Attach the OS process id.
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attach the actually-bound local port.
    #[must_use]
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Attach the last observed error.
    #[must_use]
    pub fn with_error(mut self, err: impl std::fmt::Display) -> Self {
        self.last_error = Some(err.to_string());
        self
    }

    /// Attach node counts from a health check.
    #[must_use]
    pub fn with_nodes(mut self, nodes: NodeHealth) -> Self {
        self.nodes = Some(nodes);
        self
    }

    /// Whether anything but the timestamp differs from `other`.
    ///
    /// The state store uses this to swallow identity updates.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        self.label != other.label
            || self.service_type != other.service_type
            || self.state != other.state
            || self.is_ready != other.is_ready
            || self.pid != other.pid
            || self.local_port != other.local_port
            || self.last_error != other.last_error
            || self.nodes != other.nodes
    }
}
