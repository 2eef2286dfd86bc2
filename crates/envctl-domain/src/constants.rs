//! Domain-level constants: queue capacities, backoff schedule, timeouts.

use std::time::Duration;

/// Bounded per-source queue capacity for service state updates.
pub const STATE_QUEUE_CAPACITY: usize = 256;

/// Bounded per-source queue capacity for log entries.
pub const LOG_QUEUE_CAPACITY: usize = 1024;

/// Per-subscriber delivery channel capacity. A subscriber that falls this far
/// behind is detached with a backpressure notification.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

/// First retry delay of the exponential backoff schedule.
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Cap on the exponential backoff schedule.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Consecutive failures (without ever reaching Running) before a supervisor
/// reports Failed and exits.
pub const RETRY_BUDGET: u32 = 5;

/// Window for a port-forward to reach Running after an attempt starts.
pub const PORT_FORWARD_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Window for an MCP server to accept its first TCP probe.
pub const MCP_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connect deadline of the MCP readiness probe.
pub const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between MCP readiness probe attempts.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Grace period between the platform stop signal and a force kill.
pub const CHILD_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Budget for a single service to acknowledge a stop request.
pub const SERVICE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default period of the cluster health ticker.
pub const HEALTH_UPDATE_INTERVAL: Duration = Duration::from_secs(15);

/// Deadline for a single list-nodes health call.
pub const NODE_HEALTH_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline for switching the active kube context.
pub const CONTEXT_SWITCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout applied to every Kubernetes REST config.
pub const KUBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
