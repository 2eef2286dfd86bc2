//! Supervisor capability contract
//!
//! A supervisor owns one service's lifecycle for the duration of one worker.
//! The service manager spawns `run` on its own task and never inspects the
//! supervisor beyond this contract.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ResolvedMcpServer, ResolvedPortForward};
use crate::ports::StatusSink;
use crate::value_objects::{ServiceLabel, ServiceType};

/// One service's lifecycle driver
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// The label this supervisor owns.
    fn label(&self) -> ServiceLabel;

    /// The kind of service supervised.
    fn kind(&self) -> ServiceType;

    /// Drive the service until it reaches a terminal state or `cancel` fires.
    ///
    /// Every observable fact is reported through `status`; the final report
    /// before returning must be `Stopped` (on cancel) or `Failed` (on an
    /// exhausted retry budget). Implementations must honor cancellation
    /// within five seconds and must not panic outward.
    async fn run(&self, status: Arc<dyn StatusSink>, cancel: CancellationToken);
}

/// Builds supervisors from resolved configuration entries.
///
/// Keeps the orchestrator adapter-agnostic: tests inject scripted
/// supervisors, production injects the Kubernetes and process adapters.
pub trait SupervisorFactory: Send + Sync {
    /// Supervisor for one port-forward.
    fn port_forward(&self, config: ResolvedPortForward) -> Arc<dyn Supervisor>;

    /// Supervisor for one MCP server.
    fn mcp_server(&self, config: ResolvedMcpServer) -> Arc<dyn Supervisor>;
}
