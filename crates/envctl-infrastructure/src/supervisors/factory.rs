//! Production supervisor factory wiring the Kubernetes and process adapters.

use std::sync::Arc;

use envctl_domain::config::{ResolvedMcpServer, ResolvedPortForward};
use envctl_domain::ports::{ClusterGateway, Supervisor, SupervisorFactory};

use super::mcp::McpSupervisor;
use super::port_forward::PortForwardSupervisor;

/// Builds the real port-forward and MCP supervisors
pub struct EnvSupervisorFactory {
    gateway: Arc<dyn ClusterGateway>,
    container_runtime: String,
}

impl EnvSupervisorFactory {
    /// New factory over the shared gateway; `container_runtime` is the
    /// docker-compatible CLI for Container-type MCPs.
    #[must_use]
    pub fn new(gateway: Arc<dyn ClusterGateway>, container_runtime: impl Into<String>) -> Self {
        Self {
            gateway,
            container_runtime: container_runtime.into(),
        }
    }
}

impl SupervisorFactory for EnvSupervisorFactory {
    fn port_forward(&self, config: ResolvedPortForward) -> Arc<dyn Supervisor> {
        Arc::new(PortForwardSupervisor::new(
            config,
            Arc::clone(&self.gateway),
        ))
    }

    fn mcp_server(&self, config: ResolvedMcpServer) -> Arc<dyn Supervisor> {
        Arc::new(McpSupervisor::new(config, self.container_runtime.clone()))
    }
}
