//! Service adapters: the two concrete supervisors and their factory

mod backoff;
mod factory;
mod mcp;
mod port_forward;

pub use backoff::full_jitter;
pub use factory::EnvSupervisorFactory;
pub use mcp::McpSupervisor;
pub use port_forward::PortForwardSupervisor;
