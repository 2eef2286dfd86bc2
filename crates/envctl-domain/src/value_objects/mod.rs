//! Immutable value objects

mod label;
mod snapshot;

pub use label::{K8S_PREFIX, MCP_PREFIX, PORT_FORWARD_PREFIX, SYSTEM_PREFIX, ServiceLabel};
pub use snapshot::{NodeHealth, ServiceSnapshot, ServiceState, ServiceType};
