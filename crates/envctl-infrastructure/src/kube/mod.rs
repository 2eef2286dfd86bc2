//! Kubernetes adapters: session control and the cluster gateway

mod context;
mod gateway;

pub use context::{ContextManager, LoginCommand};
pub use gateway::KubeGateway;
