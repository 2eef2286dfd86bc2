//! Kubernetes gateway port
//!
//! The cluster is a black box behind this trait: list nodes, resolve a ready
//! pod, open a port-forward tunnel. The real adapter wraps the Kubernetes
//! client; tests substitute a scripted fake.

use async_trait::async_trait;

use crate::config::TargetRef;
use crate::error::Result;
use crate::value_objects::NodeHealth;

/// Everything needed to open one tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Kube context to tunnel through
    pub context_name: String,
    /// Namespace of the pod
    pub namespace: String,
    /// Resolved pod name
    pub pod_name: String,
    /// Local address to bind
    pub bind_address: String,
    /// Local port; 0 means OS-assigned
    pub local_port: u16,
    /// Port on the pod
    pub remote_port: u16,
}

/// A live port-forward tunnel
#[async_trait]
pub trait Tunnel: Send {
    /// The actually-bound local port.
    fn local_port(&self) -> u16;

    /// Resolves when the tunnel dies on its own; the error describes why.
    ///
    /// # Errors
    ///
    /// Returns the tunnel failure. A clean shutdown resolves with `Ok(())`.
    async fn closed(&mut self) -> Result<()>;

    /// Tear the tunnel down and release the local listener.
    async fn shutdown(&mut self);
}

/// Black-box Kubernetes operations the core consumes
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// One list-nodes call under a deadline, counting `Ready` conditions.
    ///
    /// # Errors
    ///
    /// Returns a `HealthCheck` or `KubeApi` error on API failure or timeout.
    async fn node_health(&self, context: &str) -> Result<NodeHealth>;

    /// Resolve the pod a tunnel should target.
    ///
    /// For a pod target this is the name itself; for a service target the
    /// selector is enumerated and the first Running pod whose `Ready`
    /// condition is `True` and whose every container is ready wins.
    ///
    /// # Errors
    ///
    /// Returns `NoReadyPod` when nothing qualifies (retryable), or `KubeApi`
    /// on API failure.
    async fn resolve_ready_pod(
        &self,
        context: &str,
        namespace: &str,
        target: &TargetRef,
    ) -> Result<String>;

    /// Open a tunnel to the given pod.
    ///
    /// # Errors
    ///
    /// Returns a `Tunnel` error when the listener cannot bind or the
    /// port-forward subresource cannot be reached.
    async fn open_tunnel(&self, spec: &TunnelSpec) -> Result<Box<dyn Tunnel>>;
}
