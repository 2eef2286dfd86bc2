//! Periodic cluster health sweep
//!
//! Runs one list-nodes check per managed context and applies the result as a
//! `k8s:` snapshot, so cluster health flows through the bus like any other
//! service update. The orchestrator fires a sweep on every ticker fire,
//! skipping ticks while one is still in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use envctl_domain::ports::{ClusterGateway, StateStore};
use envctl_domain::value_objects::{ServiceLabel, ServiceSnapshot, ServiceState, ServiceType};

/// Check every context once, applying one snapshot per cluster.
pub async fn run_health_sweep(
    gateway: Arc<dyn ClusterGateway>,
    store: Arc<dyn StateStore>,
    contexts: Vec<String>,
) {
    for context in contexts {
        let label = ServiceLabel::k8s(&context);
        let snapshot = match gateway.node_health(&context).await {
            Ok(health) => {
                ServiceSnapshot::new(label, ServiceType::K8sConnection, ServiceState::Running)
                    .with_nodes(health)
            }
            Err(err) => {
                ServiceSnapshot::new(label, ServiceType::K8sConnection, ServiceState::Failed)
                    .with_error(err)
            }
        };
        store.apply(snapshot);
    }
}

/// Fire a sweep unless one is already running.
pub fn spawn_health_sweep(
    gateway: Arc<dyn ClusterGateway>,
    store: Arc<dyn StateStore>,
    contexts: Vec<String>,
    in_flight: Arc<AtomicBool>,
) {
    if in_flight.swap(true, Ordering::SeqCst) {
        return;
    }
    tokio::spawn(async move {
        run_health_sweep(gateway, store, contexts).await;
        in_flight.store(false, Ordering::SeqCst);
    });
}
