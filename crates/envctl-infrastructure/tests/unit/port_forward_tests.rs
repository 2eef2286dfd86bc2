//! Port-forward supervisor tests against a scripted gateway.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use envctl_domain::config::{ResolvedPortForward, TargetKind, TargetRef};
use envctl_domain::error::{Error, Result};
use envctl_domain::events::LogEntry;
use envctl_domain::ports::{ClusterGateway, StatusSink, Supervisor, Tunnel, TunnelSpec};
use envctl_domain::value_objects::{
    NodeHealth, ServiceLabel, ServiceSnapshot, ServiceState,
};
use envctl_infrastructure::supervisors::PortForwardSupervisor;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingSink {
    snapshots: Mutex<Vec<ServiceSnapshot>>,
}

impl RecordingSink {
    fn states(&self) -> Vec<ServiceState> {
        self.snapshots
            .lock()
            .expect("sink lock")
            .iter()
            .map(|s| s.state.clone())
            .collect()
    }

    fn last_snapshot(&self) -> Option<ServiceSnapshot> {
        self.snapshots.lock().expect("sink lock").last().cloned()
    }

    async fn wait_for_state(&self, state: ServiceState) {
        self.wait_for_nth_state(state, 1).await;
    }

    async fn wait_for_nth_state(&self, state: ServiceState, n: usize) {
        loop {
            let count = self
                .snapshots
                .lock()
                .expect("sink lock")
                .iter()
                .filter(|s| s.state == state)
                .count();
            if count >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl StatusSink for RecordingSink {
    fn update(&self, snapshot: ServiceSnapshot) {
        self.snapshots.lock().expect("sink lock").push(snapshot);
    }

    fn log(&self, _entry: LogEntry) {}
}

/// Tunnel that either dies immediately or lives until shutdown.
struct FakeTunnel {
    port: u16,
    die_immediately: bool,
}

#[async_trait]
impl Tunnel for FakeTunnel {
    fn local_port(&self) -> u16 {
        self.port
    }

    async fn closed(&mut self) -> Result<()> {
        if self.die_immediately {
            Err(Error::tunnel("link reset"))
        } else {
            futures::future::pending::<Result<()>>().await
        }
    }

    async fn shutdown(&mut self) {}
}

#[derive(Default)]
struct FakeGateway {
    /// Scripted per-call resolution results; when empty, resolves `pod-1`.
    resolve_script: Mutex<VecDeque<Result<String>>>,
    resolve_calls: AtomicUsize,
    /// Scripted per-call `die_immediately` flags; when empty, tunnels live.
    tunnel_script: Mutex<VecDeque<bool>>,
}

impl FakeGateway {
    fn fail_resolution_forever(self) -> Self {
        // An empty script resolves; seed a sentinel the gateway re-issues.
        self.resolve_script
            .lock()
            .expect("script lock")
            .push_back(Err(Error::NoReadyPod {
                kind: "service".to_owned(),
                name: "prometheus".to_owned(),
                namespace: "monitoring".to_owned(),
            }));
        self
    }
}

#[async_trait]
impl ClusterGateway for FakeGateway {
    async fn node_health(&self, _context: &str) -> Result<NodeHealth> {
        Ok(NodeHealth { ready: 1, total: 1 })
    }

    async fn resolve_ready_pod(
        &self,
        _context: &str,
        _namespace: &str,
        _target: &TargetRef,
    ) -> Result<String> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.resolve_script.lock().expect("script lock");
        match script.pop_front() {
            Some(Err(err)) => {
                // Keep failing with the same kind until the script is refilled.
                script.push_back(Err(Error::NoReadyPod {
                    kind: "service".to_owned(),
                    name: "prometheus".to_owned(),
                    namespace: "monitoring".to_owned(),
                }));
                Err(err)
            }
            Some(Ok(pod)) => Ok(pod),
            None => Ok("pod-1".to_owned()),
        }
    }

    async fn open_tunnel(&self, spec: &TunnelSpec) -> Result<Box<dyn Tunnel>> {
        let die = self
            .tunnel_script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(false);
        let port = if spec.local_port == 0 {
            40_001
        } else {
            spec.local_port
        };
        Ok(Box::new(FakeTunnel {
            port,
            die_immediately: die,
        }))
    }
}

fn forward_config() -> ResolvedPortForward {
    ResolvedPortForward {
        label: ServiceLabel::port_forward("prometheus"),
        context_name: "tp-gazelle".to_owned(),
        namespace: "monitoring".to_owned(),
        target: TargetRef {
            kind: TargetKind::Service,
            name: "prometheus-operated".to_owned(),
        },
        local_port: 0,
        remote_port: 9090,
        bind_address: "127.0.0.1".to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn reaches_running_and_reports_bound_port() {
    let gateway = Arc::new(FakeGateway::default());
    let sink = Arc::new(RecordingSink::default());
    let cancel = CancellationToken::new();
    let supervisor = Arc::new(PortForwardSupervisor::new(forward_config(), gateway));

    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        let sink: Arc<dyn StatusSink> = Arc::<RecordingSink>::clone(&sink);
        let cancel = cancel.clone();
        async move { supervisor.run(sink, cancel).await }
    });

    sink.wait_for_state(ServiceState::Running).await;
    let running = sink
        .snapshots
        .lock()
        .expect("sink lock")
        .iter()
        .find(|s| s.state == ServiceState::Running)
        .cloned()
        .expect("running snapshot");
    assert_eq!(running.local_port, Some(40_001));
    assert!(running.is_ready);

    cancel.cancel();
    task.await.expect("worker joins");
    assert_eq!(
        sink.states(),
        vec![
            ServiceState::Starting,
            ServiceState::Running,
            ServiceState::Stopping,
            ServiceState::Stopped,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn exhausts_retry_budget_and_fails() {
    let gateway = Arc::new(FakeGateway::default().fail_resolution_forever());
    let sink = Arc::new(RecordingSink::default());
    let cancel = CancellationToken::new();
    let supervisor = Arc::new(PortForwardSupervisor::new(
        forward_config(),
        Arc::clone(&gateway) as Arc<dyn ClusterGateway>,
    ));

    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        let sink: Arc<dyn StatusSink> = Arc::<RecordingSink>::clone(&sink);
        async move { supervisor.run(sink, cancel).await }
    });
    task.await.expect("worker exits on its own");

    let states = sink.states();
    let retrying = states
        .iter()
        .filter(|s| **s == ServiceState::Retrying)
        .count();
    assert_eq!(retrying, 5, "five Retrying reports before giving up");
    assert_eq!(states.last(), Some(&ServiceState::Failed));
    assert_eq!(gateway.resolve_calls.load(Ordering::SeqCst), 6);
    let failed = sink.last_snapshot().expect("snapshot");
    assert!(failed.last_error.is_some());
}

#[tokio::test(start_paused = true)]
async fn tunnel_death_after_ready_retries_and_recovers() {
    let gateway = FakeGateway::default();
    gateway
        .tunnel_script
        .lock()
        .expect("script lock")
        .push_back(true); // first tunnel dies at once, second lives
    let gateway = Arc::new(gateway);
    let sink = Arc::new(RecordingSink::default());
    let cancel = CancellationToken::new();
    let supervisor = Arc::new(PortForwardSupervisor::new(forward_config(), gateway));

    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        let sink: Arc<dyn StatusSink> = Arc::<RecordingSink>::clone(&sink);
        let cancel = cancel.clone();
        async move { supervisor.run(sink, cancel).await }
    });

    sink.wait_for_state(ServiceState::Retrying).await;
    sink.wait_for_nth_state(ServiceState::Running, 2).await;
    cancel.cancel();
    task.await.expect("worker joins");

    let states = sink.states();
    let running = states
        .iter()
        .filter(|s| **s == ServiceState::Running)
        .count();
    assert_eq!(running, 2, "ready before and after the transient failure");
    assert_eq!(states.last(), Some(&ServiceState::Stopped));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_stops_cleanly() {
    let gateway = Arc::new(FakeGateway::default().fail_resolution_forever());
    let sink = Arc::new(RecordingSink::default());
    let cancel = CancellationToken::new();
    let supervisor = Arc::new(PortForwardSupervisor::new(forward_config(), gateway));

    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        let sink: Arc<dyn StatusSink> = Arc::<RecordingSink>::clone(&sink);
        let cancel = cancel.clone();
        async move { supervisor.run(sink, cancel).await }
    });

    sink.wait_for_state(ServiceState::Retrying).await;
    cancel.cancel();
    task.await.expect("worker joins");
    assert_eq!(sink.states().last(), Some(&ServiceState::Stopped));
}
