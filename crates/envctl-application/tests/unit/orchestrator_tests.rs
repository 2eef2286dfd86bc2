//! Orchestrator scenario tests: dependency-ordered start, reverse teardown,
//! cascading restarts, crash isolation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;

use envctl_application::orchestrator::{Orchestrator, OrchestratorDeps};
use envctl_domain::context::{ContextScheme, EnvironmentTarget};
use envctl_domain::events::{BusMessage, LogLevel};
use envctl_domain::ports::{
    ClusterControl, ClusterGateway, ConfigSource, EventBus, StateStore, SupervisorFactory,
};
use envctl_domain::value_objects::{ServiceLabel, ServiceState, ServiceType};
use envctl_infrastructure::bus::BoundedBus;
use envctl_infrastructure::state::InMemoryStateStore;

use crate::support::{
    FakeControl, FixedConfig, HealthyGateway, Script, ScriptedFactory, ScriptedSupervisor,
    diamond_config,
};

struct Harness {
    bus: Arc<dyn EventBus>,
    store: Arc<dyn StateStore>,
    control: Arc<FakeControl>,
    factory: Arc<ScriptedFactory>,
}

impl Harness {
    fn new() -> Self {
        let bus: Arc<dyn EventBus> = BoundedBus::new();
        let store: Arc<dyn StateStore> =
            Arc::new(InMemoryStateStore::new(Arc::clone(&bus)));
        Self {
            bus,
            store,
            control: Arc::new(FakeControl::default()),
            factory: Arc::new(ScriptedFactory::default()),
        }
    }

    fn deps(&self) -> OrchestratorDeps {
        OrchestratorDeps {
            bus: Arc::clone(&self.bus),
            store: Arc::clone(&self.store),
            control: Arc::clone(&self.control) as Arc<dyn ClusterControl>,
            gateway: Arc::new(HealthyGateway) as Arc<dyn ClusterGateway>,
            factory: Arc::clone(&self.factory) as Arc<dyn SupervisorFactory>,
            config_source: Arc::new(FixedConfig(diamond_config())) as Arc<dyn ConfigSource>,
            scheme: ContextScheme::new("tp-"),
        }
    }

    async fn wait_state(&self, label: &ServiceLabel, state: ServiceState) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
        loop {
            if self.store.state_of(label) == Some(state.clone()) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{label} never reached {state:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Record every state transition into a shared vector.
fn spawn_recorder(bus: &Arc<dyn EventBus>) -> Arc<Mutex<Vec<(ServiceLabel, ServiceState)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut stream = bus.subscribe();
    let sink = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            if let BusMessage::ServiceStateChanged { snapshot, .. } = msg {
                sink.lock()
                    .expect("recorder lock")
                    .push((snapshot.label, snapshot.state));
            }
        }
    });
    seen
}

fn first_index_of(
    log: &[(ServiceLabel, ServiceState)],
    label: &ServiceLabel,
    state: &ServiceState,
) -> Option<usize> {
    first_index_from(log, 0, label, state)
}

fn first_index_from(
    log: &[(ServiceLabel, ServiceState)],
    from: usize,
    label: &ServiceLabel,
    state: &ServiceState,
) -> Option<usize> {
    log.iter()
        .enumerate()
        .skip(from)
        .find_map(|(i, (l, s))| (l == label && s == state).then_some(i))
}

#[tokio::test(start_paused = true)]
async fn cold_start_order_and_reverse_teardown() {
    let harness = Harness::new();
    let recorder = spawn_recorder(&harness.bus);

    let handle = Orchestrator::new(harness.deps())
        .start(EnvironmentTarget::mc_only("gazelle"))
        .await
        .expect("start");

    let pf_a = ServiceLabel::port_forward("a");
    let pf_b = ServiceLabel::port_forward("b");
    let mcp_m = ServiceLabel::mcp("m");
    for label in [&pf_a, &pf_b, &mcp_m] {
        harness.wait_state(label, ServiceState::Running).await;
    }

    {
        let log = recorder.lock().expect("recorder lock").clone();
        let a = first_index_of(&log, &pf_a, &ServiceState::Starting).expect("pf:a started");
        let b = first_index_of(&log, &pf_b, &ServiceState::Starting).expect("pf:b started");
        let m = first_index_of(&log, &mcp_m, &ServiceState::Starting).expect("mcp:m started");
        assert!(a < m && b < m, "both forwards start before the MCP");
    }

    handle.stop().await;

    let log = recorder.lock().expect("recorder lock").clone();
    let a = first_index_of(&log, &pf_a, &ServiceState::Stopping).expect("pf:a stopping");
    let b = first_index_of(&log, &pf_b, &ServiceState::Stopping).expect("pf:b stopping");
    let m = first_index_of(&log, &mcp_m, &ServiceState::Stopping).expect("mcp:m stopping");
    assert!(m < a && m < b, "the MCP stops before its forwards");
    for label in [&pf_a, &pf_b, &mcp_m] {
        assert_eq!(harness.store.state_of(label), Some(ServiceState::Stopped));
    }
}

#[tokio::test(start_paused = true)]
async fn upstream_recovery_restarts_dependents() {
    let harness = Harness::new();
    let recorder = spawn_recorder(&harness.bus);

    let pf_a = ServiceLabel::port_forward("a");
    let mcp_m = ServiceLabel::mcp("m");
    let (trigger_tx, trigger_rx) = oneshot::channel();
    let flaky = ScriptedSupervisor::new(
        pf_a.clone(),
        ServiceType::PortForward,
        Script::FlakyOnTrigger(Mutex::new(Some(trigger_rx))),
    );
    harness.factory.register(Arc::clone(&flaky));
    let mcp = ScriptedSupervisor::new(mcp_m.clone(), ServiceType::McpServer, Script::Steady);
    harness.factory.register(Arc::clone(&mcp));

    let handle = Orchestrator::new(harness.deps())
        .start(EnvironmentTarget::mc_only("gazelle"))
        .await
        .expect("start");
    for label in [&pf_a, &mcp_m] {
        harness.wait_state(label, ServiceState::Running).await;
    }

    // Kill the tunnel externally.
    trigger_tx.send(()).expect("trigger");

    // The MCP must be bounced after pf:a is Running again.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    loop {
        if mcp.run_count() == 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "dependent was never restarted"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    harness.wait_state(&mcp_m, ServiceState::Running).await;

    let log = recorder.lock().expect("recorder lock").clone();
    let pf_retry = first_index_of(&log, &pf_a, &ServiceState::Retrying).expect("pf:a retried");
    let pf_back = first_index_from(&log, pf_retry + 1, &pf_a, &ServiceState::Running)
        .expect("pf:a running again");
    let mcp_stopping = first_index_from(&log, pf_retry + 1, &mcp_m, &ServiceState::Stopping)
        .expect("mcp:m restarted");
    assert!(
        mcp_stopping > pf_back,
        "dependent restart happens after the upstream is Running again"
    );

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_service_is_restarted_once_then_left() {
    let harness = Harness::new();
    let pf_a = ServiceLabel::port_forward("a");
    let failing =
        ScriptedSupervisor::new(pf_a.clone(), ServiceType::PortForward, Script::AlwaysFail);
    harness.factory.register(Arc::clone(&failing));

    let mut stream = harness.bus.subscribe();
    let handle = Orchestrator::new(harness.deps())
        .start(EnvironmentTarget::mc_only("gazelle"))
        .await
        .expect("start");

    harness.wait_state(&pf_a, ServiceState::Failed).await;

    // Wait for the give-up log entry: one orchestrator-driven restart, then
    // the label is left alone.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    let mut gave_up = false;
    while !gave_up {
        assert!(tokio::time::Instant::now() < deadline, "no give-up log");
        let msg = tokio::time::timeout(Duration::from_secs(60), stream.next())
            .await
            .ok()
            .flatten();
        if let Some(BusMessage::LogEntry(entry)) = msg {
            gave_up = entry.level == LogLevel::Error && entry.message.contains("dependents");
        }
    }
    assert_eq!(failing.run_count(), 2, "initial run plus one restart");

    // The unrelated services are untouched.
    assert_eq!(
        harness.store.state_of(&ServiceLabel::port_forward("b")),
        Some(ServiceState::Running)
    );
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_supervisor_is_isolated() {
    let harness = Harness::new();
    let pf_a = ServiceLabel::port_forward("a");
    let panicking =
        ScriptedSupervisor::new(pf_a.clone(), ServiceType::PortForward, Script::Panic);
    harness.factory.register(Arc::clone(&panicking));

    let handle = Orchestrator::new(harness.deps())
        .start(EnvironmentTarget::mc_only("gazelle"))
        .await
        .expect("start");

    harness.wait_state(&pf_a, ServiceState::Failed).await;
    harness
        .wait_state(&ServiceLabel::port_forward("b"), ServiceState::Running)
        .await;
    harness
        .wait_state(&ServiceLabel::mcp("m"), ServiceState::Running)
        .await;

    handle.stop().await;
}
