//! Service manager tests: single ownership per label, ordered teardown,
//! panic isolation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use envctl_application::manager::ServiceManager;
use envctl_domain::events::LogEntry;
use envctl_domain::ports::StatusSink;
use envctl_domain::value_objects::{ServiceLabel, ServiceSnapshot, ServiceState, ServiceType};

use crate::support::{Script, ScriptedSupervisor};

#[derive(Default)]
struct RecordingSink {
    snapshots: Mutex<Vec<ServiceSnapshot>>,
}

impl RecordingSink {
    fn stopping_order(&self) -> Vec<ServiceLabel> {
        self.snapshots
            .lock()
            .expect("sink lock")
            .iter()
            .filter(|s| s.state == ServiceState::Stopping)
            .map(|s| s.label.clone())
            .collect()
    }

    async fn wait_for(&self, label: &ServiceLabel, state: ServiceState) {
        loop {
            if self
                .snapshots
                .lock()
                .expect("sink lock")
                .iter()
                .any(|s| s.label == *label && s.state == state)
            {
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

fn manager(sink: &Arc<RecordingSink>) -> ServiceManager {
    ServiceManager::new(
        Arc::<RecordingSink>::clone(sink) as Arc<dyn StatusSink>,
        CancellationToken::new(),
    )
}

#[tokio::test(start_paused = true)]
async fn at_most_one_live_worker_per_label() {
    let sink = Arc::new(RecordingSink::default());
    let manager = manager(&sink);
    let label = ServiceLabel::port_forward("a");
    let first = ScriptedSupervisor::new(label.clone(), ServiceType::PortForward, Script::Steady);
    let second = ScriptedSupervisor::new(label.clone(), ServiceType::PortForward, Script::Steady);

    manager
        .start_service(first as Arc<dyn envctl_domain::ports::Supervisor>)
        .await
        .expect("first start");
    let err = manager
        .start_service(second as Arc<dyn envctl_domain::ports::Supervisor>)
        .await
        .expect_err("second start must be refused");
    assert!(err.to_string().contains("already has a live worker"));
    assert_eq!(manager.live_labels().await, vec![label]);
}

#[tokio::test(start_paused = true)]
async fn stop_unknown_label_is_idempotent() {
    let sink = Arc::new(RecordingSink::default());
    let manager = manager(&sink);
    manager.stop_service(&ServiceLabel::port_forward("ghost")).await;
    assert!(sink.snapshots.lock().expect("sink lock").is_empty());
}

#[tokio::test(start_paused = true)]
async fn restart_reuses_the_seeded_supervisor() {
    let sink = Arc::new(RecordingSink::default());
    let manager = manager(&sink);
    let label = ServiceLabel::mcp("m");
    let supervisor = ScriptedSupervisor::new(label.clone(), ServiceType::McpServer, Script::Steady);

    manager
        .start_service(Arc::clone(&supervisor) as Arc<dyn envctl_domain::ports::Supervisor>)
        .await
        .expect("start");
    sink.wait_for(&label, ServiceState::Running).await;

    manager.restart_service(&label).await.expect("restart");
    sink.wait_for(&label, ServiceState::Stopped).await;
    while supervisor.run_count() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.live_labels().await, vec![label]);
}

#[tokio::test(start_paused = true)]
async fn stop_all_walks_the_given_order() {
    let sink = Arc::new(RecordingSink::default());
    let manager = manager(&sink);
    let labels = [
        ServiceLabel::port_forward("a"),
        ServiceLabel::port_forward("b"),
        ServiceLabel::mcp("m"),
    ];
    for label in &labels {
        let kind = if label.as_str().starts_with("pf:") {
            ServiceType::PortForward
        } else {
            ServiceType::McpServer
        };
        manager
            .start_service(ScriptedSupervisor::new(label.clone(), kind, Script::Steady)
                as Arc<dyn envctl_domain::ports::Supervisor>)
            .await
            .expect("start");
    }
    for label in &labels {
        sink.wait_for(label, ServiceState::Running).await;
    }

    let reverse = [
        ServiceLabel::mcp("m"),
        ServiceLabel::port_forward("b"),
        ServiceLabel::port_forward("a"),
    ];
    manager.stop_all(&reverse).await;
    assert_eq!(sink.stopping_order(), reverse.to_vec());
    assert!(manager.live_labels().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn panic_becomes_one_failed_snapshot_and_label_stays_usable() {
    let sink = Arc::new(RecordingSink::default());
    let manager = manager(&sink);
    let label = ServiceLabel::port_forward("p");

    manager
        .start_service(ScriptedSupervisor::new(
            label.clone(),
            ServiceType::PortForward,
            Script::Panic,
        ) as Arc<dyn envctl_domain::ports::Supervisor>)
        .await
        .expect("start");
    sink.wait_for(&label, ServiceState::Failed).await;

    let failed: Vec<ServiceSnapshot> = sink
        .snapshots
        .lock()
        .expect("sink lock")
        .iter()
        .filter(|s| s.label == label && s.state == ServiceState::Failed)
        .cloned()
        .collect();
    assert_eq!(failed.len(), 1, "exactly one Failed update per panic");
    assert!(
        failed[0]
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("panicked")),
        "panic surfaces in the error"
    );

    // The label can be re-seeded afterwards.
    manager
        .start_service(ScriptedSupervisor::new(
            label.clone(),
            ServiceType::PortForward,
            Script::Steady,
        ) as Arc<dyn envctl_domain::ports::Supervisor>)
        .await
        .expect("restart after panic");
    sink.wait_for(&label, ServiceState::Running).await;
}
