//! Service manager
//!
//! Owns the worker pool keyed by label and enforces at most one live worker
//! per label. Workers are supervisor tasks; a per-worker monitor converts a
//! panic into a single `Failed` snapshot so no label can take the process
//! down. Stops are acknowledged within a fixed budget, after which the worker
//! task is aborted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use envctl_domain::constants::SERVICE_STOP_TIMEOUT;
use envctl_domain::error::{Error, Result};
use envctl_domain::events::{BusMessage, LogEntry};
use envctl_domain::ports::{EventBus, StateStore, StatusSink, Supervisor};
use envctl_domain::value_objects::{ServiceLabel, ServiceSnapshot, ServiceState, ServiceType};

/// Narrow reporting capability handed to each worker: snapshots go to the
/// store (which publishes changes), log lines go straight to the bus.
pub struct StatusRelay {
    store: Arc<dyn StateStore>,
    bus: Arc<dyn EventBus>,
}

impl StatusRelay {
    /// New relay over the shared store and bus.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, bus: Arc<dyn EventBus>) -> Self {
        Self { store, bus }
    }
}

impl StatusSink for StatusRelay {
    fn update(&self, snapshot: ServiceSnapshot) {
        self.store.apply(snapshot);
    }

    fn log(&self, entry: LogEntry) {
        self.bus.publish(BusMessage::LogEntry(entry));
    }
}

struct WorkerHandle {
    kind: ServiceType,
    cancel: CancellationToken,
    abort: tokio::task::AbortHandle,
    monitor: JoinHandle<()>,
}

/// Worker pool keyed by service label
pub struct ServiceManager {
    status: Arc<dyn StatusSink>,
    parent: CancellationToken,
    workers: Mutex<HashMap<ServiceLabel, WorkerHandle>>,
    seeds: Mutex<HashMap<ServiceLabel, Arc<dyn Supervisor>>>,
}

impl ServiceManager {
    /// New manager; worker stop tokens are children of `parent`.
    #[must_use]
    pub fn new(status: Arc<dyn StatusSink>, parent: CancellationToken) -> Self {
        Self {
            status,
            parent,
            workers: Mutex::new(HashMap::new()),
            seeds: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a supervisor is seeded for this label (live or restartable).
    pub async fn is_seeded(&self, label: &ServiceLabel) -> bool {
        self.seeds.lock().await.contains_key(label)
    }

    /// Labels with a live worker right now.
    pub async fn live_labels(&self) -> Vec<ServiceLabel> {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|(_, handle)| !handle.monitor.is_finished())
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Spawn one worker for the supervisor.
    ///
    /// Reports `Starting` synchronously before the task is spawned, so the
    /// observable order of first transitions follows the caller's (dependency)
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error when the label already has a live worker.
    pub async fn start_service(&self, supervisor: Arc<dyn Supervisor>) -> Result<()> {
        let label = supervisor.label();
        let kind = supervisor.kind();

        let mut workers = self.workers.lock().await;
        if let Some(existing) = workers.get(&label)
            && !existing.monitor.is_finished()
        {
            return Err(Error::internal(format!(
                "service '{label}' already has a live worker"
            )));
        }

        self.seeds
            .lock()
            .await
            .insert(label.clone(), Arc::clone(&supervisor));
        self.status
            .update(ServiceSnapshot::new(label.clone(), kind, ServiceState::Starting));

        let cancel = self.parent.child_token();
        let worker = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            let status = Arc::clone(&self.status);
            let cancel = cancel.clone();
            async move { supervisor.run(status, cancel).await }
        });
        let abort = worker.abort_handle();
        let monitor = tokio::spawn(monitor_worker(
            worker,
            label.clone(),
            kind,
            Arc::clone(&self.status),
        ));

        workers.insert(
            label,
            WorkerHandle {
                kind,
                cancel,
                abort,
                monitor,
            },
        );
        Ok(())
    }

    /// Spawn a worker per supervisor, in the given order. Never blocks on
    /// readiness; returns the per-label errors of workers that could not be
    /// seeded.
    pub async fn start_services(
        &self,
        supervisors: Vec<Arc<dyn Supervisor>>,
    ) -> Vec<(ServiceLabel, Error)> {
        let mut errors = Vec::new();
        for supervisor in supervisors {
            let label = supervisor.label();
            if let Err(err) = self.start_service(supervisor).await {
                errors.push((label, err));
            }
        }
        errors
    }

    /// Stop one worker and wait for its acknowledgement (bounded). Idempotent
    /// for unknown labels.
    pub async fn stop_service(&self, label: &ServiceLabel) {
        let handle = { self.workers.lock().await.remove(label) };
        let Some(handle) = handle else { return };

        if handle.monitor.is_finished() {
            let _ = handle.monitor.await;
            return;
        }

        // Report Stopping synchronously so teardown ordering is observable in
        // the caller's (reverse-dependency) order; the worker's own Stopping
        // report is then an identity update.
        self.status.update(ServiceSnapshot::new(
            label.clone(),
            handle.kind,
            ServiceState::Stopping,
        ));
        handle.cancel.cancel();
        if tokio::time::timeout(SERVICE_STOP_TIMEOUT, handle.monitor)
            .await
            .is_err()
        {
            // The worker ignored cancellation; cut it loose. Its monitor will
            // report the final Stopped once the abort lands.
            handle.abort.abort();
        }
    }

    /// Stop then start the one label, without old/new worker overlap.
    ///
    /// # Errors
    ///
    /// Returns an error when no supervisor was ever seeded for the label.
    pub async fn restart_service(&self, label: &ServiceLabel) -> Result<()> {
        self.stop_service(label).await;
        let seed = self.seeds.lock().await.get(label).cloned();
        match seed {
            Some(supervisor) => self.start_service(supervisor).await,
            None => Err(Error::internal(format!(
                "no supervisor seeded for '{label}'"
            ))),
        }
    }

    /// Stop every worker, walking `order` first (reverse topological), then
    /// any stragglers.
    pub async fn stop_all(&self, order: &[ServiceLabel]) {
        for label in order {
            self.stop_service(label).await;
        }
        let leftovers: Vec<ServiceLabel> =
            { self.workers.lock().await.keys().cloned().collect() };
        for label in &leftovers {
            self.stop_service(label).await;
        }
    }

    /// Forget every seeded supervisor. Used when a connection switch rebuilds
    /// the graph.
    pub async fn clear_seeds(&self) {
        self.seeds.lock().await.clear();
    }
}

/// Await the worker and translate its exit: a panic becomes one `Failed`
/// snapshot, an abort (stop-timeout) becomes `Stopped` with an error note.
async fn monitor_worker(
    worker: JoinHandle<()>,
    label: ServiceLabel,
    kind: ServiceType,
    status: Arc<dyn StatusSink>,
) {
    match worker.await {
        Ok(()) => {}
        Err(err) if err.is_panic() => {
            let panic = err.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_owned());
            tracing::error!(%label, panic = %message, "supervisor panicked");
            status.update(
                ServiceSnapshot::new(label, kind, ServiceState::Failed)
                    .with_error(format!("worker panicked: {message}")),
            );
        }
        Err(_cancelled) => {
            status.update(
                ServiceSnapshot::new(label, kind, ServiceState::Stopped)
                    .with_error("worker aborted after stop timeout"),
            );
        }
    }
}
