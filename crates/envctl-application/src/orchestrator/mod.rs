//! Orchestrator
//!
//! Top-level coordinator above the service manager. Builds the dependency
//! graph from resolved configuration, seeds workers in topological order,
//! observes every state change on the bus, cascades restarts through the
//! graph, runs the periodic health sweep, and drives the connection-switch
//! workflow. The engine is single-threaded across its inbox so state
//! transitions stay serializable.

mod switch;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use envctl_domain::config::ResolvedConfig;
use envctl_domain::constants::CONTEXT_SWITCH_TIMEOUT;
use envctl_domain::context::{ContextScheme, EnvironmentTarget};
use envctl_domain::error::{Error, Result};
use envctl_domain::events::{BusMessage, LogEntry, LogLevel};
use envctl_domain::graph::{DependencyGraph, GraphNode};
use envctl_domain::ports::{
    ClusterControl, ClusterGateway, ConfigSource, EventBus, StateStore, StatusSink, Supervisor,
    SupervisorFactory,
};
use envctl_domain::value_objects::{ServiceLabel, ServiceSnapshot, ServiceState, ServiceType};

use crate::health::spawn_health_sweep;
use crate::manager::{ServiceManager, StatusRelay};
use switch::{PhaseOutcome, SwitchFlow, SwitchPhase};

/// Short name of the orchestrator-level snapshot (`system:envctl`)
pub const SYSTEM_SERVICE_NAME: &str = "envctl";

/// Everything the orchestrator is wired with, injected explicitly
pub struct OrchestratorDeps {
    /// Process-wide event bus
    pub bus: Arc<dyn EventBus>,
    /// Authoritative state store
    pub store: Arc<dyn StateStore>,
    /// Login / kubeconfig control
    pub control: Arc<dyn ClusterControl>,
    /// Kubernetes gateway (health checks)
    pub gateway: Arc<dyn ClusterGateway>,
    /// Supervisor factory for the two service adapters
    pub factory: Arc<dyn SupervisorFactory>,
    /// Declarative configuration source
    pub config_source: Arc<dyn ConfigSource>,
    /// Context naming scheme
    pub scheme: ContextScheme,
}

/// Commands a caller may enqueue
pub enum OrchestratorCommand {
    /// Tear down the whole graph and rebuild it against a new target
    Switch {
        /// The new (mc, wc) pair
        target: EnvironmentTarget,
    },
    /// Stop everything; acknowledged when all workers reported `Stopped`
    Stop {
        /// Fired on completion
        ack: oneshot::Sender<()>,
    },
}

enum Inbox {
    Command(OrchestratorCommand),
    Phase(PhaseOutcome),
}

/// Build the typed dependency graph for a resolved configuration.
///
/// Every referenced context becomes a `k8s:` node; each port-forward depends
/// on its context node; each MCP depends on its required forwards.
///
/// # Errors
///
/// Returns a `Config` error when the configuration references an undeclared
/// dependency (already guarded by validation) or would form a cycle.
pub fn build_graph(resolved: &ResolvedConfig) -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::new();

    let mut contexts = resolved.contexts.clone();
    for pf in &resolved.port_forwards {
        if !contexts.contains(&pf.context_name) {
            contexts.push(pf.context_name.clone());
        }
    }
    for context in &contexts {
        graph.add_node(GraphNode {
            id: ServiceLabel::k8s(context),
            kind: ServiceType::K8sConnection,
            friendly_name: context.clone(),
            depends_on: Vec::new(),
        })?;
    }
    for pf in &resolved.port_forwards {
        graph.add_node(GraphNode {
            id: pf.label.clone(),
            kind: ServiceType::PortForward,
            friendly_name: pf.label.short_name().to_owned(),
            depends_on: vec![ServiceLabel::k8s(&pf.context_name)],
        })?;
    }
    for mcp in &resolved.mcp_servers {
        graph.add_node(GraphNode {
            id: mcp.label.clone(),
            kind: ServiceType::McpServer,
            friendly_name: mcp.label.short_name().to_owned(),
            depends_on: mcp.requires.clone(),
        })?;
    }
    Ok(graph)
}

/// The orchestrator, before it is started
pub struct Orchestrator {
    deps: OrchestratorDeps,
}

/// Handle to a running orchestrator
pub struct OrchestratorHandle {
    inbox: mpsc::Sender<Inbox>,
    engine: JoinHandle<()>,
}

impl Orchestrator {
    /// Wire an orchestrator; nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self { deps }
    }

    /// Load configuration, build the graph, seed every worker in dependency
    /// order, and spawn the engine loop (plus the health ticker).
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when loading, binding, or graph construction
    /// fails; nothing is left running in that case.
    pub async fn start(self, target: EnvironmentTarget) -> Result<OrchestratorHandle> {
        let config = self.deps.config_source.load()?;
        let resolved = config.resolve(&self.deps.scheme, &target)?;
        let graph = build_graph(&resolved)?;

        let parent = CancellationToken::new();
        let status: Arc<dyn StatusSink> = Arc::new(StatusRelay::new(
            Arc::clone(&self.deps.store),
            Arc::clone(&self.deps.bus),
        ));
        let manager = Arc::new(ServiceManager::new(status, parent.clone()));

        let (inbox_tx, inbox_rx) = mpsc::channel(64);
        let engine = Engine {
            deps: self.deps,
            manager,
            parent,
            inbox_tx: inbox_tx.clone(),
            graph,
            resolved,
            target,
            switch: None,
            restart_attempted: HashSet::new(),
            retried_since_running: HashSet::new(),
            health_in_flight: Arc::new(AtomicBool::new(false)),
        };
        // Subscribe before the first worker is seeded: a service that fails
        // in its very first pass must still be observed.
        let bus_stream = engine.deps.bus.subscribe();
        engine.apply_system(ServiceState::Starting, None);
        engine.start_all().await;
        engine.apply_system(ServiceState::Running, None);

        let engine = tokio::spawn(engine.run(inbox_rx, bus_stream));
        Ok(OrchestratorHandle {
            inbox: inbox_tx,
            engine,
        })
    }
}

impl OrchestratorHandle {
    /// Enqueue a connection switch; progress is observable on the bus.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine has already shut down.
    pub async fn switch(&self, target: EnvironmentTarget) -> Result<()> {
        self.inbox
            .send(Inbox::Command(OrchestratorCommand::Switch { target }))
            .await
            .map_err(|_| Error::internal("orchestrator is not running"))
    }

    /// Stop the engine: cancels the ticker, tears the graph down in reverse
    /// topological order, and returns when all workers reported `Stopped`.
    pub async fn stop(self) {
        let (ack, done) = oneshot::channel();
        if self
            .inbox
            .send(Inbox::Command(OrchestratorCommand::Stop { ack }))
            .await
            .is_ok()
        {
            let _ = done.await;
        }
        let _ = self.engine.await;
    }
}

struct Engine {
    deps: OrchestratorDeps,
    manager: Arc<ServiceManager>,
    parent: CancellationToken,
    inbox_tx: mpsc::Sender<Inbox>,
    graph: DependencyGraph,
    resolved: ResolvedConfig,
    target: EnvironmentTarget,
    switch: Option<SwitchFlow>,
    /// Labels the orchestrator has already restarted once after a failure;
    /// cleared when the label reaches `Running`.
    restart_attempted: HashSet<ServiceLabel>,
    /// Labels observed in `Retrying` since they last ran. Supervisors re-enter
    /// through `Starting` before the recovery `Running`, so the single prior
    /// state cannot identify a transient recovery; the history can.
    retried_since_running: HashSet<ServiceLabel>,
    health_in_flight: Arc<AtomicBool>,
}

impl Engine {
    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Inbox>,
        mut bus_stream: envctl_domain::ports::BusStream,
    ) {
        let mut ticker = self.new_ticker();
        loop {
            tokio::select! {
                biased;
                msg = inbox.recv() => match msg {
                    Some(Inbox::Command(OrchestratorCommand::Stop { ack })) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        return;
                    }
                    Some(Inbox::Command(OrchestratorCommand::Switch { target })) => {
                        self.begin_switch(target);
                    }
                    Some(Inbox::Phase(outcome)) => {
                        if self.advance_switch(outcome).await {
                            ticker = self.new_ticker();
                        }
                    }
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                Some(msg) = bus_stream.next() => self.handle_bus(msg).await,
                _ = ticker.tick() => self.fire_health_sweep(),
            }
        }
    }

    fn new_ticker(&self) -> tokio::time::Interval {
        let mut ticker = tokio::time::interval(self.resolved.health_check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker
    }

    /// Contexts of every `k8s:` node in the current graph.
    fn k8s_contexts(&self) -> Vec<String> {
        self.graph
            .topological_order()
            .into_iter()
            .filter(|label| {
                self.graph
                    .node(label)
                    .is_some_and(|n| n.kind == ServiceType::K8sConnection)
            })
            .map(|label| label.short_name().to_owned())
            .collect()
    }

    fn fire_health_sweep(&self) {
        if self.switch.is_some() {
            return;
        }
        spawn_health_sweep(
            Arc::clone(&self.deps.gateway),
            Arc::clone(&self.deps.store),
            self.k8s_contexts(),
            Arc::clone(&self.health_in_flight),
        );
    }

    /// Seed every supervised service in topological order.
    async fn start_all(&self) {
        for context in self.k8s_contexts() {
            self.deps.store.apply(ServiceSnapshot::new(
                ServiceLabel::k8s(&context),
                ServiceType::K8sConnection,
                ServiceState::Starting,
            ));
        }

        let mut by_label: HashMap<ServiceLabel, Arc<dyn Supervisor>> = HashMap::new();
        for pf in &self.resolved.port_forwards {
            by_label.insert(pf.label.clone(), self.deps.factory.port_forward(pf.clone()));
        }
        for mcp in &self.resolved.mcp_servers {
            by_label.insert(mcp.label.clone(), self.deps.factory.mcp_server(mcp.clone()));
        }

        let ordered: Vec<Arc<dyn Supervisor>> = self
            .graph
            .topological_order()
            .into_iter()
            .filter_map(|label| by_label.remove(&label))
            .collect();
        for (label, err) in self.manager.start_services(ordered).await {
            self.publish_log(
                LogLevel::Error,
                format!("cannot start '{label}'"),
                Some(err.to_string()),
            );
        }
    }

    async fn handle_bus(&mut self, msg: BusMessage) {
        let BusMessage::ServiceStateChanged { snapshot, .. } = msg else {
            return;
        };
        // During a switch the whole graph churns by design; individual
        // transitions must not trigger cascades.
        if self.switch.is_some() {
            return;
        }
        let label = snapshot.label.clone();
        match snapshot.state {
            ServiceState::Failed => {
                if !self.manager.is_seeded(&label).await {
                    return;
                }
                if self.restart_attempted.insert(label.clone()) {
                    self.publish_log(
                        LogLevel::Warn,
                        format!("'{label}' failed; restarting it once"),
                        snapshot.last_error.clone(),
                    );
                    if let Err(err) = self.manager.restart_service(&label).await {
                        self.publish_log(
                            LogLevel::Error,
                            format!("restart of '{label}' failed"),
                            Some(err.to_string()),
                        );
                    }
                } else {
                    self.publish_log(
                        LogLevel::Error,
                        format!(
                            "'{label}' failed after its restart; dependents left untouched"
                        ),
                        snapshot.last_error.clone(),
                    );
                }
            }
            ServiceState::Retrying => {
                self.retried_since_running.insert(label);
            }
            ServiceState::Running => {
                let was_restarted = self.restart_attempted.remove(&label);
                let transient_recovery = self.retried_since_running.remove(&label);
                if transient_recovery || was_restarted {
                    self.cascade_restarts(&label, transient_recovery).await;
                }
            }
            _ => {}
        }
    }

    /// Restart everything downstream of a recovered node. After a transient
    /// recovery the dependents were running against a dead upstream and are
    /// bounced unconditionally; after a failure recovery only non-Running
    /// dependents are touched.
    async fn cascade_restarts(&mut self, label: &ServiceLabel, unconditional: bool) {
        for dependent in self.graph.dependents(label) {
            if !self.manager.is_seeded(&dependent).await {
                continue;
            }
            let running = self.deps.store.state_of(&dependent) == Some(ServiceState::Running);
            if !unconditional && running {
                continue;
            }
            self.publish_log(
                LogLevel::Info,
                format!("'{label}' recovered; restarting dependent '{dependent}'"),
                None,
            );
            if let Err(err) = self.manager.restart_service(&dependent).await {
                self.publish_log(
                    LogLevel::Error,
                    format!("restart of dependent '{dependent}' failed"),
                    Some(err.to_string()),
                );
            }
        }
    }

    fn begin_switch(&mut self, target: EnvironmentTarget) {
        if self.switch.is_some() {
            self.publish_log(
                LogLevel::Warn,
                "connection switch already in progress; ignoring request".to_owned(),
                None,
            );
            return;
        }
        self.publish_log(
            LogLevel::Info,
            format!(
                "switching connection to mc='{}' wc='{}'",
                target.mc,
                target.wc.as_deref().unwrap_or("-")
            ),
            None,
        );
        self.apply_system(ServiceState::Starting, None);
        self.switch = Some(SwitchFlow::new(target));

        let order = self.graph.reverse_topological_order();
        let manager = Arc::clone(&self.manager);
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            manager.stop_all(&order).await;
            let _ = tx.send(Inbox::Phase(PhaseOutcome::ServicesStopped)).await;
        });
    }

    /// Drive the switch state machine one step. Returns true when the graph
    /// was rebuilt (the caller resets the health ticker).
    async fn advance_switch(&mut self, outcome: PhaseOutcome) -> bool {
        let (phase, target) = match &self.switch {
            Some(flow) => (flow.phase, flow.target.clone()),
            None => return false,
        };
        if outcome.phase() != phase {
            return false;
        }
        match outcome {
            PhaseOutcome::ServicesStopped => {
                self.set_phase(SwitchPhase::LoginMc);
                self.spawn_login(target.mc.clone(), true);
                false
            }
            PhaseOutcome::LoginMcDone(Err(err)) | PhaseOutcome::LoginWcDone(Err(err)) => {
                self.abort_switch(&err);
                false
            }
            PhaseOutcome::LoginMcDone(Ok(_)) => {
                match target.wc_login_name() {
                    Some(wc_cluster) => {
                        self.set_phase(SwitchPhase::LoginWc);
                        self.spawn_login(wc_cluster, false);
                    }
                    None => self.spawn_context_switch(&target),
                }
                false
            }
            PhaseOutcome::LoginWcDone(Ok(_)) => {
                self.spawn_context_switch(&target);
                false
            }
            PhaseOutcome::ContextSwitched(Err(err)) => {
                self.abort_switch(&err);
                false
            }
            PhaseOutcome::ContextSwitched(Ok(())) => match self.rebuild(target).await {
                Ok(()) => true,
                Err(err) => {
                    self.abort_switch(&err);
                    false
                }
            },
        }
    }

    fn set_phase(&mut self, phase: SwitchPhase) {
        if let Some(flow) = &mut self.switch {
            flow.phase = phase;
        }
    }

    fn spawn_login(&self, cluster: String, is_mc: bool) {
        let control = Arc::clone(&self.deps.control);
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = control.login(&cluster).await;
            let outcome = if is_mc {
                PhaseOutcome::LoginMcDone(result)
            } else {
                PhaseOutcome::LoginWcDone(result)
            };
            let _ = tx.send(Inbox::Phase(outcome)).await;
        });
    }

    fn spawn_context_switch(&mut self, target: &EnvironmentTarget) {
        self.set_phase(SwitchPhase::SwitchingContext);
        let context = self.deps.scheme.target_context(target);
        let control = Arc::clone(&self.deps.control);
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result =
                match tokio::time::timeout(CONTEXT_SWITCH_TIMEOUT, control.switch_context(&context))
                    .await
                {
                    Ok(result) => result,
                    Err(_elapsed) => Err(Error::ContextSwitch {
                        context,
                        message: format!("timed out after {CONTEXT_SWITCH_TIMEOUT:?}"),
                    }),
                };
            let _ = tx
                .send(Inbox::Phase(PhaseOutcome::ContextSwitched(result)))
                .await;
        });
    }

    /// Step 5–7 of the switch: fresh config bound to the new target, store
    /// reset, graph rebuilt, services restarted.
    async fn rebuild(&mut self, target: EnvironmentTarget) -> Result<()> {
        let config = self.deps.config_source.load()?;
        let resolved = config.resolve(&self.deps.scheme, &target)?;
        let graph = build_graph(&resolved)?;

        self.deps.store.reset();
        self.manager.clear_seeds().await;
        self.graph = graph;
        self.resolved = resolved;
        self.target = target;
        self.restart_attempted.clear();
        self.retried_since_running.clear();
        self.switch = None;

        self.start_all().await;
        self.apply_system(ServiceState::Running, None);
        self.publish_log(
            LogLevel::Info,
            format!(
                "connection switch complete: mc='{}' wc='{}'",
                self.target.mc,
                self.target.wc.as_deref().unwrap_or("-")
            ),
            None,
        );
        Ok(())
    }

    /// A login or context-switch failure ends the switch; the previous graph
    /// definition stays in place (its services are already stopped) and the
    /// error surfaces through the system snapshot and the log stream.
    fn abort_switch(&mut self, err: &Error) {
        self.publish_log(
            LogLevel::Error,
            "connection switch aborted".to_owned(),
            Some(err.to_string()),
        );
        self.apply_system(ServiceState::Failed, Some(err));
        self.switch = None;
    }

    async fn shutdown(&mut self) {
        self.apply_system(ServiceState::Stopping, None);
        let order = self.graph.reverse_topological_order();
        self.manager.stop_all(&order).await;
        self.parent.cancel();
        self.apply_system(ServiceState::Stopped, None);
    }

    fn apply_system(&self, state: ServiceState, err: Option<&Error>) {
        let mut snapshot = ServiceSnapshot::new(
            ServiceLabel::system(SYSTEM_SERVICE_NAME),
            ServiceType::System,
            state,
        );
        if let Some(err) = err {
            snapshot = snapshot.with_error(err);
        }
        self.deps.store.apply(snapshot);
    }

    fn publish_log(&self, level: LogLevel, message: String, error: Option<String>) {
        let mut entry = LogEntry::new(level, "orchestrator", message);
        if let Some(error) = error {
            entry.error = Some(error);
        }
        self.deps.bus.publish(BusMessage::LogEntry(entry));
    }
}
