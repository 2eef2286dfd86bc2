//! Test doubles shared across the application test suite: scripted
//! supervisors, a recording cluster control, and fake gateway/config ports.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use envctl_domain::config::{
    AggregatorConfig, ClusterRole, EnvironmentConfig, McpServerConfig, McpServerType,
    PortForwardConfig, ResolvedMcpServer, ResolvedPortForward, TargetKind, TargetRef,
};
use envctl_domain::error::{Error, Result};
use envctl_domain::ports::{
    ClusterCatalog, ClusterControl, ClusterGateway, ConfigSource, LoginOutput, StatusSink,
    Supervisor, SupervisorFactory, Tunnel, TunnelSpec,
};
use envctl_domain::value_objects::{
    NodeHealth, ServiceLabel, ServiceSnapshot, ServiceState, ServiceType,
};

// ---------------------------------------------------------------------------
// Scripted supervisors
// ---------------------------------------------------------------------------

/// What a scripted worker does after reporting Starting.
pub enum Script {
    /// Go Running, stay until cancelled.
    Steady,
    /// Go Running; on the trigger, dip through Retrying back to Running.
    FlakyOnTrigger(Mutex<Option<oneshot::Receiver<()>>>),
    /// Report Failed immediately and exit.
    AlwaysFail,
    /// Panic mid-run.
    Panic,
}

pub struct ScriptedSupervisor {
    pub label: ServiceLabel,
    pub kind: ServiceType,
    pub script: Script,
    pub runs: AtomicUsize,
}

impl ScriptedSupervisor {
    pub fn new(label: ServiceLabel, kind: ServiceType, script: Script) -> Arc<Self> {
        Arc::new(Self {
            label,
            kind,
            script,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn snapshot(&self, state: ServiceState) -> ServiceSnapshot {
        ServiceSnapshot::new(self.label.clone(), self.kind, state)
    }

    fn report_stopped(&self, status: &Arc<dyn StatusSink>) {
        status.update(self.snapshot(ServiceState::Stopping));
        status.update(self.snapshot(ServiceState::Stopped));
    }
}

#[async_trait]
impl Supervisor for ScriptedSupervisor {
    fn label(&self) -> ServiceLabel {
        self.label.clone()
    }

    fn kind(&self) -> ServiceType {
        self.kind
    }

    async fn run(&self, status: Arc<dyn StatusSink>, cancel: CancellationToken) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        status.update(self.snapshot(ServiceState::Starting));
        match &self.script {
            Script::Steady => {
                status.update(self.snapshot(ServiceState::Running));
                cancel.cancelled().await;
                self.report_stopped(&status);
            }
            Script::FlakyOnTrigger(trigger) => {
                status.update(self.snapshot(ServiceState::Running));
                let trigger = trigger.lock().expect("trigger lock").take();
                if let Some(trigger) = trigger {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            self.report_stopped(&status);
                            return;
                        }
                        _ = trigger => {
                            status.update(
                                self.snapshot(ServiceState::Retrying)
                                    .with_error("tunnel torn down externally"),
                            );
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            // Real supervisors re-enter their attempt loop, so
                            // the recovery Running is preceded by Starting.
                            status.update(self.snapshot(ServiceState::Starting));
                            status.update(self.snapshot(ServiceState::Running));
                        }
                    }
                }
                cancel.cancelled().await;
                self.report_stopped(&status);
            }
            Script::AlwaysFail => {
                status.update(
                    self.snapshot(ServiceState::Failed)
                        .with_error("scripted failure"),
                );
            }
            Script::Panic => panic!("scripted panic"),
        }
    }
}

/// Factory that hands out pre-registered scripted supervisors, defaulting to
/// a fresh Steady one per label.
#[derive(Default)]
pub struct ScriptedFactory {
    pub by_label: Mutex<HashMap<ServiceLabel, Arc<ScriptedSupervisor>>>,
}

impl ScriptedFactory {
    pub fn register(&self, supervisor: Arc<ScriptedSupervisor>) {
        self.by_label
            .lock()
            .expect("factory lock")
            .insert(supervisor.label.clone(), supervisor);
    }

    fn lookup(&self, label: &ServiceLabel, kind: ServiceType) -> Arc<dyn Supervisor> {
        let mut by_label = self.by_label.lock().expect("factory lock");
        let entry = by_label
            .entry(label.clone())
            .or_insert_with(|| ScriptedSupervisor::new(label.clone(), kind, Script::Steady));
        Arc::clone(entry) as Arc<dyn Supervisor>
    }
}

impl SupervisorFactory for ScriptedFactory {
    fn port_forward(&self, config: ResolvedPortForward) -> Arc<dyn Supervisor> {
        self.lookup(&config.label, ServiceType::PortForward)
    }

    fn mcp_server(&self, config: ResolvedMcpServer) -> Arc<dyn Supervisor> {
        self.lookup(&config.label, ServiceType::McpServer)
    }
}

// ---------------------------------------------------------------------------
// Fake cluster control / gateway / config source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeControl {
    pub logins: Mutex<Vec<String>>,
    pub switches: Mutex<Vec<String>>,
    pub current: Mutex<String>,
    /// Cluster name whose login is scripted to fail.
    pub fail_login_for: Mutex<Option<String>>,
}

#[async_trait]
impl ClusterControl for FakeControl {
    async fn login(&self, cluster: &str) -> Result<LoginOutput> {
        self.logins.lock().expect("lock").push(cluster.to_owned());
        if self.fail_login_for.lock().expect("lock").as_deref() == Some(cluster) {
            return Err(Error::Login {
                cluster: cluster.to_owned(),
                message: "scripted denial".to_owned(),
            });
        }
        Ok(LoginOutput::default())
    }

    async fn current_context(&self) -> Result<String> {
        Ok(self.current.lock().expect("lock").clone())
    }

    async fn switch_context(&self, name: &str) -> Result<()> {
        self.switches.lock().expect("lock").push(name.to_owned());
        *self.current.lock().expect("lock") = name.to_owned();
        Ok(())
    }

    async fn list_clusters(&self) -> Result<ClusterCatalog> {
        Ok(ClusterCatalog::default())
    }
}

pub struct HealthyGateway;

#[async_trait]
impl ClusterGateway for HealthyGateway {
    async fn node_health(&self, _context: &str) -> Result<NodeHealth> {
        Ok(NodeHealth { ready: 3, total: 3 })
    }

    async fn resolve_ready_pod(
        &self,
        _context: &str,
        _namespace: &str,
        _target: &TargetRef,
    ) -> Result<String> {
        Ok("pod-1".to_owned())
    }

    async fn open_tunnel(&self, _spec: &TunnelSpec) -> Result<Box<dyn Tunnel>> {
        Err(Error::tunnel("not used in these tests"))
    }
}

pub struct FixedConfig(pub EnvironmentConfig);

impl ConfigSource for FixedConfig {
    fn load(&self) -> Result<EnvironmentConfig> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Config fixtures
// ---------------------------------------------------------------------------

/// Two MC-side port-forwards and one MCP requiring both.
pub fn diamond_config() -> EnvironmentConfig {
    let pf = |name: &str| PortForwardConfig {
        name: name.to_owned(),
        cluster: ClusterRole::Management,
        context: None,
        namespace: "monitoring".to_owned(),
        target: TargetRef {
            kind: TargetKind::Service,
            name: name.to_owned(),
        },
        local_port: 0,
        remote_port: 9090,
        bind_address: "127.0.0.1".to_owned(),
        enabled: true,
    };
    EnvironmentConfig {
        port_forwards: vec![pf("a"), pf("b")],
        mcp_servers: vec![McpServerConfig {
            name: "m".to_owned(),
            server_type: McpServerType::LocalCommand,
            command: Some("mcp-m".to_owned()),
            args: vec![],
            env: BTreeMap::new(),
            container_image: None,
            container_ports: vec![],
            proxy_port: 7010,
            requires_port_forwards: vec!["a".to_owned(), "b".to_owned()],
            enabled: true,
        }],
        aggregator: AggregatorConfig { port: 8090 },
        health_check_interval_seconds: None,
    }
}
