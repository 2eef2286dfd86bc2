//! MCP process supervisor
//!
//! One worker per declared MCP server. LocalCommand spawns the configured
//! binary with a clean environment plus the declared variables; Container
//! drives the container runtime CLI attached, so the child process stands in
//! for the container. Both variants share the outer state machine: probe the
//! proxy port until it accepts a TCP connect, report `Running`, supervise the
//! child, and retry with backoff when it exits unexpectedly.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use envctl_domain::config::{McpServerType, ResolvedMcpServer};
use envctl_domain::constants::{
    BASE_BACKOFF, CHILD_SHUTDOWN_GRACE, MAX_BACKOFF, MCP_READY_TIMEOUT, PROBE_CONNECT_TIMEOUT,
    PROBE_INTERVAL, RETRY_BUDGET,
};
use envctl_domain::error::{Error, Result};
use envctl_domain::events::{LogEntry, LogLevel};
use envctl_domain::ports::{StatusSink, Supervisor};
use envctl_domain::value_objects::{ServiceLabel, ServiceSnapshot, ServiceState, ServiceType};

use super::backoff::full_jitter;

/// Worker for one MCP helper process
pub struct McpSupervisor {
    config: ResolvedMcpServer,
    container_runtime: String,
}

enum Attempt {
    Cancelled,
    Err { error: Error, was_ready: bool },
}

impl McpSupervisor {
    /// New supervisor; `container_runtime` is the docker-compatible CLI used
    /// for Container-type servers.
    #[must_use]
    pub fn new(config: ResolvedMcpServer, container_runtime: impl Into<String>) -> Self {
        Self {
            config,
            container_runtime: container_runtime.into(),
        }
    }

    fn snapshot(&self, state: ServiceState) -> ServiceSnapshot {
        ServiceSnapshot::new(self.config.label.clone(), ServiceType::McpServer, state)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        LogEntry::new(level, self.config.label.to_string(), message)
    }

    /// The local TCP port that signals readiness.
    fn probe_port(&self) -> u16 {
        if self.config.config.server_type == McpServerType::Container {
            if let Some(host) = self
                .config
                .config
                .container_ports
                .first()
                .and_then(|mapping| mapping.split(':').next())
                .and_then(|host| host.parse::<u16>().ok())
            {
                return host;
            }
        }
        self.config.config.proxy_port
    }

    fn build_command(&self) -> Result<Command> {
        let mcp = &self.config.config;
        match mcp.server_type {
            McpServerType::LocalCommand => {
                let binary = mcp.command.as_ref().ok_or_else(|| {
                    Error::config(format!("MCP server '{}' has no command", mcp.name))
                })?;
                let mut command = Command::new(binary);
                command.args(&mcp.args);
                // Clean environment plus what the config declares; PATH and
                // HOME survive so the binary can be found and behave.
                command.env_clear();
                for key in ["PATH", "HOME"] {
                    if let Ok(value) = std::env::var(key) {
                        command.env(key, value);
                    }
                }
                command.envs(&mcp.env);
                Ok(command)
            }
            McpServerType::Container => {
                let image = mcp.container_image.as_ref().ok_or_else(|| {
                    Error::config(format!("MCP server '{}' has no containerImage", mcp.name))
                })?;
                let mut command = Command::new(&self.container_runtime);
                command.args(["run", "--rm", "--name"]);
                command.arg(format!("envctl-mcp-{}", mcp.name));
                for mapping in &mcp.container_ports {
                    command.arg("-p").arg(mapping);
                }
                for (key, value) in &mcp.env {
                    command.arg("-e").arg(format!("{key}={value}"));
                }
                command.arg(image);
                Ok(command)
            }
        }
    }

    /// Spawn the child and pump its output onto the bus, tagged by MCP name.
    fn spawn_child(&self, status: &Arc<dyn StatusSink>) -> Result<Child> {
        let mut command = self.build_command()?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn()?;

        if let Some(stdout) = child.stdout.take() {
            spawn_line_pump(
                stdout,
                LogLevel::Info,
                self.config.label.to_string(),
                Arc::clone(status),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_pump(
                stderr,
                LogLevel::Warn,
                self.config.label.to_string(),
                Arc::clone(status),
            );
        }
        Ok(child)
    }

    /// Probe the proxy port until it accepts, the child dies, or the window
    /// closes.
    async fn wait_ready(&self, child: &mut Child, cancel: &CancellationToken) -> Result<()> {
        let port = self.probe_port();
        let deadline = tokio::time::Instant::now() + MCP_READY_TIMEOUT;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if let Some(exit) = child.try_wait()? {
                return Err(Error::ChildExit {
                    name: self.config.config.name.clone(),
                    status: exit.code().unwrap_or(-1),
                });
            }
            let connect = TcpStream::connect(("127.0.0.1", port));
            if let Ok(Ok(_stream)) =
                tokio::time::timeout(PROBE_CONNECT_TIMEOUT, connect).await
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ProbeTimeout {
                    name: self.config.config.name.clone(),
                    port,
                });
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    async fn attempt(&self, status: &Arc<dyn StatusSink>, cancel: &CancellationToken) -> Attempt {
        let mut child = match self.spawn_child(status) {
            Ok(child) => child,
            Err(error) => {
                return Attempt::Err {
                    error,
                    was_ready: false,
                };
            }
        };
        let pid = child.id();

        match self.wait_ready(&mut child, cancel).await {
            Ok(()) if cancel.is_cancelled() => {
                shutdown_child(&mut child).await;
                return Attempt::Cancelled;
            }
            Ok(()) => {}
            Err(error) => {
                shutdown_child(&mut child).await;
                return Attempt::Err {
                    error,
                    was_ready: false,
                };
            }
        }

        let mut running = self
            .snapshot(ServiceState::Running)
            .with_local_port(self.probe_port());
        if let Some(pid) = pid {
            running = running.with_pid(pid);
        }
        status.update(running);
        status.log(self.log(
            LogLevel::Info,
            format!("listening on 127.0.0.1:{}", self.probe_port()),
        ));

        tokio::select! {
            () = cancel.cancelled() => {
                shutdown_child(&mut child).await;
                Attempt::Cancelled
            }
            exit = child.wait() => {
                let error = match exit {
                    Ok(exit) => Error::ChildExit {
                        name: self.config.config.name.clone(),
                        status: exit.code().unwrap_or(-1),
                    },
                    Err(e) => Error::from(e),
                };
                Attempt::Err { error, was_ready: true }
            }
        }
    }

    fn report_stopped(&self, status: &Arc<dyn StatusSink>) {
        status.update(self.snapshot(ServiceState::Stopping));
        status.update(self.snapshot(ServiceState::Stopped));
    }
}

#[async_trait]
impl Supervisor for McpSupervisor {
    fn label(&self) -> ServiceLabel {
        self.config.label.clone()
    }

    fn kind(&self) -> ServiceType {
        ServiceType::McpServer
    }

    async fn run(&self, status: Arc<dyn StatusSink>, cancel: CancellationToken) {
        let mut retries: u32 = 0;
        loop {
            status.update(self.snapshot(ServiceState::Starting));
            match self.attempt(&status, &cancel).await {
                Attempt::Cancelled => {
                    self.report_stopped(&status);
                    return;
                }
                Attempt::Err { error, was_ready } => {
                    if was_ready {
                        retries = 0;
                    }
                    if !error.is_retryable() || retries >= RETRY_BUDGET {
                        status.log(
                            self.log(LogLevel::Error, "MCP server failed permanently")
                                .with_error(&error),
                        );
                        status.update(self.snapshot(ServiceState::Failed).with_error(&error));
                        return;
                    }
                    retries += 1;
                    status.log(
                        self.log(
                            LogLevel::Warn,
                            format!("process attempt failed, retry {retries}/{RETRY_BUDGET}"),
                        )
                        .with_error(&error),
                    );
                    status.update(self.snapshot(ServiceState::Retrying).with_error(&error));
                    let delay = full_jitter(BASE_BACKOFF, MAX_BACKOFF, retries);
                    tokio::select! {
                        () = cancel.cancelled() => {
                            self.report_stopped(&status);
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Forward each line of child output onto the bus, tagged with the MCP label.
fn spawn_line_pump<R>(
    reader: R,
    level: LogLevel,
    subsystem: String,
    status: Arc<dyn StatusSink>,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            status.log(LogEntry::new(level, subsystem.clone(), line));
        }
    });
}

/// Graceful signal, five-second grace, then force kill.
async fn shutdown_child(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            let pid = nix::unistd::Pid::from_raw(pid);
            if nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM).is_ok()
                && tokio::time::timeout(CHILD_SHUTDOWN_GRACE, child.wait())
                    .await
                    .is_ok()
            {
                return;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = CHILD_SHUTDOWN_GRACE;
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}
