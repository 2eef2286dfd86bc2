//! Port-forward supervisor
//!
//! One worker per declared forward. Each attempt resolves a ready target pod,
//! opens the tunnel, reports `Running` with the actually-bound port, and then
//! blocks until the tunnel dies or the stop signal fires. Transient failures
//! (`NoReadyPod`, readiness timeout, tunnel errors) feed the full-jitter
//! backoff; the retry budget only applies to attempts that never reached
//! `Running`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use envctl_domain::config::ResolvedPortForward;
use envctl_domain::constants::{
    BASE_BACKOFF, MAX_BACKOFF, PORT_FORWARD_READY_TIMEOUT, RETRY_BUDGET,
};
use envctl_domain::error::Error;
use envctl_domain::events::{LogEntry, LogLevel};
use envctl_domain::ports::{ClusterGateway, StatusSink, Supervisor, Tunnel, TunnelSpec};
use envctl_domain::value_objects::{ServiceLabel, ServiceSnapshot, ServiceState, ServiceType};

use super::backoff::full_jitter;

/// Worker for one Kubernetes port-forward
pub struct PortForwardSupervisor {
    config: ResolvedPortForward,
    gateway: Arc<dyn ClusterGateway>,
}

enum Attempt {
    /// Stop signal observed; the worker exits.
    Cancelled,
    /// The attempt failed; `was_ready` records whether the tunnel ever ran.
    Err { error: Error, was_ready: bool },
}

impl PortForwardSupervisor {
    /// New supervisor for a resolved forward.
    #[must_use]
    pub fn new(config: ResolvedPortForward, gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { config, gateway }
    }

    fn snapshot(&self, state: ServiceState) -> ServiceSnapshot {
        ServiceSnapshot::new(self.config.label.clone(), ServiceType::PortForward, state)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        LogEntry::new(level, self.config.label.to_string(), message)
    }

    async fn attempt(&self, status: &Arc<dyn StatusSink>, cancel: &CancellationToken) -> Attempt {
        let setup = async {
            let pod = self
                .gateway
                .resolve_ready_pod(
                    &self.config.context_name,
                    &self.config.namespace,
                    &self.config.target,
                )
                .await?;
            let tunnel = self
                .gateway
                .open_tunnel(&TunnelSpec {
                    context_name: self.config.context_name.clone(),
                    namespace: self.config.namespace.clone(),
                    pod_name: pod.clone(),
                    bind_address: self.config.bind_address.clone(),
                    local_port: self.config.local_port,
                    remote_port: self.config.remote_port,
                })
                .await?;
            Ok::<(String, Box<dyn Tunnel>), Error>((pod, tunnel))
        };

        let setup = tokio::time::timeout(PORT_FORWARD_READY_TIMEOUT, setup);
        let outcome = tokio::select! {
            () = cancel.cancelled() => return Attempt::Cancelled,
            outcome = setup => outcome,
        };
        let (pod, mut tunnel) = match outcome {
            Err(_elapsed) => {
                return Attempt::Err {
                    error: Error::ReadinessTimeout {
                        label: self.config.label.to_string(),
                        seconds: PORT_FORWARD_READY_TIMEOUT.as_secs(),
                    },
                    was_ready: false,
                };
            }
            Ok(Err(error)) => {
                return Attempt::Err {
                    error,
                    was_ready: false,
                };
            }
            Ok(Ok(ready)) => ready,
        };

        let local_port = tunnel.local_port();
        status.log(self.log(
            LogLevel::Info,
            format!(
                "forwarding {}:{local_port} -> {pod}:{} in {}",
                self.config.bind_address, self.config.remote_port, self.config.namespace
            ),
        ));
        status.update(self.snapshot(ServiceState::Running).with_local_port(local_port));

        tokio::select! {
            () = cancel.cancelled() => {
                tunnel.shutdown().await;
                Attempt::Cancelled
            }
            closed = tunnel.closed() => {
                tunnel.shutdown().await;
                let error = match closed {
                    Ok(()) => Error::tunnel("tunnel closed unexpectedly"),
                    Err(error) => error,
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
impl Supervisor for PortForwardSupervisor {
    fn label(&self) -> ServiceLabel {
        self.config.label.clone()
    }

    fn kind(&self) -> ServiceType {
        ServiceType::PortForward
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
                        // The tunnel did run; the consecutive-failure budget
                        // restarts from here.
                        retries = 0;
                    }
                    if !error.is_retryable() || retries >= RETRY_BUDGET {
                        status.log(
                            self.log(LogLevel::Error, "port-forward failed permanently")
                                .with_error(&error),
                        );
                        status.update(self.snapshot(ServiceState::Failed).with_error(&error));
                        return;
                    }
                    retries += 1;
                    status.log(
                        self.log(
                            LogLevel::Warn,
                            format!("attempt failed, retry {retries}/{RETRY_BUDGET}"),
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
