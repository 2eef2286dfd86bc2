//! Kubernetes gateway adapter
//!
//! Implements [`ClusterGateway`] over the `kube` client: node health, ready
//! pod resolution through service selectors, and port-forward tunnels. One
//! client is built (and cached) per kube context, with the context overridden
//! in the REST config and a 30 s connect timeout.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use envctl_domain::config::{TargetKind, TargetRef};
use envctl_domain::constants::{KUBE_CONNECT_TIMEOUT, NODE_HEALTH_TIMEOUT};
use envctl_domain::error::{Error, Result};
use envctl_domain::ports::{ClusterGateway, Tunnel, TunnelSpec};
use envctl_domain::value_objects::NodeHealth;

/// Gateway over the `kube` client, one cached client per context
pub struct KubeGateway {
    kubeconfig_path: Option<PathBuf>,
    clients: tokio::sync::Mutex<HashMap<String, Client>>,
}

impl KubeGateway {
    /// New gateway; `kubeconfig_path` of `None` uses the standard lookup.
    #[must_use]
    pub fn new(kubeconfig_path: Option<PathBuf>) -> Self {
        Self {
            kubeconfig_path,
            clients: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, context: &str) -> Result<Client> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(context) {
            return Ok(client.clone());
        }

        let kubeconfig = match &self.kubeconfig_path {
            Some(path) => Kubeconfig::read_from(path).map_err(Error::kube_api)?,
            None => Kubeconfig::read().map_err(Error::kube_api)?,
        };
        let options = KubeConfigOptions {
            context: Some(context.to_owned()),
            ..KubeConfigOptions::default()
        };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(Error::kube_api)?;
        config.connect_timeout = Some(KUBE_CONNECT_TIMEOUT);

        let client = Client::try_from(config).map_err(Error::kube_api)?;
        clients.insert(context.to_owned(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn node_health(&self, context: &str) -> Result<NodeHealth> {
        let client = self.client_for(context).await?;
        let nodes: Api<Node> = Api::all(client);
        let list = tokio::time::timeout(NODE_HEALTH_TIMEOUT, nodes.list(&ListParams::default()))
            .await
            .map_err(|_| Error::HealthCheck {
                context: context.to_owned(),
                message: format!("list nodes timed out after {NODE_HEALTH_TIMEOUT:?}"),
            })?
            .map_err(|e| Error::HealthCheck {
                context: context.to_owned(),
                message: e.to_string(),
            })?;

        let total = u32::try_from(list.items.len()).unwrap_or(u32::MAX);
        let ready = u32::try_from(list.items.iter().filter(|n| node_is_ready(n)).count())
            .unwrap_or(u32::MAX);
        Ok(NodeHealth { ready, total })
    }

    async fn resolve_ready_pod(
        &self,
        context: &str,
        namespace: &str,
        target: &TargetRef,
    ) -> Result<String> {
        if target.kind == TargetKind::Pod {
            return Ok(target.name.clone());
        }

        let client = self.client_for(context).await?;
        let services: Api<Service> = Api::namespaced(client.clone(), namespace);
        let service = services.get(&target.name).await.map_err(Error::kube_api)?;

        let selector = service
            .spec
            .and_then(|spec| spec.selector)
            .unwrap_or_default();
        if selector.is_empty() {
            return Err(Error::NoReadyPod {
                kind: "service".to_owned(),
                name: target.name.clone(),
                namespace: namespace.to_owned(),
            });
        }
        let label_selector = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let pods: Api<Pod> = Api::namespaced(client, namespace);
        let list = pods
            .list(&ListParams::default().labels(&label_selector))
            .await
            .map_err(Error::kube_api)?;

        list.items
            .iter()
            .find(|pod| pod_is_ready(pod))
            .and_then(|pod| pod.metadata.name.clone())
            .ok_or_else(|| Error::NoReadyPod {
                kind: "service".to_owned(),
                name: target.name.clone(),
                namespace: namespace.to_owned(),
            })
    }

    async fn open_tunnel(&self, spec: &TunnelSpec) -> Result<Box<dyn Tunnel>> {
        let client = self.client_for(&spec.context_name).await?;
        let api: Api<Pod> = Api::namespaced(client, &spec.namespace);

        // Handshake once up front so readiness means a working tunnel, not
        // just a bound listener.
        api.portforward(&spec.pod_name, &[spec.remote_port])
            .await
            .map_err(|e| Error::tunnel(format!("cannot open port-forward: {e}")))?;

        let listener = TcpListener::bind((spec.bind_address.as_str(), spec.local_port))
            .await
            .map_err(|e| {
                Error::tunnel(format!(
                    "cannot bind {}:{}: {e}",
                    spec.bind_address, spec.local_port
                ))
            })?;
        let local_port = listener
            .local_addr()
            .map_err(|e| Error::tunnel(format!("cannot read bound address: {e}")))?
            .port();

        let cancel = CancellationToken::new();
        let (err_tx, err_rx) = mpsc::channel(8);
        let task = tokio::spawn(accept_loop(
            listener,
            api,
            spec.pod_name.clone(),
            spec.remote_port,
            err_tx,
            cancel.clone(),
        ));

        Ok(Box::new(KubeTunnel {
            local_port,
            cancel,
            errors: err_rx,
            task: Some(task),
        }))
    }
}

/// Accept local connections, opening one pod port-forward per connection.
async fn accept_loop(
    listener: TcpListener,
    api: Api<Pod>,
    pod_name: String,
    remote_port: u16,
    err_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((mut inbound, _peer)) => {
                    let api = api.clone();
                    let pod_name = pod_name.clone();
                    let err_tx = err_tx.clone();
                    tokio::spawn(async move {
                        match api.portforward(&pod_name, &[remote_port]).await {
                            Ok(mut forwarder) => match forwarder.take_stream(remote_port) {
                                Some(mut upstream) => {
                                    let _ = tokio::io::copy_bidirectional(
                                        &mut inbound,
                                        &mut upstream,
                                    )
                                    .await;
                                }
                                None => {
                                    let _ = err_tx
                                        .try_send(Error::tunnel("port-forward stream missing"));
                                }
                            },
                            Err(e) => {
                                let _ = err_tx.try_send(Error::tunnel(format!(
                                    "port-forward to pod '{pod_name}' failed: {e}"
                                )));
                            }
                        }
                    });
                }
                Err(e) => {
                    let _ = err_tx.try_send(Error::tunnel(format!("accept failed: {e}")));
                    break;
                }
            },
        }
    }
}

/// Live tunnel handle: bound port, fatal-error stream, cancellation.
struct KubeTunnel {
    local_port: u16,
    cancel: CancellationToken,
    errors: mpsc::Receiver<Error>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Tunnel for KubeTunnel {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn closed(&mut self) -> Result<()> {
        tokio::select! {
            () = self.cancel.cancelled() => Ok(()),
            err = self.errors.recv() => match err {
                Some(e) => Err(e),
                None => Ok(()),
            },
        }
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn pod_is_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    let running = status.phase.as_deref() == Some("Running");
    let condition_ready = status
        .conditions
        .as_ref()
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        });
    let containers_ready = status
        .container_statuses
        .as_ref()
        .is_none_or(|statuses| statuses.iter().all(|c| c.ready));
    running && condition_ready && containers_ready
}
