//! Declarative environment configuration
//!
//! The on-disk record (`EnvironmentConfig`) is target-agnostic: port-forwards
//! name the cluster *role* they run against. Binding a config to a concrete
//! `(mc, wc)` pair materializes every context name and produces a
//! [`ResolvedConfig`], which is what the orchestrator actually runs. A
//! connection switch re-binds the same declarative record against the new
//! target.
//!
//! Unknown fields are rejected everywhere; `enabled` defaults to true.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::HEALTH_UPDATE_INTERVAL;
use crate::context::{ContextScheme, EnvironmentTarget};
use crate::error::{Error, Result};
use crate::value_objects::ServiceLabel;

/// Which cluster of the target pair a port-forward runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ClusterRole {
    /// The management cluster
    Management,
    /// The workload cluster; binding fails when the target has none
    #[default]
    Workload,
}

/// Kind of object a port-forward targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    /// Forward straight to a named pod
    Pod,
    /// Resolve a ready pod through a service's selector
    Service,
}

/// Object a port-forward tunnels to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetRef {
    /// Pod or service
    pub kind: TargetKind,
    /// Object name in the port-forward's namespace
    pub name: String,
}

fn default_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_owned()
}

/// One declared port-forward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortForwardConfig {
    /// Stable name; the service label is `pf:<name>`
    pub name: String,
    /// Cluster role the forward runs against
    #[serde(default)]
    pub cluster: ClusterRole,
    /// Explicit context override; when set, `cluster` is ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Namespace of the target object
    pub namespace: String,
    /// Target pod or service
    pub target: TargetRef,
    /// Local listen port; 0 means OS-assigned
    #[serde(default)]
    pub local_port: u16,
    /// Port on the pod
    pub remote_port: u16,
    /// Local bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Whether this forward participates in the environment
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl PortForwardConfig {
    /// The service label of this forward.
    #[must_use]
    pub fn label(&self) -> ServiceLabel {
        ServiceLabel::port_forward(&self.name)
    }
}

/// How an MCP server is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum McpServerType {
    /// Spawn a local command
    LocalCommand,
    /// Start a container image through the container runtime
    Container,
}

/// One declared MCP helper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct McpServerConfig {
    /// Stable name; the service label is `mcp:<name>`
    pub name: String,
    /// Launch variant
    #[serde(rename = "type")]
    pub server_type: McpServerType,
    /// Binary to spawn (LocalCommand)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment on top of a clean inherited one
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Image to run (Container)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
    /// host:container port publications (Container)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_ports: Vec<String>,
    /// TCP port the process listens on locally once started
    pub proxy_port: u16,
    /// Port-forward names this MCP depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_port_forwards: Vec<String>,
    /// Whether this MCP participates in the environment
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl McpServerConfig {
    /// The service label of this MCP.
    #[must_use]
    pub fn label(&self) -> ServiceLabel {
        ServiceLabel::mcp(&self.name)
    }
}

/// MCP aggregator endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AggregatorConfig {
    /// Local port the aggregator SSE endpoint listens on
    pub port: u16,
}

/// The declarative environment record, as read from disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// Declared port-forwards
    #[serde(default)]
    pub port_forwards: Vec<PortForwardConfig>,
    /// Declared MCP servers
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    /// Aggregator endpoint settings
    pub aggregator: AggregatorConfig,
    /// Cluster health tick period; default 15
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval_seconds: Option<u64>,
}

impl EnvironmentConfig {
    /// Cluster health tick period.
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval_seconds
            .map_or(HEALTH_UPDATE_INTERVAL, Duration::from_secs)
    }

    /// Structural validation beyond what serde enforces.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error on duplicate names, zero target ports, a
    /// LocalCommand without a command, a Container without an image, or a
    /// dependency on an undeclared (or disabled) port-forward.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for pf in &self.port_forwards {
            if pf.name.is_empty() {
                return Err(Error::config("portForwards[].name cannot be empty"));
            }
            if !seen.insert(pf.name.clone()) {
                return Err(Error::config(format!(
                    "duplicate port-forward name '{}'",
                    pf.name
                )));
            }
            if pf.remote_port == 0 {
                return Err(Error::config(format!(
                    "port-forward '{}' has remotePort 0",
                    pf.name
                )));
            }
        }

        let enabled_pf: std::collections::HashSet<&str> = self
            .port_forwards
            .iter()
            .filter(|pf| pf.enabled)
            .map(|pf| pf.name.as_str())
            .collect();

        let mut seen = std::collections::HashSet::new();
        for mcp in &self.mcp_servers {
            if mcp.name.is_empty() {
                return Err(Error::config("mcpServers[].name cannot be empty"));
            }
            if !seen.insert(mcp.name.clone()) {
                return Err(Error::config(format!(
                    "duplicate MCP server name '{}'",
                    mcp.name
                )));
            }
            if mcp.proxy_port == 0 {
                return Err(Error::config(format!(
                    "MCP server '{}' has proxyPort 0",
                    mcp.name
                )));
            }
            match mcp.server_type {
                McpServerType::LocalCommand if mcp.command.is_none() => {
                    return Err(Error::config(format!(
                        "MCP server '{}' is a localCommand without a command",
                        mcp.name
                    )));
                }
                McpServerType::Container if mcp.container_image.is_none() => {
                    return Err(Error::config(format!(
                        "MCP server '{}' is a container without a containerImage",
                        mcp.name
                    )));
                }
                _ => {}
            }
            if !mcp.enabled {
                continue;
            }
            for dep in &mcp.requires_port_forwards {
                if !enabled_pf.contains(dep.as_str()) {
                    return Err(Error::config(format!(
                        "MCP server '{}' requires unknown or disabled port-forward '{dep}'",
                        mcp.name
                    )));
                }
            }
        }

        if self.aggregator.port == 0 {
            return Err(Error::config("aggregator.port cannot be 0"));
        }
        Ok(())
    }

    /// Bind this record to a concrete target, materializing context names.
    ///
    /// Disabled entries are dropped here; everything downstream of binding
    /// only sees services that will actually run.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when a workload-role port-forward is declared
    /// but the target carries no WC.
    pub fn resolve(
        &self,
        scheme: &ContextScheme,
        target: &EnvironmentTarget,
    ) -> Result<ResolvedConfig> {
        self.validate()?;

        let mut port_forwards = Vec::new();
        for pf in self.port_forwards.iter().filter(|pf| pf.enabled) {
            let context_name = match (&pf.context, pf.cluster) {
                (Some(explicit), _) => explicit.clone(),
                (None, ClusterRole::Management) => scheme.mc_context(&target.mc),
                (None, ClusterRole::Workload) => match &target.wc {
                    Some(wc) => scheme.wc_context(&target.mc, wc),
                    None => {
                        return Err(Error::config(format!(
                            "port-forward '{}' targets the workload cluster but no WC was requested",
                            pf.name
                        )));
                    }
                },
            };
            port_forwards.push(ResolvedPortForward {
                label: pf.label(),
                context_name,
                namespace: pf.namespace.clone(),
                target: pf.target.clone(),
                local_port: pf.local_port,
                remote_port: pf.remote_port,
                bind_address: pf.bind_address.clone(),
            });
        }

        let mcp_servers = self
            .mcp_servers
            .iter()
            .filter(|mcp| mcp.enabled)
            .map(|mcp| ResolvedMcpServer {
                label: mcp.label(),
                config: mcp.clone(),
                requires: mcp
                    .requires_port_forwards
                    .iter()
                    .map(|n| ServiceLabel::port_forward(n))
                    .collect(),
            })
            .collect();

        let mut contexts = vec![scheme.mc_context(&target.mc)];
        if let Some(wc) = &target.wc {
            contexts.push(scheme.wc_context(&target.mc, wc));
        }

        Ok(ResolvedConfig {
            target: target.clone(),
            contexts,
            port_forwards,
            mcp_servers,
            aggregator_port: self.aggregator.port,
            health_check_interval: self.health_check_interval(),
        })
    }
}

/// A port-forward bound to a concrete context
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPortForward {
    /// Service label (`pf:<name>`)
    pub label: ServiceLabel,
    /// Kube context the tunnel goes through
    pub context_name: String,
    /// Namespace of the target object
    pub namespace: String,
    /// Target pod or service
    pub target: TargetRef,
    /// Local listen port; 0 means OS-assigned
    pub local_port: u16,
    /// Port on the pod
    pub remote_port: u16,
    /// Local bind address
    pub bind_address: String,
}

/// An MCP server together with its resolved dependencies
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMcpServer {
    /// Service label (`mcp:<name>`)
    pub label: ServiceLabel,
    /// The declared record
    pub config: McpServerConfig,
    /// Labels of the port-forwards this MCP depends on
    pub requires: Vec<ServiceLabel>,
}

/// A configuration bound to a concrete (mc, wc) target
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// The target this config is bound to
    pub target: EnvironmentTarget,
    /// Every managed context, MC first; each becomes a `k8s:` graph node
    pub contexts: Vec<String>,
    /// Enabled port-forwards with materialized contexts
    pub port_forwards: Vec<ResolvedPortForward>,
    /// Enabled MCP servers
    pub mcp_servers: Vec<ResolvedMcpServer>,
    /// Aggregator endpoint port
    pub aggregator_port: u16,
    /// Cluster health tick period
    pub health_check_interval: Duration,
}
