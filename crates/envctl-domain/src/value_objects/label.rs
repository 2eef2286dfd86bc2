//! Service label value object
//!
//! A label is the process-unique identity of a supervised service. Labels are
//! namespaced by service kind: `pf:<name>`, `mcp:<name>`, `k8s:<context>`,
//! `system:<name>`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace prefix for port-forward labels.
pub const PORT_FORWARD_PREFIX: &str = "pf:";
/// Namespace prefix for MCP server labels.
pub const MCP_PREFIX: &str = "mcp:";
/// Namespace prefix for cluster connection labels.
pub const K8S_PREFIX: &str = "k8s:";
/// Namespace prefix for orchestrator-level labels.
pub const SYSTEM_PREFIX: &str = "system:";

/// Process-unique identity of a supervised service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceLabel(String);

impl ServiceLabel {
    /// Label for a port-forward, e.g. `pf:prometheus`.
    #[must_use]
    pub fn port_forward(name: &str) -> Self {
        Self(format!("{PORT_FORWARD_PREFIX}{name}"))
    }

    /// Label for an MCP server, e.g. `mcp:grafana`.
    #[must_use]
    pub fn mcp(name: &str) -> Self {
        Self(format!("{MCP_PREFIX}{name}"))
    }

    /// Label for a cluster connection, e.g. `k8s:teleport-gazelle`.
    #[must_use]
    pub fn k8s(context: &str) -> Self {
        Self(format!("{K8S_PREFIX}{context}"))
    }

    /// Label for an orchestrator-level snapshot, e.g. `system:envctl`.
    #[must_use]
    pub fn system(name: &str) -> Self {
        Self(format!("{SYSTEM_PREFIX}{name}"))
    }

    /// Parse an already-namespaced label.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the string is empty or carries none of
    /// the known namespace prefixes.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        if raw.is_empty() {
            return Err(crate::error::Error::config("service label cannot be empty"));
        }
        let known = [PORT_FORWARD_PREFIX, MCP_PREFIX, K8S_PREFIX, SYSTEM_PREFIX];
        if !known.iter().any(|p| raw.starts_with(p)) {
            return Err(crate::error::Error::config(format!(
                "service label '{raw}' must start with one of pf:, mcp:, k8s:, system:"
            )));
        }
        Ok(Self(raw.to_owned()))
    }

    /// The label text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after the namespace prefix, e.g. `prometheus` for `pf:prometheus`.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, n)| n)
    }
}

impl fmt::Display for ServiceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
