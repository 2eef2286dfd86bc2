//! Kube context naming scheme
//!
//! Pure helpers for building canonical context names from (MC, WC) short
//! names, so the orchestrator can reason about contexts before any I/O. The
//! prefix is installation-defined (e.g. a Teleport prefix) and comes from
//! configuration.

use serde::{Deserialize, Serialize};

/// The (management, optional workload) cluster pair an environment targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentTarget {
    /// Management cluster short name
    pub mc: String,
    /// Workload cluster short name, when one is targeted
    pub wc: Option<String>,
}

impl EnvironmentTarget {
    /// Target a management cluster only.
    #[must_use]
    pub fn mc_only(mc: impl Into<String>) -> Self {
        Self {
            mc: mc.into(),
            wc: None,
        }
    }

    /// Target a management cluster and a workload cluster inside it.
    #[must_use]
    pub fn with_wc(mc: impl Into<String>, wc: impl Into<String>) -> Self {
        Self {
            mc: mc.into(),
            wc: Some(wc.into()),
        }
    }

    /// The cluster name the login binary expects for the workload cluster.
    #[must_use]
    pub fn wc_login_name(&self) -> Option<String> {
        self.wc.as_ref().map(|wc| format!("{}-{wc}", self.mc))
    }
}

/// Canonical context-name builder with an installation-defined prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextScheme {
    /// Prefix every managed context carries, e.g. `teleport.example.io-`
    pub prefix: String,
}

impl ContextScheme {
    /// New scheme with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Context name for a management cluster: `prefix + mc`.
    #[must_use]
    pub fn mc_context(&self, mc: &str) -> String {
        format!("{}{mc}", self.prefix)
    }

    /// Context name for a workload cluster: `prefix + mc + "-" + wc`.
    #[must_use]
    pub fn wc_context(&self, mc: &str, wc: &str) -> String {
        format!("{}{mc}-{wc}", self.prefix)
    }

    /// The context the target's services default to: WC when present, MC otherwise.
    #[must_use]
    pub fn target_context(&self, target: &EnvironmentTarget) -> String {
        match &target.wc {
            Some(wc) => self.wc_context(&target.mc, wc),
            None => self.mc_context(&target.mc),
        }
    }

    /// Strip the prefix from a managed context name.
    ///
    /// Returns `None` for contexts outside this scheme; used by the cluster
    /// catalog to ignore unrelated kubeconfig entries.
    #[must_use]
    pub fn strip<'a>(&self, context: &'a str) -> Option<&'a str> {
        context.strip_prefix(&self.prefix)
    }
}
