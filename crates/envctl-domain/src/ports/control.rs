//! Cluster session control port
//!
//! Login, context switching, and catalog listing. The adapter wraps the
//! user's kubeconfig and the external login binary; every operation carries a
//! deadline and surfaces failures without partial mutation.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::EnvironmentConfig;
use crate::error::Result;

/// Captured output of one login invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginOutput {
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

/// Known clusters, for UI autocomplete; not on the hot path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterCatalog {
    /// Management cluster short names
    pub mcs: Vec<String>,
    /// Workload cluster short names grouped by MC
    pub wcs_by_mc: BTreeMap<String, Vec<String>>,
}

/// Session-level cluster operations
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Blocking login through the external binary.
    ///
    /// # Errors
    ///
    /// Returns a `Login` error wrapping a non-zero exit with the captured
    /// stderr, or the spawn failure.
    async fn login(&self, cluster: &str) -> Result<LoginOutput>;

    /// The active context of the user's kube configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the kubeconfig cannot be read or no context is
    /// active.
    async fn current_context(&self) -> Result<String>;

    /// Set the active context.
    ///
    /// # Errors
    ///
    /// Returns a `ContextSwitch` error when the context is not present or the
    /// kubeconfig cannot be rewritten.
    async fn switch_context(&self, name: &str) -> Result<()>;

    /// Enumerate known clusters from the kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error when the kubeconfig cannot be read.
    async fn list_clusters(&self) -> Result<ClusterCatalog>;
}

/// Source of the declarative environment record.
///
/// A connection switch reloads through this port so the fresh configuration
/// is bound to the new target.
pub trait ConfigSource: Send + Sync {
    /// Load and validate the environment configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the record cannot be read, parsed, or
    /// validated.
    fn load(&self) -> Result<EnvironmentConfig>;
}
