//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default context prefix for Teleport-managed clusters
pub const DEFAULT_CONTEXT_PREFIX: &str = "teleport.giantswarm.io-";

/// envctl — developer environment orchestrator
#[derive(Debug, Parser)]
#[command(name = "envctl", version, about)]
pub struct Cli {
    /// Log filter, e.g. `info` or `envctl=debug` (falls back to ENVCTL_LOG /
    /// RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Explicit configuration file (default: $ENVCTL_CONFIG, then the user
    /// config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Explicit kubeconfig (default: $KUBECONFIG, then ~/.kube/config)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Prefix of managed kube contexts
    #[arg(long, global = true, default_value = DEFAULT_CONTEXT_PREFIX)]
    pub context_prefix: String,

    /// Login binary (invoked as `<binary> kube login <cluster>`)
    #[arg(long, global = true, default_value = "tsh")]
    pub login_binary: String,

    /// Container runtime CLI for container-type MCP servers
    #[arg(long, global = true, default_value = "docker")]
    pub container_runtime: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bring the environment up against a target and keep it alive
    Up {
        /// Management cluster short name
        #[arg(long)]
        mc: String,
        /// Workload cluster short name
        #[arg(long)]
        wc: Option<String>,
        /// Skip the initial login / context switch (assume a valid session)
        #[arg(long)]
        no_login: bool,
    },
    /// Print the MCP aggregator endpoint document as JSON
    Endpoint,
    /// List known management and workload clusters from the kubeconfig
    Clusters,
}
