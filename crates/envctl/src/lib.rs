//! envctl — developer environment orchestrator
//!
//! Brings up and keeps alive a coherent local environment against one or two
//! remote Kubernetes clusters: authenticates, opens port-forwards, launches
//! MCP helper processes, and monitors health. See the `envctl-domain`,
//! `envctl-application`, and `envctl-infrastructure` crates for the layers;
//! this crate wires them into the CLI.

/// Bootstrap wiring and subcommand entry points
pub mod app;
/// Command-line interface
pub mod cli;
