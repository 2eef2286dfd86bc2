//! # Infrastructure Layer
//!
//! Adapters behind the domain ports: the bounded event bus, the state store,
//! the Kubernetes gateway and kubeconfig session control, the two service
//! supervisors (port-forward and MCP process), the YAML config loader, and
//! logging setup.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`bus`] | Bounded fan-out event bus with drop policy |
//! | [`state`] | Authoritative service state store |
//! | [`kube`] | Kubernetes gateway + kubeconfig control |
//! | [`supervisors`] | Port-forward and MCP workers |
//! | [`config`] | YAML configuration loader |
//! | [`logging`] | tracing setup and bus log renderer |

/// Bounded fan-out event bus
pub mod bus;
/// YAML configuration loader
pub mod config;
/// Kubernetes adapters
pub mod kube;
/// Logging setup and the bus log renderer
pub mod logging;
/// Authoritative service state store
pub mod state;
/// Service adapters
pub mod supervisors;
