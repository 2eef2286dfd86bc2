//! # Domain Layer
//!
//! Core types and contracts for the envctl service orchestrator: service
//! labels and snapshots, the event-bus message union, the declarative
//! configuration record, the typed dependency graph, and the port traits the
//! application layer is written against.
//!
//! ## Architecture
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`value_objects`] | Labels, states, snapshots |
//! | [`events`] | Bus message union |
//! | [`config`] | Declarative environment record and target binding |
//! | [`context`] | Pure kube-context naming scheme |
//! | [`graph`] | Typed dependency DAG with deterministic orders |
//! | [`ports`] | Capability traits (supervisor, bus, gateway, control) |
//! | [`error`] | Domain error type |
//!
//! No I/O happens in this crate; adapters live in `envctl-infrastructure`.

/// Declarative environment configuration and target binding
pub mod config;
/// Domain-level constants
pub mod constants;
/// Kube context naming scheme
pub mod context;
/// Domain error types
pub mod error;
/// Event bus message types
pub mod events;
/// Typed dependency graph
pub mod graph;
/// Port interfaces consumed by the application layer
pub mod ports;
/// Immutable value objects
pub mod value_objects;

pub use error::{Error, Result};
