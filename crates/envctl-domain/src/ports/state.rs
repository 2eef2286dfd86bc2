//! State store port
//!
//! The authoritative map from label to latest snapshot. The store records
//! what workers report and never fabricates a state; applying an update that
//! differs from the stored snapshot publishes a state-changed message.

use std::collections::HashMap;

use crate::value_objects::{ServiceLabel, ServiceSnapshot, ServiceState};

/// Authoritative in-memory service state
pub trait StateStore: Send + Sync {
    /// Latest snapshot for a label.
    fn get(&self, label: &ServiceLabel) -> Option<ServiceSnapshot>;

    /// Latest recorded state for a label.
    fn state_of(&self, label: &ServiceLabel) -> Option<ServiceState>;

    /// Point-in-time copy of every entry.
    fn snapshot(&self) -> HashMap<ServiceLabel, ServiceSnapshot>;

    /// Record a reported snapshot; identity updates are swallowed.
    fn apply(&self, snapshot: ServiceSnapshot);

    /// Drop every entry in one step. Used only during a connection switch.
    fn reset(&self);

    /// Monotonically increasing change counter.
    fn revision(&self) -> u64;
}
