//! Authoritative in-memory service state
//!
//! [`InMemoryStateStore`] records exactly what workers report — it never
//! fabricates a state. Applying a snapshot that differs from the stored one
//! (ignoring the timestamp) bumps the revision and publishes a
//! [`BusMessage::ServiceStateChanged`] carrying the prior state; identity
//! updates are swallowed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use envctl_domain::events::BusMessage;
use envctl_domain::ports::{EventBus, StateStore};
use envctl_domain::value_objects::{ServiceLabel, ServiceSnapshot, ServiceState};

/// Map from service label to its latest snapshot
pub struct InMemoryStateStore {
    entries: DashMap<ServiceLabel, ServiceSnapshot>,
    revision: AtomicU64,
    bus: Arc<dyn EventBus>,
}

impl InMemoryStateStore {
    /// New empty store publishing changes to `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            entries: DashMap::new(),
            revision: AtomicU64::new(0),
            bus,
        }
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, label: &ServiceLabel) -> Option<ServiceSnapshot> {
        self.entries.get(label).map(|entry| entry.clone())
    }

    fn state_of(&self, label: &ServiceLabel) -> Option<ServiceState> {
        self.entries.get(label).map(|entry| entry.state.clone())
    }

    fn snapshot(&self) -> HashMap<ServiceLabel, ServiceSnapshot> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn apply(&self, snapshot: ServiceSnapshot) {
        use dashmap::mapref::entry::Entry;

        let previous_state = match self.entries.entry(snapshot.label.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().differs_from(&snapshot) {
                    // Identity update (timestamp aside): swallowed.
                    return;
                }
                let prior = occupied.get().state.clone();
                occupied.insert(snapshot.clone());
                Some(prior)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(snapshot.clone());
                None
            }
        };
        self.revision.fetch_add(1, Ordering::AcqRel);
        self.bus.publish(BusMessage::ServiceStateChanged {
            snapshot,
            previous_state,
        });
    }

    fn reset(&self) {
        self.entries.clear();
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}
