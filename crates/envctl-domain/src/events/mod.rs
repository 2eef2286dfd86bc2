//! Event Bus Message Types
//!
//! Defines the tagged union carried on the process-wide event bus. Every
//! observable fact about the environment — state transitions, service log
//! output, backpressure drops — travels as a [`BusMessage`], so the headless
//! CLI and the TUI observe exactly the same stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{ServiceLabel, ServiceSnapshot, ServiceState};

/// Severity of a [`BusMessage::LogEntry`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fine-grained diagnostics
    Debug,
    /// Normal operational messages
    Info,
    /// Something unexpected but recoverable
    Warn,
    /// An operation failed
    Error,
}

/// Log output attributed to one subsystem or service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// When the line was produced
    pub ts: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Producer, e.g. a service label or `orchestrator`
    pub subsystem: String,
    /// The message text
    pub message: String,
    /// Optional error detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    /// New entry timestamped now.
    #[must_use]
    pub fn new(level: LogLevel, subsystem: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            level,
            subsystem: subsystem.into(),
            message: message.into(),
            error: None,
        }
    }

    /// Attach an error detail.
    #[must_use]
    pub fn with_error(mut self, err: impl std::fmt::Display) -> Self {
        self.error = Some(err.to_string());
        self
    }
}

/// Message carried on the event bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BusMessage {
    /// A stored snapshot changed for a label
    ServiceStateChanged {
        /// The new snapshot
        snapshot: ServiceSnapshot,
        /// The state recorded before this update, if any
        previous_state: Option<ServiceState>,
    },
    /// Log output from a service or subsystem
    LogEntry(LogEntry),
    /// The bus dropped a state update (or detached a subscriber) for this label
    BackpressureNotification {
        /// Label whose update was dropped
        label: ServiceLabel,
        /// State of the dropped update, when one was dropped
        dropped_state: Option<ServiceState>,
        /// Why the bus dropped
        reason: String,
        /// When the drop happened
        ts: DateTime<Utc>,
    },
}

impl BusMessage {
    /// The label this message is about, when it is label-scoped.
    #[must_use]
    pub fn label(&self) -> Option<&ServiceLabel> {
        match self {
            Self::ServiceStateChanged { snapshot, .. } => Some(&snapshot.label),
            Self::BackpressureNotification { label, .. } => Some(label),
            Self::LogEntry(_) => None,
        }
    }
}
