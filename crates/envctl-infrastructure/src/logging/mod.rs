//! Structured logging with tracing
//!
//! Process diagnostics go through the tracing ecosystem; service output
//! (child stdout/stderr, tunnel events) travels the event bus as `LogEntry`
//! messages. [`spawn_log_renderer`] bridges the two for headless runs by
//! replaying bus log entries into tracing, so a CLI invocation sees every
//! service line on stderr.

use std::sync::Arc;

use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use envctl_domain::events::{BusMessage, LogLevel};
use envctl_domain::ports::EventBus;

/// Environment variable controlling the log filter, before `RUST_LOG`
pub const LOG_FILTER_ENV: &str = "ENVCTL_LOG";

/// Initialize the global tracing subscriber.
///
/// An explicit `level` wins over `ENVCTL_LOG` and `RUST_LOG`; the default is
/// `info`. Output goes to stderr, as JSON when `json` is set. Calling twice
/// is harmless (the second call is ignored).
pub fn init_logging(level: Option<&str>, json: bool) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => std::env::var(LOG_FILTER_ENV)
            .or_else(|_| std::env::var("RUST_LOG"))
            .map_or_else(|_| EnvFilter::new("info"), EnvFilter::new),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

/// Spawn a task replaying bus log entries (and backpressure warnings) into
/// tracing. Runs until the bus drops the subscription.
pub fn spawn_log_renderer(bus: &Arc<dyn EventBus>) -> tokio::task::JoinHandle<()> {
    let mut stream = bus.subscribe();
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                BusMessage::LogEntry(entry) => {
                    let subsystem = entry.subsystem.as_str();
                    let error = entry.error.as_deref().unwrap_or_default();
                    match entry.level {
                        LogLevel::Debug => {
                            tracing::debug!(target: "service", %subsystem, "{}", entry.message);
                        }
                        LogLevel::Info => {
                            tracing::info!(target: "service", %subsystem, "{}", entry.message);
                        }
                        LogLevel::Warn => {
                            tracing::warn!(target: "service", %subsystem, error, "{}", entry.message);
                        }
                        LogLevel::Error => {
                            tracing::error!(target: "service", %subsystem, error, "{}", entry.message);
                        }
                    }
                }
                BusMessage::BackpressureNotification { label, reason, .. } => {
                    tracing::warn!(target: "service", %label, %reason, "event bus backpressure");
                }
                BusMessage::ServiceStateChanged { snapshot, .. } => {
                    tracing::debug!(
                        target: "service",
                        label = %snapshot.label,
                        state = ?snapshot.state,
                        "state changed"
                    );
                }
            }
        }
    })
}
