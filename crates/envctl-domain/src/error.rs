//! Error handling types

use thiserror::Error;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for envctl
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// JSON parsing or serialization error
    #[error("JSON error: {source}")]
    Json {
        /// The underlying JSON error
        #[from]
        source: serde_json::Error,
    },

    /// YAML parsing or serialization error
    #[error("YAML error: {source}")]
    Yaml {
        /// The underlying YAML error
        #[from]
        source: serde_yaml::Error,
    },

    /// Configuration-related error. Fatal: the process aborts on this.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error
        message: String,
    },

    /// The external login binary failed for a cluster
    #[error("Login failed for cluster '{cluster}': {message}")]
    Login {
        /// Cluster name passed to the login binary
        cluster: String,
        /// Captured stderr (tail) or spawn failure description
        message: String,
    },

    /// Switching the active kube context failed; the previous graph is kept
    #[error("Context switch to '{context}' failed: {message}")]
    ContextSwitch {
        /// Target context name
        context: String,
        /// Reason the switch failed
        message: String,
    },

    /// No pod behind the target is Running and Ready. Retryable.
    #[error("no ready pod for {kind} '{name}' in namespace '{namespace}'")]
    NoReadyPod {
        /// Target kind (`pod` or `service`)
        kind: String,
        /// Target name
        name: String,
        /// Namespace searched
        namespace: String,
    },

    /// The service did not reach Running within its readiness window. Retryable.
    #[error("'{label}' not ready after {seconds}s")]
    ReadinessTimeout {
        /// Label of the service that timed out
        label: String,
        /// Readiness window that elapsed
        seconds: u64,
    },

    /// The port-forward tunnel failed before or after readiness. Retryable.
    #[error("tunnel error: {message}")]
    Tunnel {
        /// Description of the tunnel failure
        message: String,
    },

    /// An MCP child process exited while it was supposed to be running. Retryable.
    #[error("process '{name}' exited unexpectedly with status {status}")]
    ChildExit {
        /// MCP server name
        name: String,
        /// Exit status (-1 when killed by signal)
        status: i32,
    },

    /// The TCP readiness probe never connected. Retryable.
    #[error("probe timeout: '{name}' did not accept connections on port {port}")]
    ProbeTimeout {
        /// MCP server name
        name: String,
        /// Port probed
        port: u16,
    },

    /// A periodic cluster health check failed. Non-fatal, reported on the bus.
    #[error("health check for context '{context}' failed: {message}")]
    HealthCheck {
        /// Kube context that was checked
        context: String,
        /// Reason the check failed
        message: String,
    },

    /// Kubernetes API error carried as text so the domain stays client-agnostic
    #[error("Kubernetes API error: {message}")]
    KubeApi {
        /// Description of the API failure
        message: String,
    },

    /// Internal invariant violation
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a tunnel error
    pub fn tunnel(message: impl Into<String>) -> Self {
        Self::Tunnel {
            message: message.into(),
        }
    }

    /// Create a Kubernetes API error from any displayable source
    pub fn kube_api(message: impl std::fmt::Display) -> Self {
        Self::KubeApi {
            message: message.to_string(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a supervisor may retry after this error.
    ///
    /// Retryable errors feed the backoff schedule; everything else is terminal
    /// for the current worker.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoReadyPod { .. }
                | Self::ReadinessTimeout { .. }
                | Self::Tunnel { .. }
                | Self::ChildExit { .. }
                | Self::ProbeTimeout { .. }
                | Self::KubeApi { .. }
                | Self::Io { .. }
        )
    }
}
