//! Error types for the link manager daemon.
//!
//! Component errors are almost always absorbed into state-machine events
//! (`MuxError`, `Unknown`, timer expiries) rather than propagated; the
//! variants here cover the paths that genuinely return `Result`.

use std::io;
use thiserror::Error;

/// Result type alias for link manager operations.
pub type LinkMgrResult<T> = Result<T, LinkMgrError>;

/// Errors that can occur during link manager operations.
#[derive(Debug, Error)]
pub enum LinkMgrError {
    /// Raw socket or BPF setup/IO failed.
    #[error("Socket operation failed on '{port}': {source}")]
    Socket {
        /// Port whose prober socket failed.
        port: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Driver RPC (set/probe MUX state) failed.
    #[error("Driver RPC '{operation}' failed on '{port}': {message}")]
    DriverRpc {
        /// The operation that failed ("set", "probe", "get").
        operation: String,
        /// Port the RPC targeted.
        port: String,
        /// Error message.
        message: String,
    },

    /// The mux-wait timer fired with no driver answer.
    #[error("Driver timed out answering a '{target}' toggle on '{port}'")]
    DriverTimeout {
        /// Port the toggle targeted.
        port: String,
        /// Requested MUX state.
        target: String,
    },

    /// Malformed probe packet or TLV list.
    #[error("Parse error: {message}")]
    Parse {
        /// What was malformed.
        message: String,
    },

    /// Activation attempted without required init signals.
    #[error("Port '{port}' not ready: missing {missing}")]
    Config {
        /// The port alias.
        port: String,
        /// Which init signals are still outstanding.
        missing: String,
    },

    /// State-store publish failed.
    #[error("Publish failed for '{port}': {message}")]
    Publish {
        /// The port whose state failed to publish.
        port: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl LinkMgrError {
    /// Creates a socket error.
    pub fn socket(port: impl Into<String>, source: io::Error) -> Self {
        Self::Socket {
            port: port.into(),
            source,
        }
    }

    /// Creates a driver RPC error.
    pub fn driver_rpc(
        operation: impl Into<String>,
        port: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DriverRpc {
            operation: operation.into(),
            port: port.into(),
            message: message.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a config/activation-gating error.
    pub fn config(port: impl Into<String>, missing: impl Into<String>) -> Self {
        Self::Config {
            port: port.into(),
            missing: missing.into(),
        }
    }

    /// Creates a publish error.
    pub fn publish(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that recovers locally via retry/backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkMgrError::Socket { .. }
                | LinkMgrError::DriverRpc { .. }
                | LinkMgrError::DriverTimeout { .. }
                | LinkMgrError::Publish { .. }
        )
    }
}
