/// Subsystem error taxonomy.
///
/// Individual probe failures (timeouts, refused connections, bad JSON)
/// never show up here — they are absorbed at the probe boundary and
/// become `None`/`false` outcomes. Only orchestrator-level results reach
/// the caller as one of these variants.

use thiserror::Error;

/// Errors are `Clone` so a single-flight operation can broadcast one
/// result to every attached caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// No active WiFi/ethernet adapter. Terminal until the OS reports
    /// connectivity again; never auto-retried.
    #[error("no active network connection")]
    NetworkUnavailable,

    /// A full scan completed without a compatible responder. Retryable.
    #[error("no compatible server found on the local network")]
    ServerNotFound,

    /// A previously reachable server keeps failing health checks.
    #[error("server at {url} is no longer responding")]
    ServerUnhealthy { url: String },

    /// Persisted-state read/write failure, flattened to a message.
    #[error("storage error: {0}")]
    Storage(String),
}

pub type ConnectResult<T> = Result<T, ConnectError>;
