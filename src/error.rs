//! Link error taxonomy.

use thiserror::Error;

/// Errors surfaced by the helmet connection manager.
///
/// Every variant is terminal for the operation that produced it; nothing
/// here triggers an automatic retry. Variants are cheap to clone so they
/// can ride inside published events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Runtime Bluetooth permissions are missing.
    #[error("bluetooth permission denied")]
    PermissionDenied,

    /// No usable Bluetooth adapter, or the radio is powered off.
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// The connection attempt was refused or dropped before link-up.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The peripheral does not expose the helmet service/characteristic.
    #[error("helmet service not found")]
    ServiceNotFound,

    /// The transport rejected a write or broke mid-operation.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The session is not in the `Ready` state.
    #[error("session not ready")]
    NotReady,

    /// A configured connect deadline elapsed.
    #[error("connection attempt timed out")]
    Timeout,
}
