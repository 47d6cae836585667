//! Error types for the broker bridge.

use thiserror::Error;

/// Errors surfaced by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker transport is down. Commands are not queued; the caller
    /// decides whether to retry.
    #[error("broker transport is disconnected")]
    Disconnected,

    /// The broker transport failed.
    #[error("broker transport error: {0}")]
    Transport(String),

    /// A non-fatal broker reply; logged and ignored.
    #[error("transient broker failure: {0}")]
    Transient(String),
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
