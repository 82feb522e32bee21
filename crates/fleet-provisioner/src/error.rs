//! Provisioning platform error types.

use fleet_core::TransportError;
use thiserror::Error;

pub type ProvisionerResult<T> = Result<T, ProvisionerError>;

/// Errors returned by a provisioning platform call.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to decode {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("installation not found: {0}")]
    NotFound(String),

    #[error("installation {0} is locked")]
    Locked(String),

    #[error("platform unavailable: {0}")]
    Unavailable(String),
}
