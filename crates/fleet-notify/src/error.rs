//! Notification error types.

use fleet_core::TransportError;
use thiserror::Error;

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("payload {0} value not set")]
    MissingField(&'static str),

    #[error("failed to marshal payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to send webhook: {0}")]
    Transport(#[from] TransportError),

    #[error("webhook rejected with status {status}: {body}")]
    Status { status: u16, body: String },
}
