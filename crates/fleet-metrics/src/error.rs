//! Metrics backend error types.

use fleet_core::TransportError;
use thiserror::Error;

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Errors raised while querying the metrics backend.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("query failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("query rejected ({error_type}): {message}")]
    Query { error_type: String, message: String },

    #[error("encountered warnings obtaining metrics: {}", .0.join(", "))]
    Warnings(Vec<String>),

    #[error("failed to decode query response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected query result: {0}")]
    UnexpectedResult(String),

    #[error("metrics unavailable: {0}")]
    Unavailable(String),
}
