//! Transport error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking HTTP to an external system.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("request to {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },
}
