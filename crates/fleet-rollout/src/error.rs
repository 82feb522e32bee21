//! Reconciliation error types.

use fleet_metrics::MetricsError;
use fleet_provisioner::ProvisionerError;
use thiserror::Error;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Failures of the lock guard around a single mutation.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("installation {id} is locked and unlocking is not permitted")]
    Locked { id: String },

    #[error("failed to unlock installation {id}: {source}")]
    UnlockFailed {
        id: String,
        #[source]
        source: ProvisionerError,
    },

    /// The mutation failed. If the guard had unlocked the installation,
    /// `relock_error` holds the outcome of the best-effort relock.
    #[error("mutation of installation {id} failed: {source}")]
    Mutation {
        id: String,
        #[source]
        source: ProvisionerError,
        relock_error: Option<ProvisionerError>,
    },

    /// The mutation succeeded but the lock could not be restored.
    #[error("failed to relock installation {id}: {source}")]
    RelockFailed {
        id: String,
        #[source]
        source: ProvisionerError,
    },
}

/// Errors that abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("provisioning platform call failed: {0}")]
    Provisioner(#[from] ProvisionerError),

    #[error("failed to obtain installation metrics: {0}")]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("failed to plan installation {id}: {source}")]
    Plan {
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(
        "timed out waiting for installation updates to settle: {remaining} of {total} candidates unprocessed"
    )]
    Timeout { remaining: usize, total: usize },

    #[error("invalid batch configuration: {0}")]
    InvalidConfig(String),
}
