//! Lock guard — unlock, mutate, relock.
//!
//! The platform rejects mutating calls on an installation whose API lock
//! is set. When the run may unlock, the guard lifts the lock for exactly
//! one mutation and restores it afterwards, whatever the mutation's
//! outcome.

use std::future::Future;

use tracing::{debug, warn};

use fleet_core::Installation;
use fleet_provisioner::{Provisioner, ProvisionerResult};

use crate::error::GuardError;

/// Result of a guarded mutation that went through.
#[derive(Debug)]
pub struct Guarded<T> {
    pub value: T,
    /// Set when the mutation succeeded but the lock could not be
    /// restored. Always a [`GuardError::RelockFailed`].
    pub relock_error: Option<GuardError>,
}

/// Run `mutate` against `installation` under the lock guard.
///
/// A locked installation without unlock permission fails with
/// [`GuardError::Locked`] before any call is made. A failed unlock aborts
/// without mutating. A failed mutation is relocked best-effort and its
/// error propagated; a relock failure never masks it.
pub async fn with_mutation<T, F, Fut>(
    provisioner: &dyn Provisioner,
    installation: &Installation,
    allow_unlock: bool,
    mutate: F,
) -> Result<Guarded<T>, GuardError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ProvisionerResult<T>>,
{
    let id = installation.id.as_str();
    let unlocked = if installation.is_locked() {
        if !allow_unlock {
            return Err(GuardError::Locked { id: id.to_string() });
        }
        provisioner
            .unlock_api(id)
            .await
            .map_err(|source| GuardError::UnlockFailed {
                id: id.to_string(),
                source,
            })?;
        debug!(installation = %id, "unlocked installation for mutation");
        true
    } else {
        false
    };

    let outcome = mutate().await;

    let relock = if unlocked {
        let result = provisioner.lock_api(id).await;
        if result.is_ok() {
            debug!(installation = %id, "relocked installation");
        }
        Some(result)
    } else {
        None
    };

    match (outcome, relock) {
        (Ok(value), None | Some(Ok(()))) => Ok(Guarded {
            value,
            relock_error: None,
        }),
        (Ok(value), Some(Err(source))) => {
            warn!(installation = %id, error = %source, "mutation succeeded but relock failed");
            Ok(Guarded {
                value,
                relock_error: Some(GuardError::RelockFailed {
                    id: id.to_string(),
                    source,
                }),
            })
        }
        (Err(source), relock) => {
            let relock_error = relock.and_then(Result::err);
            if let Some(e) = &relock_error {
                warn!(installation = %id, error = %e, "relock after failed mutation also failed");
            }
            Err(GuardError::Mutation {
                id: id.to_string(),
                source,
                relock_error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::LifecycleState;
    use fleet_provisioner::{Call, InMemoryProvisioner, Operation};

    fn installation(locked: bool) -> Installation {
        Installation {
            id: "a".to_string(),
            owner_id: "owner".to_string(),
            group_id: None,
            state: LifecycleState::Stable,
            size: "cloud10users".to_string(),
            api_security_lock: locked,
            create_at: None,
        }
    }

    #[tokio::test]
    async fn unlocked_installation_is_mutated_directly() {
        let platform = InMemoryProvisioner::with_installations([installation(false)]);
        let target = installation(false);

        let guarded = with_mutation(&platform, &target, false, || platform.hibernate("a"))
            .await
            .unwrap();

        assert_eq!(guarded.value.state, LifecycleState::HibernationRequested);
        assert!(guarded.relock_error.is_none());
        assert_eq!(platform.calls(), vec![Call::Hibernate("a".to_string())]);
    }

    #[tokio::test]
    async fn locked_without_permission_makes_no_calls() {
        let platform = InMemoryProvisioner::with_installations([installation(true)]);
        let target = installation(true);

        let err = with_mutation(&platform, &target, false, || platform.hibernate("a"))
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::Locked { .. }));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn locked_installation_is_relocked_after_success() {
        let platform = InMemoryProvisioner::with_installations([installation(true)]);
        let target = installation(true);

        let guarded = with_mutation(&platform, &target, true, || {
            platform.update_size("a", "cloud100users")
        })
        .await
        .unwrap();

        assert_eq!(guarded.value.size, "cloud100users");
        assert_eq!(
            platform.calls(),
            vec![
                Call::Unlock("a".to_string()),
                Call::UpdateSize("a".to_string(), "cloud100users".to_string()),
                Call::Lock("a".to_string()),
            ]
        );
        assert!(platform.installation("a").unwrap().api_security_lock);
    }

    #[tokio::test]
    async fn failed_unlock_skips_the_mutation() {
        let platform = InMemoryProvisioner::with_installations([installation(true)]);
        platform.fail_on(Operation::Unlock, "unlock refused");
        let target = installation(true);

        let err = with_mutation(&platform, &target, true, || platform.hibernate("a"))
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::UnlockFailed { .. }));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_mutation_is_relocked_and_propagated() {
        let platform = InMemoryProvisioner::with_installations([installation(true)]);
        platform.fail_on(Operation::Hibernate, "hibernate rejected");
        let target = installation(true);

        let err = with_mutation(&platform, &target, true, || platform.hibernate("a"))
            .await
            .unwrap_err();

        match err {
            GuardError::Mutation {
                source,
                relock_error,
                ..
            } => {
                assert!(source.to_string().contains("hibernate rejected"));
                assert!(relock_error.is_none());
            }
            other => panic!("expected mutation error, got {other:?}"),
        }
        assert_eq!(
            platform.calls(),
            vec![Call::Unlock("a".to_string()), Call::Lock("a".to_string())]
        );
        assert!(platform.installation("a").unwrap().api_security_lock);
    }

    #[tokio::test]
    async fn relock_failure_after_success_is_reported_not_fatal() {
        let platform = InMemoryProvisioner::with_installations([installation(true)]);
        platform.fail_on(Operation::Lock, "lock refused");
        let target = installation(true);

        let guarded = with_mutation(&platform, &target, true, || platform.wake_up("a"))
            .await
            .unwrap();

        assert_eq!(guarded.value.state, LifecycleState::WakeUpRequested);
        assert!(matches!(
            guarded.relock_error,
            Some(GuardError::RelockFailed { .. })
        ));
    }

    #[tokio::test]
    async fn relock_failure_does_not_mask_mutation_error() {
        let platform = InMemoryProvisioner::with_installations([installation(true)]);
        platform.fail_on(Operation::Delete, "delete rejected");
        platform.fail_on(Operation::Lock, "lock refused");
        let target = installation(true);

        let err = with_mutation(&platform, &target, true, || platform.delete("a"))
            .await
            .unwrap_err();

        match err {
            GuardError::Mutation {
                source,
                relock_error,
                ..
            } => {
                assert!(source.to_string().contains("delete rejected"));
                assert!(relock_error.is_some());
            }
            other => panic!("expected mutation error, got {other:?}"),
        }
    }
}
