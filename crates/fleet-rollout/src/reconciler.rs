//! The per-command planning seam.

use async_trait::async_trait;

use fleet_core::{Installation, ReconciliationAction, SkipReason};

use crate::error::ReconcileResult;

/// Planner verdict for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Approved for execution.
    Act(ReconciliationAction),
    /// Not acted on, for a recorded reason.
    Skip(SkipReason),
    /// Already where it should be.
    Keep,
}

/// Decides what one reconciliation command wants done with a candidate.
///
/// Planning works only from the snapshot passed in; the executor re-checks
/// state and lock against a fresh fetch before mutating.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Command name used in logs and reports.
    fn command(&self) -> &'static str;

    /// Whether locked installations may be unlocked for the mutation.
    fn allow_unlock(&self) -> bool;

    async fn plan(&self, installation: &Installation) -> ReconcileResult<Plan>;
}

/// The lock rule shared by every command: a locked installation is
/// skipped unless the run may unlock it.
pub fn lock_gate(installation: &Installation, allow_unlock: bool) -> Option<SkipReason> {
    (installation.is_locked() && !allow_unlock).then_some(SkipReason::Locked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::LifecycleState;

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

    #[test]
    fn lock_gate_rules() {
        assert_eq!(
            lock_gate(&installation(true), false),
            Some(SkipReason::Locked)
        );
        assert_eq!(lock_gate(&installation(true), true), None);
        assert_eq!(lock_gate(&installation(false), false), None);
    }
}
