//! Scale planner — resize proposals from the active-user snapshot.

use async_trait::async_trait;
use tracing::{debug, info};

use fleet_core::{ActionKind, Installation, LifecycleState, ReconciliationAction, SkipReason};
use fleet_metrics::{MetricsProvider, UserSnapshot};
use fleet_rollout::{Plan, ReconcileError, ReconcileResult, Reconciler, lock_gate};

use crate::sizes::{SizeError, SizeLadder};

/// Proposes a resize for every stable installation whose active-user
/// count has left its tier's band.
pub struct ScalePlanner {
    ladder: SizeLadder,
    users: UserSnapshot,
    allow_unlock: bool,
}

impl ScalePlanner {
    pub fn new(ladder: SizeLadder, users: UserSnapshot, allow_unlock: bool) -> Self {
        Self {
            ladder,
            users,
            allow_unlock,
        }
    }

    /// Take the active-user snapshot for this pass. A metrics failure
    /// aborts the pass.
    pub async fn prepare(
        metrics: &dyn MetricsProvider,
        ladder: SizeLadder,
        allow_unlock: bool,
    ) -> ReconcileResult<Self> {
        info!("gathering installation user metrics");
        let users = metrics.active_users().await?;
        info!(installations = users.len(), "obtained user metrics");
        Ok(Self::new(ladder, users, allow_unlock))
    }
}

#[async_trait]
impl Reconciler for ScalePlanner {
    fn command(&self) -> &'static str {
        "scale"
    }

    fn allow_unlock(&self) -> bool {
        self.allow_unlock
    }

    async fn plan(&self, installation: &Installation) -> ReconcileResult<Plan> {
        if let Some(reason) = lock_gate(installation, self.allow_unlock) {
            return Ok(Plan::Skip(reason));
        }
        if installation.state != LifecycleState::Stable {
            return Ok(Plan::Skip(SkipReason::UnexpectedState {
                expected: LifecycleState::Stable,
                actual: installation.state,
            }));
        }
        let Some(users) = self.users.get(&installation.id) else {
            return Ok(Plan::Skip(SkipReason::NoUserMetrics));
        };

        let target = match self.ladder.suggest_size(&installation.size, users) {
            Ok(target) => target,
            Err(SizeError::UnknownSize(size)) => {
                return Ok(Plan::Skip(SkipReason::UnknownSize(size)));
            }
            Err(e) => {
                return Err(ReconcileError::Plan {
                    id: installation.id.clone(),
                    source: Box::new(e),
                });
            }
        };

        if target == installation.size {
            return Ok(Plan::Keep);
        }

        debug!(
            installation = %installation.id,
            from = %installation.size,
            to = %target,
            users,
            "scale suggested"
        );
        Ok(Plan::Act(ReconciliationAction::new(
            &installation.id,
            ActionKind::Scale {
                from: installation.size.clone(),
                to: target,
            },
            format!("{users} active users"),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizes::{CLOUD_10_USERS, CLOUD_100_USERS, MINI_HA};
    use fleet_metrics::StaticMetrics;

    fn installation(id: &str, size: &str, locked: bool) -> Installation {
        Installation {
            id: id.to_string(),
            owner_id: "owner".to_string(),
            group_id: None,
            state: LifecycleState::Stable,
            size: size.to_string(),
            api_security_lock: locked,
            create_at: None,
        }
    }

    fn planner(users: &[(&str, i64)], allow_unlock: bool) -> ScalePlanner {
        ScalePlanner::new(
            SizeLadder::standard(),
            users.iter().map(|(id, n)| (*id, *n)).collect(),
            allow_unlock,
        )
    }

    #[tokio::test]
    async fn proposes_scale_up() {
        let planner = planner(&[("a", 15)], false);
        let plan = planner
            .plan(&installation("a", CLOUD_10_USERS, false))
            .await
            .unwrap();

        match plan {
            Plan::Act(action) => {
                assert_eq!(
                    action.kind,
                    ActionKind::Scale {
                        from: CLOUD_10_USERS.to_string(),
                        to: CLOUD_100_USERS.to_string(),
                    }
                );
                assert_eq!(action.reason, "15 active users");
            }
            other => panic!("expected scale action, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keeps_size_inside_band() {
        let planner = planner(&[("a", 50), ("b", 3)], false);
        assert_eq!(
            planner
                .plan(&installation("a", CLOUD_100_USERS, false))
                .await
                .unwrap(),
            Plan::Keep
        );
        assert_eq!(
            planner
                .plan(&installation("b", MINI_HA, false))
                .await
                .unwrap(),
            Plan::Keep
        );
    }

    #[tokio::test]
    async fn skips_missing_user_metrics() {
        let planner = planner(&[], false);
        assert_eq!(
            planner
                .plan(&installation("a", CLOUD_10_USERS, false))
                .await
                .unwrap(),
            Plan::Skip(SkipReason::NoUserMetrics)
        );
    }

    #[tokio::test]
    async fn zero_users_still_scales_down() {
        let planner = planner(&[("a", 0)], false);
        let plan = planner
            .plan(&installation("a", CLOUD_100_USERS, false))
            .await
            .unwrap();
        let Plan::Act(action) = plan else {
            panic!("expected a resize, got {plan:?}");
        };
        assert_eq!(
            action.kind,
            ActionKind::Scale {
                from: CLOUD_100_USERS.to_string(),
                to: CLOUD_10_USERS.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn lock_is_checked_before_anything_else() {
        let planner = planner(&[], false);
        let mut locked = installation("a", "unknown-size", true);
        locked.state = LifecycleState::UpdateInProgress;

        assert_eq!(
            planner.plan(&locked).await.unwrap(),
            Plan::Skip(SkipReason::Locked)
        );
    }

    #[tokio::test]
    async fn skips_unstable_and_unknown_sizes() {
        let planner = planner(&[("a", 15), ("b", 15)], true);
        let mut updating = installation("a", CLOUD_10_USERS, false);
        updating.state = LifecycleState::UpdateInProgress;

        assert!(matches!(
            planner.plan(&updating).await.unwrap(),
            Plan::Skip(SkipReason::UnexpectedState { .. })
        ));
        assert_eq!(
            planner
                .plan(&installation("b", "huge", false))
                .await
                .unwrap(),
            Plan::Skip(SkipReason::UnknownSize("huge".to_string()))
        );
    }

    #[tokio::test]
    async fn prepare_fails_when_metrics_are_down() {
        let metrics = StaticMetrics::new();
        metrics.fail_users("thanos unreachable");

        let result = ScalePlanner::prepare(&metrics, SizeLadder::standard(), false).await;
        assert!(matches!(result, Err(ReconcileError::Metrics(_))));
    }
}
